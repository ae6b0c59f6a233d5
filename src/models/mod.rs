//! Domain models for the LevelUp points ledger.
//!
//! # Core Concepts
//!
//! - [`TaskDefinition`]: An awardable action with a point value. Soft-deactivated, never deleted.
//! - [`LedgerEntry`]: Append-only record of points earned. The only source of truth for totals.
//! - [`UserTotal`] / [`RankedUser`] / [`UserPointsSummary`]: Views derived from the ledger.
//! - [`UserProfile`]: Display name and cohort used by leaderboards.
//! - [`Identity`]: The verified caller, passed into every service call.

mod entry;
mod standing;
mod task;
mod user;

pub use entry::*;
pub use standing::*;
pub use task::*;
pub use user::*;
