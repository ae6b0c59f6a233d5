//! Persistence port for the catalog, ledger and leaderboard.
//!
//! Domain code only talks to [`Store`]. [`crate::db::Database`] backs it with
//! SQLite; [`MemoryStore`] keeps everything in process.

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::*;

/// Outcome of appending an entry that may collide with an existing one.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The entry was written.
    Recorded(LedgerEntry),
    /// Another entry already holds the dedupe key (or already reverses the
    /// same original). Nothing was written; this is the winner.
    Existing(LedgerEntry),
}

impl AppendOutcome {
    pub fn into_entry(self) -> LedgerEntry {
        match self {
            Self::Recorded(e) | Self::Existing(e) => e,
        }
    }
}

/// Storage operations required by the domain.
///
/// Implementations must enforce two uniqueness constraints atomically:
/// dedupe keys across all entries, and at most one entry per `reverses`
/// target. Standings must be computed from a single consistent snapshot.
pub trait Store: Clone + Send + Sync + 'static {
    fn insert_task(&self, task: &TaskDefinition) -> StoreResult<()>;

    fn get_task(&self, id: Uuid) -> StoreResult<Option<TaskDefinition>>;

    /// Apply the fields set in `changes` to a task in one atomic step.
    ///
    /// Fields left as `None` keep whatever is stored at write time, so a
    /// concurrent toggle of `active` is never overwritten by a stale read.
    /// Returns the task as written, or `None` if it does not exist.
    fn patch_task(
        &self,
        id: Uuid,
        changes: &UpdateTaskInput,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Option<TaskDefinition>>;

    /// Tasks matching `filter`, in creation order.
    fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<TaskDefinition>>;

    fn count_tasks(&self) -> StoreResult<usize>;

    fn append_entry(&self, entry: NewEntry) -> StoreResult<AppendOutcome>;

    fn get_entry(&self, id: EntryId) -> StoreResult<Option<LedgerEntry>>;

    fn find_by_dedupe_key(&self, key: &str) -> StoreResult<Option<LedgerEntry>>;

    /// The compensating entry for `id`, if one exists.
    fn find_reversal(&self, id: EntryId) -> StoreResult<Option<LedgerEntry>>;

    fn total_for(&self, user_id: &str) -> StoreResult<i64>;

    /// Up to `limit` entries for `user_id` with id below `before`, newest first.
    fn entries_for(
        &self,
        user_id: &str,
        before: Option<EntryId>,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>>;

    /// Every user with at least one entry, optionally restricted to a cohort.
    fn standings(&self, cohort: Option<&str>) -> StoreResult<Vec<UserTotal>>;

    fn upsert_profile(&self, profile: &UserProfile) -> StoreResult<()>;

    fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>>;
}
