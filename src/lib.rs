//! Points ledger, task catalog and leveling engine for a gamified job portal.
//!
//! Students earn points by completing tasks from the [`catalog`]. Every award
//! is an entry in the append-only [`ledger`], and [`leveling`] derives levels
//! and rankings from those entries. [`service::PointsService`] ties the three
//! together behind caller identity checks and store timeouts.

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod leveling;
pub mod models;
pub mod render;
pub mod service;
pub mod store;

pub use error::{LedgerError, Result};
pub use service::PointsService;
