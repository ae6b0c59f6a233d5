use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::EntryId;

/// A user's total as read from one standings snapshot.
///
/// `reached_seq` is the id of the ledger entry at which the user's running
/// total first became equal to `total`. It is the ranking tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTotal {
    pub user_id: String,
    pub total: i64,
    pub reached_seq: EntryId,
    pub reached_at: DateTime<Utc>,
    pub display_name: Option<String>,
    pub cohort: Option<String>,
}

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedUser {
    /// 1-based position. Unique within a ranking.
    pub rank: usize,
    pub user_id: String,
    pub display_name: Option<String>,
    pub cohort: Option<String>,
    pub total: i64,
    pub level: u64,
}

/// Derived points view for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPointsSummary {
    pub user_id: String,
    pub total: i64,
    pub level: u64,
    pub points_to_next_level: i64,
    /// Global rank. `None` until the user has at least one ledger entry.
    pub rank: Option<usize>,
    /// Points needed to overtake the user directly above. `None` at rank 1 or when unranked.
    pub points_to_next_rank: Option<i64>,
}

/// Level lookup result for a raw point total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub total: i64,
    pub level: u64,
    pub points_to_next_level: i64,
}
