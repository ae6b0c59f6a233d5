use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ledger entry identifier. Assigned by the store in strictly increasing order.
pub type EntryId = i64;

/// An append-only record of points earned (or taken back) by a user.
///
/// Entries are never edited or deleted. A correction is a second entry
/// whose `reverses` field points at the original and whose `points` is the
/// negation of the original's. The point value is captured when the entry
/// is written, so editing a task later never changes historical totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub user_id: String,
    pub task_id: Uuid,
    /// Signed point delta. Negative only for compensating entries.
    pub points: i64,
    /// Caller-supplied key enforcing at-most-once awards, e.g. `daily:1:2024-06-01`.
    pub dedupe_key: Option<String>,
    /// The entry this one compensates, if it is a reversal.
    pub reverses: Option<EntryId>,
    /// Why the original entry was reversed.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_compensation(&self) -> bool {
        self.reverses.is_some()
    }
}

/// An entry about to be appended. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: String,
    pub task_id: Uuid,
    pub points: i64,
    pub dedupe_key: Option<String>,
    pub reverses: Option<EntryId>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of an award call.
///
/// `replayed` is true when the dedupe key was already recorded and `entry`
/// is the previously written entry rather than a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardReceipt {
    pub entry: LedgerEntry,
    pub replayed: bool,
}

/// Input for awarding a task to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardInput {
    pub task_id: Uuid,
    /// Explicit dedupe key. Only admins choose keys freely; a student's key
    /// must match the one derived for the claim.
    #[serde(default)]
    pub dedupe_key: Option<String>,
    /// What the award is for: the referred user for referrals, the job
    /// posting for job tasks.
    #[serde(default)]
    pub subject: Option<String>,
}

/// Input for reversing an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseInput {
    pub reason: String,
}

/// Cursor-based page request for a user's history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageRequest {
    /// Return entries strictly older than this entry id. `None` starts from the newest.
    pub cursor: Option<EntryId>,
    pub limit: Option<usize>,
}

/// One page of history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<LedgerEntry>,
    /// Pass back as `cursor` to fetch the next page. `None` when exhausted.
    pub next_cursor: Option<EntryId>,
}
