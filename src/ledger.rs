//! The append-only points ledger.
//!
//! Every point a user holds comes from a [`LedgerEntry`]. Awards are
//! idempotent under a dedupe key; corrections are compensating entries.

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::*;
use crate::store::{AppendOutcome, Store};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Dedupe key for a once-per-day task.
pub fn daily_key(user_id: &str, date: NaiveDate) -> String {
    format!("daily:{}:{}", user_id, date.format("%Y-%m-%d"))
}

/// Dedupe key crediting a referrer once per referred user.
pub fn referral_key(referrer_id: &str, referred_user_id: &str) -> String {
    format!("referral:{}:{}", referrer_id, referred_user_id)
}

/// Dedupe key crediting one application per job posting.
pub fn job_application_key(user_id: &str, job_id: &str) -> String {
    format!("job:{}:{}", user_id, job_id)
}

/// Dedupe key for a task that counts once per user.
pub fn task_key(user_id: &str, task_id: Uuid) -> String {
    format!("task:{}:{}", user_id, task_id)
}

/// The dedupe key for `user_id` claiming `task` on `today`.
///
/// Daily tasks count once per day, referrals once per referred user and job
/// tasks once per posting. Any other task counts once per user.
pub fn claim_key(
    user_id: &str,
    task: &TaskDefinition,
    subject: Option<&str>,
    today: NaiveDate,
) -> Result<String> {
    match task.category {
        TaskCategory::Daily => Ok(daily_key(user_id, today)),
        TaskCategory::Referral => Ok(referral_key(user_id, required_subject(task, subject)?)),
        TaskCategory::Job => Ok(job_application_key(user_id, required_subject(task, subject)?)),
        TaskCategory::Profile | TaskCategory::Other => Ok(task_key(user_id, task.id)),
    }
}

fn required_subject<'a>(task: &TaskDefinition, subject: Option<&'a str>) -> Result<&'a str> {
    let subject = subject.map(str::trim).unwrap_or_default();
    if subject.is_empty() {
        return Err(LedgerError::Validation(format!(
            "{} tasks need a subject id",
            task.category.as_str()
        )));
    }
    // Keys are colon-separated, so a colon could forge another user's key.
    if subject.contains(':') {
        return Err(LedgerError::Validation(
            "subject id must not contain ':'".to_string(),
        ));
    }
    Ok(subject)
}

#[derive(Debug, Clone)]
pub struct Ledger<S> {
    store: S,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record that `user_id` completed `task_id`.
    ///
    /// With a dedupe key that is already recorded, nothing is written and the
    /// earlier entry comes back with `replayed` set. That includes losing a
    /// race against a concurrent award with the same key.
    pub fn award(
        &self,
        user_id: &str,
        task_id: Uuid,
        dedupe_key: Option<&str>,
    ) -> Result<AwardReceipt> {
        if user_id.trim().is_empty() {
            return Err(LedgerError::Validation("user id is required".to_string()));
        }
        if dedupe_key.is_some_and(|k| k.trim().is_empty()) {
            return Err(LedgerError::Validation(
                "dedupe key must not be empty".to_string(),
            ));
        }

        let task = self
            .store
            .get_task(task_id)?
            .ok_or(LedgerError::TaskNotFound(task_id))?;
        if !task.active {
            tracing::warn!(user_id, task_id = %task_id, "Award against inactive task");
            return Err(LedgerError::InactiveTask(task_id));
        }

        if let Some(key) = dedupe_key {
            if let Some(existing) = self.store.find_by_dedupe_key(key)? {
                tracing::debug!(dedupe_key = key, entry_id = existing.id, "Award replayed");
                return Ok(AwardReceipt {
                    entry: existing,
                    replayed: true,
                });
            }
        }

        let outcome = self.store.append_entry(NewEntry {
            user_id: user_id.to_string(),
            task_id,
            points: i64::from(task.points),
            dedupe_key: dedupe_key.map(str::to_string),
            reverses: None,
            reason: None,
            created_at: Utc::now(),
        })?;

        match outcome {
            AppendOutcome::Recorded(entry) => {
                tracing::info!(
                    user_id,
                    task_id = %task_id,
                    entry_id = entry.id,
                    points = entry.points,
                    "Awarded points"
                );
                Ok(AwardReceipt {
                    entry,
                    replayed: false,
                })
            }
            AppendOutcome::Existing(entry) => {
                tracing::debug!(entry_id = entry.id, "Lost dedupe race, returning winner");
                Ok(AwardReceipt {
                    entry,
                    replayed: true,
                })
            }
        }
    }

    /// Award `task_id` to a user claiming it for themselves.
    ///
    /// The dedupe key is always derived with [`claim_key`]. A `requested_key`
    /// that differs from it is refused, so one user cannot spend another
    /// user's key.
    pub fn claim(
        &self,
        user_id: &str,
        task_id: Uuid,
        subject: Option<&str>,
        requested_key: Option<&str>,
        today: NaiveDate,
    ) -> Result<AwardReceipt> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or(LedgerError::TaskNotFound(task_id))?;
        let key = claim_key(user_id, &task, subject, today)?;

        if let Some(requested) = requested_key {
            if requested != key {
                tracing::warn!(user_id, requested, "Refused foreign dedupe key");
                return Err(LedgerError::Forbidden(format!(
                    "dedupe key {} does not belong to this claim",
                    requested
                )));
            }
        }

        self.award(user_id, task_id, Some(&key))
    }

    /// Cancel an entry by appending its negation. The original stays in place.
    pub fn reverse(&self, entry_id: EntryId, reason: &str) -> Result<LedgerEntry> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::Validation(
                "a reversal reason is required".to_string(),
            ));
        }

        let original = self.get_entry(entry_id)?;
        if original.is_compensation() {
            return Err(LedgerError::Validation(format!(
                "entry {} is itself a reversal",
                entry_id
            )));
        }
        if self.store.find_reversal(entry_id)?.is_some() {
            return Err(LedgerError::AlreadyReversed(entry_id));
        }

        let outcome = self.store.append_entry(NewEntry {
            user_id: original.user_id.clone(),
            task_id: original.task_id,
            points: -original.points,
            dedupe_key: None,
            reverses: Some(entry_id),
            reason: Some(reason.to_string()),
            created_at: Utc::now(),
        })?;

        match outcome {
            AppendOutcome::Recorded(entry) => {
                tracing::info!(
                    user_id = %original.user_id,
                    entry_id,
                    reversal_id = entry.id,
                    points = entry.points,
                    reason,
                    "Reversed ledger entry"
                );
                Ok(entry)
            }
            AppendOutcome::Existing(_) => Err(LedgerError::AlreadyReversed(entry_id)),
        }
    }

    pub fn get_entry(&self, entry_id: EntryId) -> Result<LedgerEntry> {
        self.store
            .get_entry(entry_id)?
            .ok_or(LedgerError::EntryNotFound(entry_id))
    }

    /// Sum of every entry for the user, compensations included.
    pub fn total_for(&self, user_id: &str) -> Result<i64> {
        Ok(self.store.total_for(user_id)?)
    }

    /// One page of a user's history, newest first.
    pub fn history_for(&self, user_id: &str, page: PageRequest) -> Result<HistoryPage> {
        let limit = page
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        // One extra row tells us whether another page exists.
        let mut entries = self.store.entries_for(user_id, page.cursor, limit + 1)?;
        let next_cursor = if entries.len() > limit {
            entries.truncate(limit);
            entries.last().map(|e| e.id)
        } else {
            None
        };

        Ok(HistoryPage {
            entries,
            next_cursor,
        })
    }

    /// Lazily walk a user's whole history, newest first, one page at a time.
    pub fn history_iter(&self, user_id: &str, page_size: usize) -> HistoryIter<'_, S> {
        HistoryIter {
            ledger: self,
            user_id: user_id.to_string(),
            page_size,
            cursor: None,
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }
    }
}

/// Iterator returned by [`Ledger::history_iter`].
///
/// Fetches a page only when the previous one is used up. Stops after the
/// first error.
pub struct HistoryIter<'a, S> {
    ledger: &'a Ledger<S>,
    user_id: String,
    page_size: usize,
    cursor: Option<EntryId>,
    buffer: std::vec::IntoIter<LedgerEntry>,
    exhausted: bool,
}

impl<S: Store> Iterator for HistoryIter<'_, S> {
    type Item = Result<LedgerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.next() {
                return Some(Ok(entry));
            }
            if self.exhausted {
                return None;
            }

            let page = PageRequest {
                cursor: self.cursor,
                limit: Some(self.page_size),
            };
            match self.ledger.history_for(&self.user_id, page) {
                Ok(page) => {
                    self.cursor = page.next_cursor;
                    self.exhausted = page.next_cursor.is_none();
                    self.buffer = page.entries.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keys_follow_portal_format() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(daily_key("1", date), "daily:1:2024-06-01");
        assert_eq!(referral_key("1", "42"), "referral:1:42");
        assert_eq!(job_application_key("7", "job-3"), "job:7:job-3");
    }

    fn task(category: TaskCategory) -> TaskDefinition {
        TaskDefinition {
            id: Uuid::nil(),
            title: "Some task".to_string(),
            description: "Some description".to_string(),
            category,
            points: 10,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn claim_keys_are_bound_to_the_claimant() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let daily = claim_key("1", &task(TaskCategory::Daily), Some("ignored"), today).unwrap();
        assert_eq!(daily, "daily:1:2024-06-01");

        let referral = claim_key("1", &task(TaskCategory::Referral), Some(" 42 "), today).unwrap();
        assert_eq!(referral, "referral:1:42");

        let job = claim_key("7", &task(TaskCategory::Job), Some("job-3"), today).unwrap();
        assert_eq!(job, "job:7:job-3");

        let profile = claim_key("1", &task(TaskCategory::Profile), None, today).unwrap();
        assert_eq!(profile, format!("task:1:{}", Uuid::nil()));
    }

    #[test]
    fn referral_and_job_claims_need_a_plain_subject() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        for category in [TaskCategory::Referral, TaskCategory::Job] {
            let missing = claim_key("1", &task(category), None, today);
            assert!(matches!(missing, Err(LedgerError::Validation(_))));

            let blank = claim_key("1", &task(category), Some("  "), today);
            assert!(matches!(blank, Err(LedgerError::Validation(_))));

            let forged = claim_key("1", &task(category), Some("3:42"), today);
            assert!(matches!(forged, Err(LedgerError::Validation(_))));
        }
    }
}
