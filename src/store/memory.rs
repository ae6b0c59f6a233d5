use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AppendOutcome, Store};
use crate::error::{StoreError, StoreResult};
use crate::leveling::standings_from_entries;
use crate::models::*;

/// In-process store. All state sits behind one mutex, so every call is a
/// consistent snapshot and appends are serialized.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    tasks: Vec<TaskDefinition>,
    /// Entry `id` lives at index `id - 1`.
    entries: Vec<LedgerEntry>,
    by_dedupe_key: HashMap<String, EntryId>,
    by_reverses: HashMap<EntryId, EntryId>,
    totals: HashMap<String, i64>,
    profiles: HashMap<String, UserProfile>,
}

impl State {
    fn entry(&self, id: EntryId) -> Option<&LedgerEntry> {
        usize::try_from(id)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.entries.get(i))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

impl Store for MemoryStore {
    fn insert_task(&self, task: &TaskDefinition) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "task {} already exists",
                task.id
            )));
        }
        state.tasks.push(task.clone());
        Ok(())
    }

    fn get_task(&self, id: Uuid) -> StoreResult<Option<TaskDefinition>> {
        let state = self.lock()?;
        Ok(state.tasks.iter().find(|t| t.id == id).cloned())
    }

    fn patch_task(
        &self,
        id: Uuid,
        changes: &UpdateTaskInput,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Option<TaskDefinition>> {
        let mut state = self.lock()?;
        let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };

        if let Some(title) = &changes.title {
            task.title = title.clone();
        }
        if let Some(description) = &changes.description {
            task.description = description.clone();
        }
        if let Some(category) = changes.category {
            task.category = category;
        }
        if let Some(points) = changes.points {
            task.points = points;
        }
        if let Some(active) = changes.active {
            task.active = active;
        }
        task.updated_at = updated_at;
        Ok(Some(task.clone()))
    }

    fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<TaskDefinition>> {
        let state = self.lock()?;
        Ok(state
            .tasks
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    fn count_tasks(&self) -> StoreResult<usize> {
        Ok(self.lock()?.tasks.len())
    }

    fn append_entry(&self, entry: NewEntry) -> StoreResult<AppendOutcome> {
        let mut state = self.lock()?;

        if let Some(key) = &entry.dedupe_key {
            if let Some(&existing) = state.by_dedupe_key.get(key) {
                let winner = state.entry(existing).cloned().ok_or_else(|| {
                    StoreError::Backend(anyhow::anyhow!("dangling dedupe index for {key}"))
                })?;
                return Ok(AppendOutcome::Existing(winner));
            }
        }
        if let Some(original) = entry.reverses {
            if let Some(&existing) = state.by_reverses.get(&original) {
                let winner = state.entry(existing).cloned().ok_or_else(|| {
                    StoreError::Backend(anyhow::anyhow!("dangling reversal index for {original}"))
                })?;
                return Ok(AppendOutcome::Existing(winner));
            }
        }

        let id = state.entries.len() as EntryId + 1;
        let recorded = LedgerEntry {
            id,
            user_id: entry.user_id,
            task_id: entry.task_id,
            points: entry.points,
            dedupe_key: entry.dedupe_key,
            reverses: entry.reverses,
            reason: entry.reason,
            created_at: entry.created_at,
        };

        if let Some(key) = &recorded.dedupe_key {
            state.by_dedupe_key.insert(key.clone(), id);
        }
        if let Some(original) = recorded.reverses {
            state.by_reverses.insert(original, id);
        }
        *state.totals.entry(recorded.user_id.clone()).or_insert(0) += recorded.points;
        state.entries.push(recorded.clone());

        Ok(AppendOutcome::Recorded(recorded))
    }

    fn get_entry(&self, id: EntryId) -> StoreResult<Option<LedgerEntry>> {
        Ok(self.lock()?.entry(id).cloned())
    }

    fn find_by_dedupe_key(&self, key: &str) -> StoreResult<Option<LedgerEntry>> {
        let state = self.lock()?;
        Ok(state
            .by_dedupe_key
            .get(key)
            .and_then(|&id| state.entry(id))
            .cloned())
    }

    fn find_reversal(&self, id: EntryId) -> StoreResult<Option<LedgerEntry>> {
        let state = self.lock()?;
        Ok(state
            .by_reverses
            .get(&id)
            .and_then(|&rid| state.entry(rid))
            .cloned())
    }

    fn total_for(&self, user_id: &str) -> StoreResult<i64> {
        Ok(self.lock()?.totals.get(user_id).copied().unwrap_or(0))
    }

    fn entries_for(
        &self,
        user_id: &str,
        before: Option<EntryId>,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id && before.map_or(true, |b| e.id < b))
            .take(limit)
            .cloned()
            .collect())
    }

    fn standings(&self, cohort: Option<&str>) -> StoreResult<Vec<UserTotal>> {
        let state = self.lock()?;
        let mut totals = standings_from_entries(&state.entries);
        for total in &mut totals {
            if let Some(profile) = state.profiles.get(&total.user_id) {
                total.display_name = Some(profile.display_name.clone());
                total.cohort = profile.cohort.clone();
            }
        }
        if let Some(cohort) = cohort {
            totals.retain(|t| t.cohort.as_deref() == Some(cohort));
        }
        Ok(totals)
    }

    fn upsert_profile(&self, profile: &UserProfile) -> StoreResult<()> {
        let mut state = self.lock()?;
        let created_at = state
            .profiles
            .get(&profile.user_id)
            .map_or(profile.created_at, |p| p.created_at);
        state.profiles.insert(
            profile.user_id.clone(),
            UserProfile {
                created_at,
                ..profile.clone()
            },
        );
        Ok(())
    }

    fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.lock()?.profiles.get(user_id).cloned())
    }
}
