//! Async facade over the catalog, ledger and leaderboard.
//!
//! Each call runs its store work on tokio's blocking pool and gives up after
//! the configured timeout with [`LedgerError::StoreUnavailable`]. A timed-out
//! write may still land afterwards; dedupe keys make the retry safe.
//!
//! The caller's [`Identity`] is passed into every call. Catalog changes and
//! reversals need the admin role; per-user reads need the owner or an admin.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::catalog::TaskCatalog;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::leveling::{LevelScale, Leaderboard};
use crate::models::*;
use crate::store::Store;

struct Core<S> {
    store: S,
    catalog: TaskCatalog<S>,
    ledger: Ledger<S>,
    leaderboard: Leaderboard<S>,
}

pub struct PointsService<S> {
    core: Arc<Core<S>>,
    timeout: Duration,
}

impl<S> Clone for PointsService<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            timeout: self.timeout,
        }
    }
}

impl<S: Store> PointsService<S> {
    pub fn new(store: S, max_task_points: u32, scale: LevelScale, timeout: Duration) -> Self {
        Self {
            core: Arc::new(Core {
                catalog: TaskCatalog::new(store.clone(), max_task_points),
                ledger: Ledger::new(store.clone()),
                leaderboard: Leaderboard::new(store.clone(), scale),
                store,
            }),
            timeout,
        }
    }

    pub fn from_config(store: S, config: &LedgerConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            store,
            config.max_task_points,
            config.level_scale()?,
            config.store_timeout(),
        ))
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Core<S>) -> Result<T> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        let work = tokio::task::spawn_blocking(move || f(&core));

        match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    tracing::debug!(op, error = %e, "Operation failed");
                }
                result
            }
            Ok(Err(join_error)) => Err(LedgerError::Store(anyhow::anyhow!(
                "{} did not complete: {}",
                op,
                join_error
            ))),
            Err(_) => {
                tracing::warn!(
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(LedgerError::StoreUnavailable(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                )))
            }
        }
    }

    // ============================================================
    // Task catalog
    // ============================================================

    pub async fn define_task(
        &self,
        caller: &Identity,
        input: CreateTaskInput,
    ) -> Result<TaskDefinition> {
        require_admin(caller, "define tasks")?;
        self.run("define_task", move |core| core.catalog.define_task(input))
            .await
    }

    pub async fn update_task(
        &self,
        caller: &Identity,
        id: Uuid,
        input: UpdateTaskInput,
    ) -> Result<TaskDefinition> {
        require_admin(caller, "update tasks")?;
        self.run("update_task", move |core| core.catalog.update_task(id, input))
            .await
    }

    pub async fn activate_task(&self, caller: &Identity, id: Uuid) -> Result<TaskDefinition> {
        require_admin(caller, "activate tasks")?;
        self.run("activate_task", move |core| core.catalog.activate_task(id))
            .await
    }

    pub async fn deactivate_task(&self, caller: &Identity, id: Uuid) -> Result<TaskDefinition> {
        require_admin(caller, "deactivate tasks")?;
        self.run("deactivate_task", move |core| {
            core.catalog.deactivate_task(id)
        })
        .await
    }

    pub async fn get_task(&self, id: Uuid) -> Result<TaskDefinition> {
        self.run("get_task", move |core| core.catalog.get_task(id))
            .await
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<TaskDefinition>> {
        self.run("list_tasks", move |core| core.catalog.list_tasks(&filter))
            .await
    }

    pub async fn seed_defaults(&self, caller: &Identity) -> Result<Vec<TaskDefinition>> {
        require_admin(caller, "seed the catalog")?;
        self.run("seed_defaults", |core| core.catalog.seed_defaults())
            .await
    }

    // ============================================================
    // Ledger
    // ============================================================

    /// Award a task to the caller.
    ///
    /// Students get a dedupe key derived from the task and today's UTC date.
    /// Admins may pass any key, or none for a repeatable award.
    pub async fn award(&self, caller: &Identity, input: AwardInput) -> Result<AwardReceipt> {
        let caller = caller.clone();
        self.run("award", move |core| {
            if caller.is_admin() {
                return core.ledger.award(
                    &caller.user_id,
                    input.task_id,
                    input.dedupe_key.as_deref(),
                );
            }
            core.ledger.claim(
                &caller.user_id,
                input.task_id,
                input.subject.as_deref(),
                input.dedupe_key.as_deref(),
                Utc::now().date_naive(),
            )
        })
        .await
    }

    /// Award a task to another user, e.g. crediting a referrer on sign-up.
    pub async fn award_to(
        &self,
        caller: &Identity,
        user_id: &str,
        input: AwardInput,
    ) -> Result<AwardReceipt> {
        require_admin(caller, "award points to other users")?;
        let user_id = user_id.to_string();
        self.run("award_to", move |core| {
            core.ledger
                .award(&user_id, input.task_id, input.dedupe_key.as_deref())
        })
        .await
    }

    pub async fn reverse(
        &self,
        caller: &Identity,
        entry_id: EntryId,
        input: ReverseInput,
    ) -> Result<LedgerEntry> {
        require_admin(caller, "reverse ledger entries")?;
        self.run("reverse", move |core| {
            core.ledger.reverse(entry_id, &input.reason)
        })
        .await
    }

    pub async fn get_entry(&self, caller: &Identity, entry_id: EntryId) -> Result<LedgerEntry> {
        let entry = self
            .run("get_entry", move |core| core.ledger.get_entry(entry_id))
            .await?;
        // Hide other users' entries behind the same error as a missing one.
        if !caller.can_access(&entry.user_id) {
            return Err(LedgerError::EntryNotFound(entry_id));
        }
        Ok(entry)
    }

    pub async fn total_for(&self, caller: &Identity, user_id: &str) -> Result<i64> {
        require_access(caller, user_id)?;
        let user_id = user_id.to_string();
        self.run("total_for", move |core| core.ledger.total_for(&user_id))
            .await
    }

    pub async fn history_for(
        &self,
        caller: &Identity,
        user_id: &str,
        page: PageRequest,
    ) -> Result<HistoryPage> {
        require_access(caller, user_id)?;
        let user_id = user_id.to_string();
        self.run("history_for", move |core| {
            core.ledger.history_for(&user_id, page)
        })
        .await
    }

    // ============================================================
    // Leveling & ranking
    // ============================================================

    pub fn level_progress(&self, total: i64) -> LevelProgress {
        self.core.leaderboard.scale().progress(total)
    }

    pub async fn rank_all(
        &self,
        cohort: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<RankedUser>> {
        self.run("rank_all", move |core| {
            core.leaderboard.rank_all(cohort.as_deref(), limit)
        })
        .await
    }

    pub async fn summary_for(&self, caller: &Identity, user_id: &str) -> Result<UserPointsSummary> {
        require_access(caller, user_id)?;
        let user_id = user_id.to_string();
        self.run("summary_for", move |core| {
            core.leaderboard.summary_for(&user_id)
        })
        .await
    }

    // ============================================================
    // Profiles
    // ============================================================

    pub async fn upsert_profile(
        &self,
        caller: &Identity,
        user_id: &str,
        input: UpsertProfileInput,
    ) -> Result<UserProfile> {
        require_access(caller, user_id)?;
        let display_name = input.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(LedgerError::Validation(
                "display name is required".to_string(),
            ));
        }

        let now = Utc::now();
        let profile = UserProfile {
            user_id: user_id.to_string(),
            display_name,
            cohort: input
                .cohort
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            created_at: now,
            updated_at: now,
        };

        let user_id = user_id.to_string();
        self.run("upsert_profile", move |core| {
            core.store.upsert_profile(&profile)?;
            core.store
                .get_profile(&user_id)?
                .ok_or_else(|| LedgerError::Store(anyhow::anyhow!("profile vanished after upsert")))
        })
        .await
    }
}

fn require_admin(caller: &Identity, action: &str) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        tracing::warn!(
            user_id = %caller.user_id,
            role = caller.role.as_str(),
            "Denied: {}",
            action
        );
        Err(LedgerError::Forbidden(format!("only admins may {}", action)))
    }
}

fn require_access(caller: &Identity, user_id: &str) -> Result<()> {
    if caller.can_access(user_id) {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(format!(
            "cannot access another user's points ({})",
            user_id
        )))
    }
}
