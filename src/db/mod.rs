mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::*;
use crate::store::{AppendOutcome, Store};

const TASK_COLUMNS: &str =
    "id, title, description, category, points, active, created_at, updated_at";

const ENTRY_COLUMNS: &str =
    "id, user_id, task_id, points, dedupe_key, reverses, reason, created_at";

/// SQLite-backed [`Store`].
///
/// A single connection sits behind a mutex, which makes this process the
/// single writer. Uniqueness of dedupe keys and reversals is also enforced by
/// the schema, so other processes sharing the file cannot break it.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// How long SQLite waits on a locked database before reporting busy.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn()?.busy_timeout(timeout)?;
        Ok(())
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        schema::run_migrations(&conn)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("database lock poisoned")))
    }
}

impl Store for Database {
    // ============================================================
    // Task operations
    // ============================================================

    fn insert_task(&self, task: &TaskDefinition) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks (id, position, title, description, category, points, active, created_at, updated_at)
             VALUES (?, (SELECT COALESCE(MAX(position), 0) + 1 FROM tasks), ?, ?, ?, ?, ?, ?, ?)",
            (
                task.id.to_string(),
                &task.title,
                &task.description,
                task.category.as_str(),
                task.points,
                task.active,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    fn get_task(&self, id: Uuid) -> StoreResult<Option<TaskDefinition>> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"),
                [id.to_string()],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn patch_task(
        &self,
        id: Uuid,
        changes: &UpdateTaskInput,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Option<TaskDefinition>> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE tasks SET
                 title = COALESCE(?, title),
                 description = COALESCE(?, description),
                 category = COALESCE(?, category),
                 points = COALESCE(?, points),
                 active = COALESCE(?, active),
                 updated_at = ?
             WHERE id = ?",
            (
                changes.title.as_deref(),
                changes.description.as_deref(),
                changes.category.map(|c| c.as_str()),
                changes.points,
                changes.active,
                updated_at.to_rfc3339(),
                id.to_string(),
            ),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        // Re-read under the same guard so the result is what was written.
        let task = conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"),
            [id.to_string()],
            task_from_row,
        )?;
        Ok(Some(task))
    }

    fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<TaskDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE (?1 IS NULL OR category = ?1) AND (?2 = 0 OR active = 1)
             ORDER BY position"
        ))?;

        let tasks = stmt
            .query_map(
                (filter.category.map(|c| c.as_str()), filter.active_only),
                task_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tasks)
    }

    fn count_tasks(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ============================================================
    // Ledger operations
    // ============================================================

    fn append_entry(&self, entry: NewEntry) -> StoreResult<AppendOutcome> {
        let conn = self.conn()?;

        // No conflict target: a clash on either dedupe_key or reverses is a no-op.
        let rows = conn.execute(
            "INSERT INTO ledger_entries (user_id, task_id, points, dedupe_key, reverses, reason, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
            (
                &entry.user_id,
                entry.task_id.to_string(),
                entry.points,
                &entry.dedupe_key,
                entry.reverses,
                &entry.reason,
                entry.created_at.to_rfc3339(),
            ),
        )?;

        if rows == 1 {
            let id = conn.last_insert_rowid();
            return Ok(AppendOutcome::Recorded(LedgerEntry {
                id,
                user_id: entry.user_id,
                task_id: entry.task_id,
                points: entry.points,
                dedupe_key: entry.dedupe_key,
                reverses: entry.reverses,
                reason: entry.reason,
                created_at: entry.created_at,
            }));
        }

        let winner = conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries
                     WHERE (?1 IS NOT NULL AND dedupe_key = ?1) OR (?2 IS NOT NULL AND reverses = ?2)
                     ORDER BY id LIMIT 1"
                ),
                (&entry.dedupe_key, entry.reverses),
                entry_from_row,
            )
            .optional()?
            .ok_or_else(|| {
                StoreError::Backend(anyhow::anyhow!(
                    "ledger insert ignored without a conflicting entry"
                ))
            })?;

        Ok(AppendOutcome::Existing(winner))
    }

    fn get_entry(&self, id: EntryId) -> StoreResult<Option<LedgerEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?"),
                [id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_by_dedupe_key(&self, key: &str) -> StoreResult<Option<LedgerEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE dedupe_key = ?"),
                [key],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_reversal(&self, id: EntryId) -> StoreResult<Option<LedgerEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE reverses = ?"),
                [id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn total_for(&self, user_id: &str) -> StoreResult<i64> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(points), 0) FROM ledger_entries WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn entries_for(
        &self,
        user_id: &str,
        before: Option<EntryId>,
        limit: usize,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE user_id = ?1 AND (?2 IS NULL OR id < ?2)
             ORDER BY id DESC LIMIT ?3"
        ))?;

        let entries = stmt
            .query_map((user_id, before, limit as i64), entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn standings(&self, cohort: Option<&str>) -> StoreResult<Vec<UserTotal>> {
        let conn = self.conn()?;
        // One statement, so every user's total comes from the same snapshot.
        let mut stmt = conn.prepare(
            "WITH running AS (
                SELECT user_id, id,
                       SUM(points) OVER (
                           PARTITION BY user_id ORDER BY id ROWS UNBOUNDED PRECEDING
                       ) AS running_total
                FROM ledger_entries
             ),
             totals AS (
                SELECT user_id, SUM(points) AS total FROM ledger_entries GROUP BY user_id
             ),
             reached AS (
                SELECT t.user_id, t.total, MIN(r.id) AS reached_seq
                FROM totals t
                JOIN running r ON r.user_id = t.user_id AND r.running_total = t.total
                GROUP BY t.user_id, t.total
             )
             SELECT reached.user_id, reached.total, reached.reached_seq, e.created_at,
                    p.display_name, p.cohort
             FROM reached
             JOIN ledger_entries e ON e.id = reached.reached_seq
             LEFT JOIN user_profiles p ON p.user_id = reached.user_id
             WHERE ?1 IS NULL OR p.cohort = ?1
             ORDER BY reached.reached_seq",
        )?;

        let totals = stmt
            .query_map([cohort], |row| {
                Ok(UserTotal {
                    user_id: row.get(0)?,
                    total: row.get(1)?,
                    reached_seq: row.get(2)?,
                    reached_at: parse_datetime(row.get::<_, String>(3)?),
                    display_name: row.get(4)?,
                    cohort: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(totals)
    }

    // ============================================================
    // Profile operations
    // ============================================================

    fn upsert_profile(&self, profile: &UserProfile) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_profiles (user_id, display_name, cohort, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                cohort = excluded.cohort,
                updated_at = excluded.updated_at",
            (
                &profile.user_id,
                &profile.display_name,
                &profile.cohort,
                profile.created_at.to_rfc3339(),
                profile.updated_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    fn get_profile(&self, user_id: &str) -> StoreResult<Option<UserProfile>> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                "SELECT user_id, display_name, cohort, created_at, updated_at
                 FROM user_profiles WHERE user_id = ?",
                [user_id],
                |row| {
                    Ok(UserProfile {
                        user_id: row.get(0)?,
                        display_name: row.get(1)?,
                        cohort: row.get(2)?,
                        created_at: parse_datetime(row.get::<_, String>(3)?),
                        updated_at: parse_datetime(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

/// `<data dir>/levelup.db` for the current platform.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "levelup")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("levelup.db"))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskDefinition> {
    Ok(TaskDefinition {
        id: parse_uuid(row.get::<_, String>(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        category: TaskCategory::from_str(&row.get::<_, String>(3)?)
            .unwrap_or(TaskCategory::Other),
        points: row.get(4)?,
        active: row.get(5)?,
        created_at: parse_datetime(row.get::<_, String>(6)?),
        updated_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: parse_uuid(row.get::<_, String>(2)?),
        points: row.get(3)?,
        dedupe_key: row.get(4)?,
        reverses: row.get(5)?,
        reason: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
