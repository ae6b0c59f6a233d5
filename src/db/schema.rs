use anyhow::{Context, Result};
use rusqlite::Connection;

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001",
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: "002",
        name: "user_profiles",
        sql: include_str!("migrations/002_user_profiles.sql"),
    },
];

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .context("Failed to create schema_migrations table")?;

    let applied = get_applied_migrations(conn)?;

    for migration in MIGRATIONS {
        if !applied.iter().any(|v| v == migration.version) {
            apply_migration(conn, migration)?;
        }
    }

    Ok(())
}

fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(versions)
}

fn mark_migration_applied(conn: &Connection, version: &str, name: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
        (version, name, &now),
    )?;
    Ok(())
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    tracing::info!(
        "Applying migration {}: {}",
        migration.version,
        migration.name
    );

    conn.execute_batch(&format!("BEGIN TRANSACTION; {} COMMIT;", migration.sql))
        .with_context(|| {
            format!(
                "Failed to apply migration {}: {}",
                migration.version, migration.name
            )
        })?;

    mark_migration_applied(conn, migration.version, migration.name)?;

    tracing::info!("Migration {} applied successfully", migration.version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        assert!(table_exists(&conn, "tasks"));
        assert!(table_exists(&conn, "ledger_entries"));
        assert!(table_exists(&conn, "user_profiles"));

        let versions = get_applied_migrations(&conn).unwrap();
        assert_eq!(versions, vec!["001", "002"]);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions = get_applied_migrations(&conn).unwrap();
        assert_eq!(versions, vec!["001", "002"]);
    }

    #[test]
    fn test_ledger_rows_cannot_be_rewritten() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO tasks (id, position, title, description, category, points, active, created_at, updated_at)
             VALUES ('t1', 1, 'Daily Sign-In', 'Check in once per day', 'daily', 10, 1, 'now', 'now');
             INSERT INTO ledger_entries (user_id, task_id, points, created_at)
             VALUES ('1', 't1', 10, 'now');",
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE ledger_entries SET points = 1000", [])
            .is_err());
        assert!(conn.execute("DELETE FROM ledger_entries", []).is_err());
        assert!(conn.execute("DELETE FROM tasks", []).is_err());
    }
}
