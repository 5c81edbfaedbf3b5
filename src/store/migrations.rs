//! Version-tracked migrations for the audit database.
//!
//! `run_migrations()` reads the highest applied version from `_migrations`
//! and applies newer steps in order.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "moderation_records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS moderation_records (
                id TEXT PRIMARY KEY,
                template_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                route TEXT NOT NULL,
                approved INTEGER NOT NULL,
                final_decision TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                votes TEXT NOT NULL,
                verdicts TEXT NOT NULL,
                cancelled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_moderation_records_template
                ON moderation_records(template_id, created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "delivery_tracking",
        sql: r#"
            ALTER TABLE moderation_records ADD COLUMN job_id TEXT;
            ALTER TABLE moderation_records ADD COLUMN job_status TEXT;
            ALTER TABLE moderation_records ADD COLUMN cost_usd TEXT NOT NULL DEFAULT '0';
            CREATE INDEX IF NOT EXISTS idx_moderation_records_job
                ON moderation_records(job_id);
        "#,
    },
];

/// Apply pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
