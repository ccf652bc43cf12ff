//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "campaign_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                templates TEXT NOT NULL,
                source_campaign_id TEXT,
                total_contacts INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                skipped_count INTEGER NOT NULL DEFAULT 0,
                reply_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_activity_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_campaigns_status ON campaigns(status);

            CREATE TABLE IF NOT EXISTS enrollments (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                phone TEXT NOT NULL,
                contact TEXT NOT NULL,
                line_kind TEXT NOT NULL,
                enrolled_at TEXT NOT NULL,
                suppressed INTEGER NOT NULL DEFAULT 0,
                suppressed_at TEXT,
                UNIQUE (campaign_id, phone)
            );
            CREATE INDEX IF NOT EXISTS idx_enrollments_phone ON enrollments(phone);
            CREATE INDEX IF NOT EXISTS idx_enrollments_campaign ON enrollments(campaign_id);

            CREATE TABLE IF NOT EXISTS touch_deliveries (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                enrollment_id TEXT NOT NULL REFERENCES enrollments(id),
                touch_index INTEGER NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 1,
                day_offset INTEGER NOT NULL,
                message_template TEXT NOT NULL,
                scheduled_for TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                rendered_body TEXT,
                sent_at TEXT,
                provider_message_id TEXT,
                error TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE (enrollment_id, touch_index, attempt)
            );
            CREATE INDEX IF NOT EXISTS idx_deliveries_due ON touch_deliveries(state, scheduled_for);
            CREATE INDEX IF NOT EXISTS idx_deliveries_campaign ON touch_deliveries(campaign_id);
        "#,
    },
    Migration {
        version: 2,
        name: "inbound_replies",
        sql: r#"
            CREATE TABLE IF NOT EXISTS inbound_replies (
                id TEXT PRIMARY KEY,
                from_phone TEXT NOT NULL,
                body TEXT NOT NULL,
                received_at TEXT NOT NULL,
                campaign_id TEXT,
                enrollment_id TEXT,
                outcome TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_inbound_phone ON inbound_replies(from_phone);
            CREATE INDEX IF NOT EXISTS idx_inbound_campaign ON inbound_replies(campaign_id);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
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

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
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

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "_migrations",
            "campaigns",
            "enrollments",
            "touch_deliveries",
            "inbound_replies",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_run_on_a_spawned_task() {
        let conn = test_conn().await;
        tokio::spawn(async move { run_migrations(&conn).await })
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row1 = rows.next().await.unwrap().unwrap();
        assert_eq!(row1.get::<i64>(0).unwrap(), 1);
        assert_eq!(row1.get::<String>(1).unwrap(), "campaign_schema");

        let row2 = rows.next().await.unwrap().unwrap();
        assert_eq!(row2.get::<i64>(0).unwrap(), 2);
        assert_eq!(row2.get::<String>(1).unwrap(), "inbound_replies");
    }

    #[tokio::test]
    async fn delivery_attempts_are_unique_per_touch() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        conn.execute_batch(
            "INSERT INTO campaigns (id, name, templates, created_at, updated_at)
                VALUES ('c1', 'c', '[]', '2024-01-01', '2024-01-01');
             INSERT INTO enrollments (id, campaign_id, phone, contact, line_kind, enrolled_at)
                VALUES ('e1', 'c1', '+14155550100', '{}', 'mobile', '2024-01-01');
             INSERT INTO touch_deliveries (id, campaign_id, enrollment_id, touch_index, attempt, day_offset, message_template, scheduled_for, updated_at)
                VALUES ('d1', 'c1', 'e1', 0, 1, 1, 'hi', '2024-01-02', '2024-01-01');",
        )
        .await
        .unwrap();

        let dup = conn
            .execute(
                "INSERT INTO touch_deliveries (id, campaign_id, enrollment_id, touch_index, attempt, day_offset, message_template, scheduled_for, updated_at)
                 VALUES ('d2', 'c1', 'e1', 0, 1, 1, 'hi', '2024-01-02', '2024-01-01')",
                (),
            )
            .await;
        assert!(dup.is_err());
    }
}
