//! SQLite schema migrations
//!
//! Versions are applied in order inside one transaction each and recorded in
//! `schema_migrations`.

use loopwright_core::StoreError;
use rusqlite::{Connection, params};

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub struct MigrationEngine {
    migrations: Vec<Migration>,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self {
            migrations: Self::default_migrations(),
        }
    }

    fn default_migrations() -> Vec<Migration> {
        vec![
            Migration {
                version: 1,
                description: "Create episode and pattern tables",
                up: r#"
                    CREATE TABLE IF NOT EXISTS episodes (
                        seq INTEGER PRIMARY KEY AUTOINCREMENT,
                        run_id TEXT NOT NULL UNIQUE,
                        worker TEXT NOT NULL,
                        success INTEGER NOT NULL,
                        started_at TEXT NOT NULL,
                        body TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_episodes_worker_success
                        ON episodes(worker, success, seq);

                    CREATE TABLE IF NOT EXISTS patterns (
                        seq INTEGER PRIMARY KEY AUTOINCREMENT,
                        id TEXT NOT NULL UNIQUE,
                        worker TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        confidence REAL NOT NULL,
                        body TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_patterns_confidence
                        ON patterns(worker, confidence);
                "#,
            },
            Migration {
                version: 2,
                description: "Create mailbox, approval and span tables",
                up: r#"
                    CREATE TABLE IF NOT EXISTS messages (
                        seq INTEGER PRIMARY KEY AUTOINCREMENT,
                        id TEXT NOT NULL UNIQUE,
                        from_agent TEXT NOT NULL,
                        to_agent TEXT NOT NULL,
                        message_type TEXT NOT NULL,
                        priority INTEGER NOT NULL,
                        payload TEXT NOT NULL,
                        status TEXT NOT NULL,
                        correlation_id TEXT,
                        created_at TEXT NOT NULL,
                        processed_at TEXT,
                        response TEXT
                    );
                    CREATE INDEX IF NOT EXISTS idx_messages_recipient_status
                        ON messages(to_agent, status, priority DESC, created_at, seq);

                    CREATE TABLE IF NOT EXISTS approvals (
                        seq INTEGER PRIMARY KEY AUTOINCREMENT,
                        id TEXT NOT NULL UNIQUE,
                        worker TEXT NOT NULL,
                        status TEXT NOT NULL,
                        body TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(status, worker);

                    CREATE TABLE IF NOT EXISTS spans (
                        seq INTEGER PRIMARY KEY AUTOINCREMENT,
                        run_id TEXT NOT NULL,
                        span_id INTEGER NOT NULL,
                        parent_id INTEGER,
                        name TEXT NOT NULL,
                        body TEXT NOT NULL,
                        UNIQUE(run_id, span_id)
                    );
                "#,
            },
        ]
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.iter().map(|m| m.version).max().unwrap_or(0)
    }

    pub fn current_version(&self, conn: &Connection) -> Result<u32, StoreError> {
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Backend(format!("Failed to read schema version: {e}")))
    }

    /// Apply every migration newer than the recorded version
    pub fn migrate(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            reason: format!("Failed to create migrations table: {e}"),
        })?;

        let current = self.current_version(conn)?;
        for migration in self.migrations.iter().filter(|m| m.version > current) {
            self.apply(conn, migration)?;
        }
        Ok(())
    }

    fn apply(&self, conn: &Connection, migration: &Migration) -> Result<(), StoreError> {
        let fail = |reason: String| StoreError::Migration {
            version: migration.version,
            reason,
        };

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| fail(format!("Failed to start transaction: {e}")))?;
        tx.execute_batch(migration.up)
            .map_err(|e| fail(e.to_string()))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )
        .map_err(|e| fail(format!("Failed to record migration: {e}")))?;
        tx.commit()
            .map_err(|e| fail(format!("Failed to commit: {e}")))?;

        tracing::debug!(version = migration.version, description = migration.description, "Applied migration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let engine = MigrationEngine::new();

        engine.migrate(&conn).unwrap();
        assert_eq!(engine.current_version(&conn).unwrap(), engine.latest_version());

        engine.migrate(&conn).unwrap();
        let applied: u32 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 2);
    }
}
