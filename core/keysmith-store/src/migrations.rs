//! Schema migrations.
//!
//! Migrations run on open, in order, each in its own transaction. The
//! database records the last applied version in `PRAGMA user_version`.

use crate::error::StoreResult;
use rusqlite::Connection;
use tracing::info;

/// One schema step.
pub struct Migration {
    /// Sequential, starting from 1.
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations in order. Append new ones to the end.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "codes and audit rows",
        sql: BASELINE,
    },
    Migration {
        version: 2,
        description: "code batches",
        sql: CODE_BATCHES,
    },
];

// Idempotent so that files created before versioning upgrade cleanly.
const BASELINE: &str = "
    CREATE TABLE IF NOT EXISTS activation_codes (
        id TEXT PRIMARY KEY,
        code_hash TEXT NOT NULL UNIQUE,
        product_id TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        version INTEGER NOT NULL,
        body TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_codes_product ON activation_codes (product_id);
    CREATE INDEX IF NOT EXISTS idx_codes_expiry ON activation_codes (status, expires_at);

    CREATE TABLE IF NOT EXISTS activation_logs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        code_id TEXT NOT NULL,
        action TEXT NOT NULL,
        success INTEGER NOT NULL,
        is_suspicious INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        body TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_activation_logs_code ON activation_logs (code_id);

    CREATE TABLE IF NOT EXISTS revocation_logs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        code_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        body TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_revocation_logs_code ON revocation_logs (code_id);
";

const CODE_BATCHES: &str = "
    ALTER TABLE activation_codes ADD COLUMN batch_id TEXT;

    CREATE INDEX IF NOT EXISTS idx_codes_batch ON activation_codes (batch_id);

    CREATE TABLE IF NOT EXISTS code_batches (
        id TEXT PRIMARY KEY,
        product_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        body TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_batches_product ON code_batches (product_id);
";

/// Current schema version of the database.
pub fn schema_version(conn: &Connection) -> StoreResult<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Applies every migration newer than the recorded version.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    let current = schema_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        info!(
            version = migration.version,
            description = migration.description,
            "Applied store migration"
        );
    }
    Ok(())
}
