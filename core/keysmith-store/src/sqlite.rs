//! SQLite-backed [`CodeStore`].

use crate::error::{StoreError, StoreResult};
use crate::migrations::run_migrations;
use chrono::{DateTime, Utc};
use keysmith_license::{
    ActivationCode, ActivationLog, AuditRecord, AuditTrail, CodeBatch, CodeStatus, CodeStore,
    LicenseError, LicenseResult, RevocationLog, StoreConfig, Transition,
};
use keysmith_types::{BatchId, CodeId, ProductId};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const SELECT_BY_ID: &str = "SELECT body FROM activation_codes WHERE id = ?1";
const SELECT_BY_HASH: &str = "SELECT body FROM activation_codes WHERE code_hash = ?1";

/// Activation code store backed by a SQLite file.
///
/// Within a process the connection is shared behind a mutex. Across
/// processes, writers serialize on SQLite's write lock; a writer that waits
/// longer than the busy timeout gets [`LicenseError::ConcurrencyConflict`].
pub struct SqliteCodeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCodeStore {
    /// Opens (or creates) a store at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        let store = Self::from_connection(conn)?;
        info!(
            path = %path.display(),
            journal_mode = %journal_mode,
            "Opened activation code store"
        );
        Ok(store)
    }

    /// Opens the store named by the `[store]` config section.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        Self::open(
            &config.database_path,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of stored codes.
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM activation_codes", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Lists codes, oldest first, optionally filtered by product and status.
    pub fn list_codes(
        &self,
        product_id: Option<&ProductId>,
        status: Option<CodeStatus>,
    ) -> StoreResult<Vec<ActivationCode>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM activation_codes
             WHERE (?1 IS NULL OR product_id = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(
            params![
                product_id.map(ToString::to_string),
                status.map(|s| s.as_str())
            ],
            |row| row.get::<_, String>(0),
        )?;
        let bodies = rows.collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| decode(b, "activation code")).collect()
    }
}

// ── Row helpers ──────────────────────────────────────────────────

fn decode<T: DeserializeOwned>(body: &str, what: &str) -> StoreResult<T> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt(format!("{what}: {e}")))
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn query_code(conn: &Connection, sql: &str, key: &str) -> StoreResult<Option<ActivationCode>> {
    let body: Option<String> = conn
        .query_row(sql, params![key], |row| row.get(0))
        .optional()?;
    body.map(|b| decode(&b, "activation code")).transpose()
}

fn insert_code(conn: &Connection, code: &ActivationCode) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO activation_codes
            (id, code_hash, product_id, status, created_at, expires_at, version, body, batch_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            code.id().to_string(),
            code.code_hash(),
            code.product_id().to_string(),
            code.status().as_str(),
            millis(code.created_at()),
            millis(code.expires_at()),
            code.version() as i64,
            serde_json::to_string(code)?,
            code.batch_id().map(|b| b.to_string()),
        ],
    )?;
    Ok(())
}

/// Inserts `codes` in one IMMEDIATE transaction, with `batch` when given.
fn insert_codes(
    conn: &mut Connection,
    batch: Option<&CodeBatch>,
    codes: &[ActivationCode],
) -> LicenseResult<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(StoreError::from)?;
    if let Some(batch) = batch {
        tx.execute(
            "INSERT INTO code_batches (id, product_id, created_at, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                batch.id.to_string(),
                batch.product_id.to_string(),
                millis(batch.created_at),
                serde_json::to_string(batch).map_err(StoreError::from)?,
            ],
        )
        .map_err(StoreError::from)?;
    }
    for code in codes {
        insert_code(&tx, code).map_err(|e| {
            if e.is_constraint_violation() {
                LicenseError::DuplicateCode
            } else {
                e.into()
            }
        })?;
    }
    tx.commit().map_err(StoreError::from)?;
    Ok(())
}

fn query_bodies<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    key: Option<String>,
    what: &str,
) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    let bodies = rows.collect::<Result<Vec<_>, _>>()?;
    bodies.iter().map(|b| decode(b, what)).collect()
}

/// Writes `code` back if the stored version is still `expected_version`.
fn update_code(conn: &Connection, code: &ActivationCode, expected_version: u64) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE activation_codes
         SET status = ?1, expires_at = ?2, version = ?3, body = ?4
         WHERE id = ?5 AND version = ?6",
        params![
            code.status().as_str(),
            millis(code.expires_at()),
            code.version() as i64,
            serde_json::to_string(code)?,
            code.id().to_string(),
            expected_version as i64,
        ],
    )?;
    Ok(updated == 1)
}

fn insert_audit(conn: &Connection, audit: &AuditTrail) -> StoreResult<()> {
    for record in audit.iter() {
        match record {
            AuditRecord::Activation(log) => conn.execute(
                "INSERT INTO activation_logs
                    (id, code_id, action, success, is_suspicious, created_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    log.id.to_string(),
                    log.code_id.to_string(),
                    log.action.as_str(),
                    log.success,
                    log.is_suspicious,
                    millis(log.created_at),
                    serde_json::to_string(log)?,
                ],
            )?,
            AuditRecord::Revocation(log) => conn.execute(
                "INSERT INTO revocation_logs (id, code_id, created_at, body)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    log.id.to_string(),
                    log.code_id.to_string(),
                    millis(log.created_at),
                    serde_json::to_string(log)?,
                ],
            )?,
        };
    }
    Ok(())
}

// ── CodeStore ────────────────────────────────────────────────────

impl CodeStore for SqliteCodeStore {
    fn insert(&self, code: &ActivationCode) -> LicenseResult<()> {
        self.insert_batch(std::slice::from_ref(code))
    }

    fn insert_batch(&self, codes: &[ActivationCode]) -> LicenseResult<()> {
        let mut conn = self.lock()?;
        insert_codes(&mut conn, None, codes)?;
        debug!(count = codes.len(), "Inserted activation codes");
        Ok(())
    }

    fn insert_code_batch(&self, batch: &CodeBatch, codes: &[ActivationCode]) -> LicenseResult<()> {
        let mut conn = self.lock()?;
        insert_codes(&mut conn, Some(batch), codes)?;
        debug!(batch_id = %batch.id, count = codes.len(), "Inserted code batch");
        Ok(())
    }

    fn get_batch(&self, id: &BatchId) -> LicenseResult<Option<CodeBatch>> {
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM code_batches WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(body.map(|b| decode(&b, "code batch")).transpose()?)
    }

    fn list_batches(&self, product_id: Option<&ProductId>) -> LicenseResult<Vec<CodeBatch>> {
        let conn = self.lock()?;
        Ok(query_bodies(
            &conn,
            "SELECT body FROM code_batches
             WHERE ?1 IS NULL OR product_id = ?1
             ORDER BY created_at, id",
            product_id.map(ToString::to_string),
            "code batch",
        )?)
    }

    fn batch_codes(&self, id: &BatchId) -> LicenseResult<Vec<ActivationCode>> {
        let conn = self.lock()?;
        Ok(query_bodies(
            &conn,
            "SELECT body FROM activation_codes WHERE batch_id = ?1 ORDER BY id",
            Some(id.to_string()),
            "activation code",
        )?)
    }

    fn get(&self, id: &CodeId) -> LicenseResult<Option<ActivationCode>> {
        let conn = self.lock()?;
        Ok(query_code(&conn, SELECT_BY_ID, &id.to_string())?)
    }

    fn find_by_hash(&self, code_hash: &str) -> LicenseResult<Option<ActivationCode>> {
        let conn = self.lock()?;
        Ok(query_code(&conn, SELECT_BY_HASH, code_hash)?)
    }

    fn transition<T, F>(&self, id: &CodeId, f: F) -> LicenseResult<Transition<T>>
    where
        F: FnOnce(&mut ActivationCode, &mut AuditTrail) -> LicenseResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let original =
            query_code(&tx, SELECT_BY_ID, &id.to_string())?.ok_or(LicenseError::CodeNotFound)?;
        let mut working = original.clone();
        let mut audit = AuditTrail::new();
        let result = f(&mut working, &mut audit);

        if result.is_ok() && working != original {
            working.bump_version();
            if !update_code(&tx, &working, original.version())? {
                warn!(code_id = %id, "Activation code changed during transition");
                return Err(LicenseError::ConcurrencyConflict);
            }
        }
        insert_audit(&tx, &audit)?;
        tx.commit().map_err(StoreError::from)?;

        debug!(
            code_id = %id,
            version = working.version(),
            audit_rows = audit.len(),
            "Committed transition"
        );
        Ok(Transition { result, audit })
    }

    fn append_audit(&self, audit: &AuditTrail) -> LicenseResult<()> {
        if audit.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        insert_audit(&tx, audit)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    fn activation_logs(&self, id: &CodeId) -> LicenseResult<Vec<ActivationLog>> {
        let conn = self.lock()?;
        Ok(query_bodies(
            &conn,
            "SELECT body FROM activation_logs WHERE code_id = ?1 ORDER BY seq",
            Some(id.to_string()),
            "activation log",
        )?)
    }

    fn revocation_logs(&self, id: &CodeId) -> LicenseResult<Vec<RevocationLog>> {
        let conn = self.lock()?;
        Ok(query_bodies(
            &conn,
            "SELECT body FROM revocation_logs WHERE code_id = ?1 ORDER BY seq",
            Some(id.to_string()),
            "revocation log",
        )?)
    }

    fn overdue(&self, now: DateTime<Utc>) -> LicenseResult<Vec<CodeId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id FROM activation_codes
                 WHERE status IN ('GENERATED', 'ACTIVATED', 'SUSPENDED') AND expires_at < ?1
                 ORDER BY id",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![millis(now)], |row| row.get::<_, String>(0))
            .map_err(StoreError::from)?;
        let ids = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(ids
            .iter()
            .map(|s| {
                CodeId::parse(s).map_err(|e| StoreError::Corrupt(format!("code id {s}: {e}")))
            })
            .collect::<StoreResult<Vec<_>>>()?)
    }
}
