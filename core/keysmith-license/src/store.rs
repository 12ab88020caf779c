//! Persistence port for activation codes and their audit rows.

use crate::batch::CodeBatch;
use crate::code::{ActivationCode, CodeStatus};
use crate::error::{LicenseError, LicenseResult};
use crate::log::{ActivationLog, AuditRecord, AuditTrail, RevocationLog};
use chrono::{DateTime, Utc};
use keysmith_types::{BatchId, CodeId, ProductId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Result of a committed transition: the business result of the closure
/// plus the audit rows that were persisted with it.
#[derive(Debug)]
pub struct Transition<T> {
    pub result: LicenseResult<T>,
    pub audit: AuditTrail,
}

/// Storage for activation codes.
///
/// Implementations must make [`CodeStore::transition`] atomic per code:
/// concurrent transitions on the same code are serialized, and the entity
/// and audit rows commit together.
pub trait CodeStore: Send + Sync {
    /// Inserts a new code. Fails with [`LicenseError::DuplicateCode`] if the
    /// hash is taken.
    fn insert(&self, code: &ActivationCode) -> LicenseResult<()>;

    /// Inserts several codes; all or none are stored.
    fn insert_batch(&self, codes: &[ActivationCode]) -> LicenseResult<()>;

    /// Stores a batch record together with its codes; all or none.
    fn insert_code_batch(&self, batch: &CodeBatch, codes: &[ActivationCode]) -> LicenseResult<()>;

    fn get_batch(&self, id: &BatchId) -> LicenseResult<Option<CodeBatch>>;

    /// Batch records, oldest first, optionally for one product.
    fn list_batches(&self, product_id: Option<&ProductId>) -> LicenseResult<Vec<CodeBatch>>;

    /// Codes issued in batch `id`.
    fn batch_codes(&self, id: &BatchId) -> LicenseResult<Vec<ActivationCode>>;

    fn get(&self, id: &CodeId) -> LicenseResult<Option<ActivationCode>>;

    fn find_by_hash(&self, code_hash: &str) -> LicenseResult<Option<ActivationCode>>;

    /// Locks the code, runs `f` on it and persists the outcome.
    ///
    /// If `f` returns `Ok`, the modified entity (when changed) and the audit
    /// rows commit together. If `f` returns `Err`, the entity is left as it
    /// was but the audit rows (failed attempts) are still appended. The
    /// outer `Err` is reserved for lookup and storage failures.
    fn transition<T, F>(&self, id: &CodeId, f: F) -> LicenseResult<Transition<T>>
    where
        F: FnOnce(&mut ActivationCode, &mut AuditTrail) -> LicenseResult<T>;

    /// Appends audit rows outside of a transition.
    fn append_audit(&self, audit: &AuditTrail) -> LicenseResult<()>;

    fn activation_logs(&self, id: &CodeId) -> LicenseResult<Vec<ActivationLog>>;

    fn revocation_logs(&self, id: &CodeId) -> LicenseResult<Vec<RevocationLog>>;

    /// Codes still in a live state whose expiry is before `now`.
    fn overdue(&self, now: DateTime<Utc>) -> LicenseResult<Vec<CodeId>>;
}

#[derive(Default)]
struct MemoryState {
    codes: HashMap<CodeId, ActivationCode>,
    by_hash: HashMap<String, CodeId>,
    batches: Vec<CodeBatch>,
    audit: Vec<AuditRecord>,
}

/// In-process [`CodeStore`]; a single lock serializes all writers.
#[derive(Default)]
pub struct MemoryCodeStore {
    state: Mutex<MemoryState>,
}

impl MemoryState {
    fn insert_codes(&mut self, codes: &[ActivationCode]) -> LicenseResult<()> {
        let mut seen = std::collections::HashSet::new();
        for code in codes {
            if self.by_hash.contains_key(code.code_hash()) || !seen.insert(code.code_hash()) {
                return Err(LicenseError::DuplicateCode);
            }
        }
        for code in codes {
            self.by_hash.insert(code.code_hash().to_string(), code.id());
            self.codes.insert(code.id(), code.clone());
        }
        Ok(())
    }
}

impl MemoryCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored codes.
    pub fn len(&self) -> LicenseResult<usize> {
        Ok(self.lock()?.codes.len())
    }

    pub fn is_empty(&self) -> LicenseResult<bool> {
        Ok(self.lock()?.codes.is_empty())
    }

    fn lock(&self) -> LicenseResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| LicenseError::Storage("memory store lock poisoned".to_string()))
    }
}

impl CodeStore for MemoryCodeStore {
    fn insert(&self, code: &ActivationCode) -> LicenseResult<()> {
        self.insert_batch(std::slice::from_ref(code))
    }

    fn insert_batch(&self, codes: &[ActivationCode]) -> LicenseResult<()> {
        let mut state = self.lock()?;
        state.insert_codes(codes)
    }

    fn insert_code_batch(&self, batch: &CodeBatch, codes: &[ActivationCode]) -> LicenseResult<()> {
        let mut state = self.lock()?;
        if state.batches.iter().any(|b| b.id == batch.id) {
            return Err(LicenseError::Storage(format!("batch {} already exists", batch.id)));
        }
        state.insert_codes(codes)?;
        state.batches.push(batch.clone());
        Ok(())
    }

    fn get_batch(&self, id: &BatchId) -> LicenseResult<Option<CodeBatch>> {
        Ok(self.lock()?.batches.iter().find(|b| b.id == *id).cloned())
    }

    fn list_batches(&self, product_id: Option<&ProductId>) -> LicenseResult<Vec<CodeBatch>> {
        Ok(self
            .lock()?
            .batches
            .iter()
            .filter(|b| product_id.is_none_or(|p| b.product_id == *p))
            .cloned()
            .collect())
    }

    fn batch_codes(&self, id: &BatchId) -> LicenseResult<Vec<ActivationCode>> {
        let mut codes: Vec<ActivationCode> = self
            .lock()?
            .codes
            .values()
            .filter(|c| c.batch_id() == Some(*id))
            .cloned()
            .collect();
        codes.sort_by_key(ActivationCode::id);
        Ok(codes)
    }

    fn get(&self, id: &CodeId) -> LicenseResult<Option<ActivationCode>> {
        Ok(self.lock()?.codes.get(id).cloned())
    }

    fn find_by_hash(&self, code_hash: &str) -> LicenseResult<Option<ActivationCode>> {
        let state = self.lock()?;
        Ok(state
            .by_hash
            .get(code_hash)
            .and_then(|id| state.codes.get(id))
            .cloned())
    }

    fn transition<T, F>(&self, id: &CodeId, f: F) -> LicenseResult<Transition<T>>
    where
        F: FnOnce(&mut ActivationCode, &mut AuditTrail) -> LicenseResult<T>,
    {
        let mut state = self.lock()?;
        let original = state.codes.get(id).ok_or(LicenseError::CodeNotFound)?;

        let mut working = original.clone();
        let mut audit = AuditTrail::new();
        let result = f(&mut working, &mut audit);

        if result.is_ok() && &working != original {
            working.bump_version();
            state.codes.insert(*id, working);
        }
        state.audit.extend(audit.iter().cloned());

        Ok(Transition { result, audit })
    }

    fn append_audit(&self, audit: &AuditTrail) -> LicenseResult<()> {
        self.lock()?.audit.extend(audit.iter().cloned());
        Ok(())
    }

    fn activation_logs(&self, id: &CodeId) -> LicenseResult<Vec<ActivationLog>> {
        Ok(self
            .lock()?
            .audit
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Activation(log) if log.code_id == *id => Some(log.clone()),
                _ => None,
            })
            .collect())
    }

    fn revocation_logs(&self, id: &CodeId) -> LicenseResult<Vec<RevocationLog>> {
        Ok(self
            .lock()?
            .audit
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Revocation(log) if log.code_id == *id => Some(log.clone()),
                _ => None,
            })
            .collect())
    }

    fn overdue(&self, now: DateTime<Utc>) -> LicenseResult<Vec<CodeId>> {
        let state = self.lock()?;
        let mut ids: Vec<CodeId> = state
            .codes
            .values()
            .filter(|c| {
                matches!(
                    c.status(),
                    CodeStatus::Generated | CodeStatus::Activated | CodeStatus::Suspended
                ) && c.expires_at() < now
            })
            .map(ActivationCode::id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
