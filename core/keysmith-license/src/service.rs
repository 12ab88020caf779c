//! Activation service: issuance, activation, administration and license
//! files on top of a [`CodeStore`].

use crate::batch::{BatchUsage, CodeBatch};
use crate::code::{ActivationCode, CodeStatus, CodeTerms, LicenseType};
use crate::config::{IssuanceConfig, LicensingConfig};
use crate::device::DeviceInfo;
use crate::error::{LicenseError, LicenseResult};
use crate::feature::FeatureCatalog;
use crate::keygen::{KeyGenerator, KeyShape, hash_code};
use crate::log::{AbuseSink, ActivationAction, ActivationLog, AuditTrail};
use crate::policy::{ProductRegistry, ProductStatus};
use crate::store::{CodeStore, Transition};
use crate::validation::{Rejection, ValidationEngine, ValidationOutcome};
use chrono::{DateTime, Duration, Utc};
use keysmith_crypto::{LicenseEncryptionManager, ValidatedLicense};
use keysmith_types::{BatchId, CodeId, ProductId, ProductVersionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest batch a single issuance request may create.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// A request to issue codes for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub product_id: ProductId,
    pub count: usize,
    pub product_version_id: Option<ProductVersionId>,
    pub issuer_id: Option<UserId>,
    /// Unset terms fall back to `[issuance]` defaults.
    pub license_type: Option<LicenseType>,
    pub max_activations: Option<u32>,
    pub concurrent_limit: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Records the codes as a named [`CodeBatch`].
    pub batch_name: Option<String>,
}

impl IssueRequest {
    /// A request for `count` codes with default terms.
    #[must_use]
    pub fn new(product_id: ProductId, count: usize) -> Self {
        Self {
            product_id,
            count,
            product_version_id: None,
            issuer_id: None,
            license_type: None,
            max_activations: None,
            concurrent_limit: None,
            expires_at: None,
            notes: None,
            batch_name: None,
        }
    }
}

/// A request to activate a code on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// The human code as typed.
    pub code: String,
    pub device: DeviceInfo,
    pub ip_address: Option<String>,
    /// The authenticated user, who becomes the owner of an unowned code.
    pub user_id: Option<UserId>,
}

/// A successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReceipt {
    pub code: ActivationCode,
    /// v1.1 license file bound to the activating device.
    pub license_file: Vec<u8>,
    pub warnings: Vec<String>,
}

/// Outcome of [`ActivationService::activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationResult {
    Activated(ActivationReceipt),
    /// The device-change policy requires verification first.
    VerificationRequired {
        method: String,
        outcome: ValidationOutcome,
    },
    Rejected(ValidationOutcome),
}

/// Claims sealed into license files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseClaims {
    /// Feature codes the license type unlocks for the product.
    #[serde(default)]
    pub features: Vec<String>,
    pub code_id: CodeId,
    pub product_id: ProductId,
    #[serde(default)]
    pub product_version_id: Option<ProductVersionId>,
    pub license_type: LicenseType,
    pub max_activations: u32,
    pub activation_count: u32,
    #[serde(default)]
    pub owner_user_id: Option<UserId>,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    pub code_expires_at: DateTime<Utc>,
}

impl LicenseClaims {
    /// Claims for `code` with the entitlements `features` grants it.
    #[must_use]
    pub fn for_code(code: &ActivationCode, features: &FeatureCatalog) -> Self {
        Self {
            features: features.entitlements(&code.product_id(), code.license_type()),
            ..Self::from(code)
        }
    }
}

/// Claims without feature entitlements.
impl From<&ActivationCode> for LicenseClaims {
    fn from(code: &ActivationCode) -> Self {
        Self {
            features: Vec::new(),
            code_id: code.id(),
            product_id: code.product_id(),
            product_version_id: code.product_version_id(),
            license_type: code.license_type(),
            max_activations: code.max_activations(),
            activation_count: code.activation_count(),
            owner_user_id: code.owner_user_id(),
            activated_at: code.activated_at(),
            code_expires_at: code.expires_at(),
        }
    }
}

enum Attempt {
    Activated {
        code: ActivationCode,
        warnings: Vec<String>,
    },
    VerificationRequired(ValidationOutcome),
    Rejected(ValidationOutcome),
}

/// Orchestrates the licensing components over a code store.
pub struct ActivationService<S: CodeStore> {
    store: Arc<S>,
    keygen: Arc<KeyGenerator>,
    engine: ValidationEngine,
    manager: Arc<LicenseEncryptionManager>,
    registry: Arc<dyn ProductRegistry>,
    features: FeatureCatalog,
    abuse: Arc<dyn AbuseSink>,
    issuance: IssuanceConfig,
    max_conflict_retries: u32,
}

impl<S: CodeStore> ActivationService<S> {
    /// Creates a service, loading key material from the configured source.
    pub fn from_config(
        store: Arc<S>,
        config: &LicensingConfig,
        abuse: Arc<dyn AbuseSink>,
    ) -> LicenseResult<Self> {
        let manager =
            LicenseEncryptionManager::from_source(&config.key_source()?, config.generator.clone())?;
        Self::new(store, config, Arc::new(manager), abuse)
    }

    /// Creates a service around an existing license encryption manager.
    /// The manager's MAC key doubles as the code proof secret.
    pub fn new(
        store: Arc<S>,
        config: &LicensingConfig,
        manager: Arc<LicenseEncryptionManager>,
        abuse: Arc<dyn AbuseSink>,
    ) -> LicenseResult<Self> {
        config.check()?;
        let keygen = Arc::new(KeyGenerator::from_material(
            manager.key_material(),
            config.key_shape()?,
        )?);
        let registry = config.product_registry();
        let engine = ValidationEngine::new(
            Arc::clone(&keygen),
            Arc::clone(&registry),
            config.device_policy(),
        );
        Ok(Self {
            store,
            keygen,
            engine,
            manager,
            registry,
            features: config.feature_catalog()?,
            abuse,
            issuance: config.issuance,
            max_conflict_retries: config.store.max_conflict_retries,
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn key_generator(&self) -> &Arc<KeyGenerator> {
        &self.keygen
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<LicenseEncryptionManager> {
        &self.manager
    }

    #[must_use]
    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    #[must_use]
    pub fn features(&self) -> &FeatureCatalog {
        &self.features
    }

    // ── Issuance ─────────────────────────────────────────────────

    /// Generates and stores `request.count` codes, recorded as a
    /// [`CodeBatch`] when the request names one.
    pub fn issue_codes(
        &self,
        request: &IssueRequest,
        now: DateTime<Utc>,
    ) -> LicenseResult<Vec<ActivationCode>> {
        if request.count == 0 || request.count > MAX_BATCH_SIZE {
            return Err(LicenseError::InvalidTerms(format!(
                "count must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        if self.registry.product_status(&request.product_id)? != ProductStatus::Active {
            return Err(LicenseError::ProductUnavailable(request.product_id));
        }

        let expires_at = match request.expires_at {
            Some(at) => at,
            None => Duration::try_days(self.issuance.default_expiry_days)
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| {
                    LicenseError::InvalidTerms("default expiry is out of range".to_string())
                })?,
        };
        if expires_at <= now {
            return Err(LicenseError::InvalidTerms(
                "expires_at must be in the future".to_string(),
            ));
        }

        let terms = CodeTerms {
            license_type: request.license_type.unwrap_or(self.issuance.license_type),
            max_activations: request
                .max_activations
                .unwrap_or(self.issuance.max_activations),
            concurrent_limit: request
                .concurrent_limit
                .unwrap_or(self.issuance.concurrent_limit),
            expires_at,
            product_version_id: request.product_version_id,
            notes: request.notes.clone(),
            batch_id: None,
        };
        let batch = match request.batch_name.as_deref().map(str::trim) {
            Some("") => {
                return Err(LicenseError::InvalidTerms(
                    "batch name must not be empty".to_string(),
                ));
            }
            Some(name) => Some(CodeBatch {
                id: BatchId::new(),
                product_id: request.product_id,
                name: name.to_string(),
                description: request.notes.clone(),
                license_type: terms.license_type,
                count: u32::try_from(request.count).unwrap_or(u32::MAX),
                max_activations: terms.max_activations,
                expires_at,
                generated_by: request.issuer_id,
                created_at: now,
            }),
            None => None,
        };
        let terms = CodeTerms {
            batch_id: batch.as_ref().map(|b| b.id),
            ..terms
        };

        let shape = self.keygen.shape();
        let keys = self.keygen.generate_batch_keys(
            &request.product_id,
            request.count,
            request.issuer_id.as_ref(),
            &shape,
        )?;
        let codes = keys
            .into_iter()
            .map(|key| ActivationCode::issue(key, terms.clone(), now))
            .collect::<LicenseResult<Vec<_>>>()?;

        match &batch {
            Some(batch) => self.store.insert_code_batch(batch, &codes)?,
            None => self.store.insert_batch(&codes)?,
        }
        info!(
            product_id = %request.product_id,
            count = codes.len(),
            license_type = terms.license_type.as_str(),
            batch_id = batch.as_ref().map(|b| b.id.to_string()),
            "Issued activation codes"
        );
        Ok(codes)
    }

    /// A batch with its redemption counts.
    pub fn batch_usage(&self, id: &BatchId) -> LicenseResult<BatchUsage> {
        let batch = self
            .store
            .get_batch(id)?
            .ok_or_else(|| LicenseError::BatchNotFound(*id))?;
        let codes = self.store.batch_codes(id)?;
        Ok(BatchUsage::tally(batch, &codes))
    }

    /// Usage of every batch, oldest first, optionally for one product.
    pub fn list_batches(&self, product_id: Option<&ProductId>) -> LicenseResult<Vec<BatchUsage>> {
        self.store
            .list_batches(product_id)?
            .into_iter()
            .map(|batch| {
                let codes = self.store.batch_codes(&batch.id)?;
                Ok(BatchUsage::tally(batch, &codes))
            })
            .collect()
    }

    // ── Lookup & validation ──────────────────────────────────────

    /// Finds a code by its human form, accepting lowercase and loosely
    /// grouped input as well as the legacy code shape.
    pub fn find_code(&self, human_code: &str) -> LicenseResult<ActivationCode> {
        let normalized = [self.keygen.shape(), KeyShape::LEGACY]
            .iter()
            .find_map(|shape| KeyGenerator::normalize_human_code(human_code, shape))
            .ok_or_else(|| {
                LicenseError::InvalidKeyFormat("code does not match any known layout".to_string())
            })?;
        self.store
            .find_by_hash(&hash_code(&normalized))?
            .ok_or(LicenseError::CodeNotFound)
    }

    /// Validates a code without activating it. Unless `check_only` is set a
    /// VALIDATE row is recorded.
    pub fn validate_code(
        &self,
        human_code: &str,
        device_fingerprint: Option<&str>,
        ip_address: Option<&str>,
        check_only: bool,
        now: DateTime<Utc>,
    ) -> LicenseResult<ValidationOutcome> {
        let code = self.find_code(human_code)?;
        let outcome =
            self.engine
                .validate_for_activation(&code, device_fingerprint, ip_address, now)?;

        if !check_only {
            let device = device_fingerprint.map(DeviceInfo::new);
            let mut log = ActivationLog::new(
                code.id(),
                ActivationAction::Validate,
                device.as_ref(),
                ip_address,
                now,
            );
            if !outcome.valid {
                log = log.failed(outcome.error_summary());
            }
            if outcome.binding_failed() {
                log = log.suspicious("binding proof mismatch");
            }
            let mut audit = AuditTrail::new();
            audit.push(log);
            self.store.append_audit(&audit)?;
            self.forward(&audit);
        }
        self.report_binding_failure(&outcome);
        Ok(outcome)
    }

    // ── Activation ───────────────────────────────────────────────

    /// Validates and activates a code on the requesting device.
    ///
    /// On success the receipt carries a v1.1 license file bound to the
    /// device fingerprint. Rejections and pending verification are returned
    /// as data and recorded as failed ACTIVATE rows.
    pub fn activate(
        &self,
        request: &ActivationRequest,
        now: DateTime<Utc>,
    ) -> LicenseResult<ActivationResult> {
        let id = self.find_code(&request.code)?.id();
        let device = &request.device;
        let ip = request.ip_address.as_deref();

        let transition = self.with_retry(|| {
            self.store.transition(&id, |code, audit| {
                let outcome = self.engine.validate_for_activation(
                    code,
                    Some(&device.fingerprint),
                    ip,
                    now,
                )?;
                let code_id = code.id();
                let attempt_log = || {
                    ActivationLog::new(code_id, ActivationAction::Activate, Some(device), ip, now)
                };

                if !outcome.valid {
                    let mut log = attempt_log().failed(outcome.error_summary());
                    if outcome.binding_failed() {
                        log = log.suspicious("binding proof mismatch");
                    } else if outcome
                        .errors
                        .iter()
                        .any(|e| matches!(e, Rejection::DeviceChangeRejected(_)))
                    {
                        log = log.suspicious("activation from a different device");
                    }
                    audit.push(log);
                    return Ok(Attempt::Rejected(outcome));
                }
                if outcome.requires_verification {
                    audit.push(attempt_log().failed("device verification required"));
                    return Ok(Attempt::VerificationRequired(outcome));
                }

                if let Some(user) = request.user_id {
                    if !code.assign_owner(user) {
                        let err = LicenseError::OwnerMismatch;
                        audit.push(attempt_log().failed(&err));
                        return Err(err);
                    }
                }
                if outcome.device_change_allowed {
                    audit.push(code.rebind(device, ip, now)?);
                }
                match code.activate(device, ip, now) {
                    Ok(log) => {
                        audit.push(log);
                        Ok(Attempt::Activated {
                            code: code.clone(),
                            warnings: outcome.warnings,
                        })
                    }
                    Err(err) => {
                        audit.push(attempt_log().failed(&err));
                        Err(err)
                    }
                }
            })
        })?;

        match self.commit(transition)? {
            Attempt::Activated { code, warnings } => {
                let license_file =
                    self.seal_license_file(&code, Some(&device.fingerprint), now)?;
                info!(
                    code_id = %code.id(),
                    activation_count = code.activation_count(),
                    "Activation code activated"
                );
                Ok(ActivationResult::Activated(ActivationReceipt {
                    code,
                    license_file,
                    warnings,
                }))
            }
            Attempt::VerificationRequired(outcome) => {
                let method = outcome.verification_method.clone().unwrap_or_default();
                debug!(code_id = %id, method = %method, "Activation held for device verification");
                Ok(ActivationResult::VerificationRequired { method, outcome })
            }
            Attempt::Rejected(outcome) => {
                self.report_binding_failure(&outcome);
                debug!(code_id = %id, errors = %outcome.error_summary(), "Activation rejected");
                Ok(ActivationResult::Rejected(outcome))
            }
        }
    }

    /// Releases a code from the device identified by `fingerprint`.
    pub fn deactivate(
        &self,
        human_code: &str,
        fingerprint: &str,
        keep_license: bool,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<ActivationCode> {
        let id = self.find_code(human_code)?.id();
        let transition = self.with_retry(|| {
            self.store.transition(&id, |code, audit| {
                match code.deactivate(fingerprint, keep_license, ip_address, now) {
                    Ok(log) => {
                        audit.push(log);
                        Ok(code.clone())
                    }
                    Err(err) => {
                        let device = DeviceInfo::new(fingerprint);
                        audit.push(
                            ActivationLog::new(
                                code.id(),
                                ActivationAction::Deactivate,
                                Some(&device),
                                ip_address,
                                now,
                            )
                            .failed(&err),
                        );
                        Err(err)
                    }
                }
            })
        })?;
        let code = self.commit(transition)?;
        info!(code_id = %id, keep_license, "Activation code deactivated");
        Ok(code)
    }

    // ── Administration ───────────────────────────────────────────

    /// Permanently revokes a code.
    pub fn revoke(
        &self,
        id: &CodeId,
        revoked_by: Option<UserId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<ActivationCode> {
        let transition = self.with_retry(|| {
            self.store.transition(id, |code, audit| {
                audit.push(code.revoke(revoked_by, reason, now)?);
                Ok(code.clone())
            })
        })?;
        let code = self.commit(transition)?;
        warn!(code_id = %id, reason, "Activation code revoked");
        Ok(code)
    }

    /// Suspends a code until it is reinstated.
    pub fn suspend(
        &self,
        id: &CodeId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<ActivationCode> {
        let transition = self.with_retry(|| {
            self.store.transition(id, |code, _audit| {
                code.suspend(reason, now)?;
                Ok(code.clone())
            })
        })?;
        let code = self.commit(transition)?;
        info!(code_id = %id, reason, "Activation code suspended");
        Ok(code)
    }

    /// Lifts a suspension.
    pub fn reinstate(&self, id: &CodeId, now: DateTime<Utc>) -> LicenseResult<ActivationCode> {
        let transition = self.with_retry(|| {
            self.store.transition(id, |code, audit| {
                audit.push(code.reinstate(now)?);
                Ok(code.clone())
            })
        })?;
        let code = self.commit(transition)?;
        info!(code_id = %id, status = %code.status(), "Activation code reinstated");
        Ok(code)
    }

    /// Moves every overdue live code to EXPIRED and returns their ids.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> LicenseResult<Vec<CodeId>> {
        let mut expired = Vec::new();
        for id in self.store.overdue(now)? {
            let transition =
                self.with_retry(|| self.store.transition(&id, |code, _audit| code.expire(now)))?;
            match self.commit(transition) {
                Ok(()) => expired.push(id),
                // Revoked or expired by someone else in the meantime
                Err(LicenseError::InvalidTransition { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue activation codes");
        }
        Ok(expired)
    }

    // ── License files ────────────────────────────────────────────

    /// Issues a fresh license file for an activated code, bound to
    /// `hardware_id` or, if none is given, to the code's bound device.
    pub fn license_file(
        &self,
        id: &CodeId,
        hardware_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<Vec<u8>> {
        let code = self.store.get(id)?.ok_or(LicenseError::CodeNotFound)?;
        if code.status() != CodeStatus::Activated {
            return Err(LicenseError::InvalidTransition {
                from: code.status(),
                action: "issue a license file for",
            });
        }
        if code.is_expired(now) {
            return Err(LicenseError::Expired);
        }
        let bound = code.device().map(|d| d.fingerprint.as_str());
        self.seal_license_file(&code, hardware_id.or(bound), now)
    }

    /// Validates a license file issued by this deployment.
    pub fn verify_license_file(
        &self,
        content: &[u8],
        hardware_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<ValidatedLicense> {
        Ok(self
            .manager
            .check_license_file(content, hardware_id, now)?)
    }

    fn seal_license_file(
        &self,
        code: &ActivationCode,
        hardware_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<Vec<u8>> {
        let days = code
            .days_until_expiry(now)
            .clamp(1, self.issuance.license_file_days);
        Ok(self.manager.create_license_file_with_binding_at(
            &LicenseClaims::for_code(code, &self.features),
            hardware_id,
            days,
            now,
        )?)
    }

    // ── Plumbing ─────────────────────────────────────────────────

    /// Forwards the committed rows to the abuse sink and unwraps the
    /// business result.
    fn commit<T>(&self, transition: Transition<T>) -> LicenseResult<T> {
        self.forward(&transition.audit);
        transition.result
    }

    fn forward(&self, audit: &AuditTrail) {
        for record in audit.iter() {
            self.abuse.record(record);
        }
    }

    fn report_binding_failure(&self, outcome: &ValidationOutcome) {
        if let Some(failure) = &outcome.binding_failure {
            self.abuse.binding_failure(failure);
        }
    }

    fn with_retry<T>(&self, mut op: impl FnMut() -> LicenseResult<T>) -> LicenseResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    debug!(attempt, "Retrying transition after concurrency conflict");
                }
                other => return other,
            }
        }
    }
}
