//! Pre-activation validation.
//!
//! [`ValidationEngine::validate_for_activation`] gathers every reason a code
//! cannot be activated right now into one [`ValidationOutcome`]. Business
//! rule failures are data; only a failing collaborator is an `Err`.
//!
//! The engine has no side effects. A failed binding proof is returned in
//! [`ValidationOutcome::binding_failure`] for the caller to report once its
//! audit rows are durable.

use crate::code::{ActivationCode, CodeStatus};
use crate::error::LicenseResult;
use crate::keygen::KeyGenerator;
use crate::log::BindingFailure;
use crate::policy::{DeviceChangePolicy, DeviceDecision, ProductRegistry, ProductStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// One reason a code failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    #[error("Activation code has been revoked")]
    Revoked,

    #[error("Activation code is suspended")]
    Suspended,

    #[error("Activation code has expired")]
    Expired,

    #[error("Maximum activations reached ({0})")]
    ActivationLimitReached(u32),

    #[error("Product is not available for activation")]
    ProductUnavailable,

    #[error("Activation code is not valid for this product")]
    BindingProofInvalid,

    #[error("{0}")]
    DeviceChangeRejected(String),
}

/// The combined result of every validation check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// No check failed.
    pub valid: bool,
    /// `valid` and no verification step is pending.
    pub can_activate: bool,
    pub errors: Vec<Rejection>,
    pub warnings: Vec<String>,
    pub requires_verification: bool,
    pub verification_method: Option<String>,
    /// The device-change policy allowed moving the binding to the presented
    /// device.
    pub device_change_allowed: bool,
    /// Fraud signal for a failed binding proof, not part of the response.
    #[serde(skip)]
    pub binding_failure: Option<BindingFailure>,
}

impl ValidationOutcome {
    /// Returns true if the binding proof check failed.
    #[must_use]
    pub fn binding_failed(&self) -> bool {
        self.errors.contains(&Rejection::BindingProofInvalid)
    }

    /// Error messages joined for audit rows.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self.can_activate = self.valid && !self.requires_verification;
        self
    }
}

/// Combines state, binding-proof and device checks into one decision.
#[derive(Clone)]
pub struct ValidationEngine {
    keygen: Arc<KeyGenerator>,
    registry: Arc<dyn ProductRegistry>,
    device_policy: Arc<dyn DeviceChangePolicy>,
}

impl ValidationEngine {
    pub fn new(
        keygen: Arc<KeyGenerator>,
        registry: Arc<dyn ProductRegistry>,
        device_policy: Arc<dyn DeviceChangePolicy>,
    ) -> Self {
        Self {
            keygen,
            registry,
            device_policy,
        }
    }

    /// Validates `code` for activation from `device_fingerprint`.
    ///
    /// Checks run in order (state, binding proof, device) and every failure
    /// is collected. The device check is skipped when no fingerprint is
    /// presented or the code is unbound.
    pub fn validate_for_activation(
        &self,
        code: &ActivationCode,
        device_fingerprint: Option<&str>,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<ValidationOutcome> {
        let mut outcome = ValidationOutcome::default();

        // State
        match code.status() {
            CodeStatus::Revoked => outcome.errors.push(Rejection::Revoked),
            CodeStatus::Suspended => outcome.errors.push(Rejection::Suspended),
            _ => {}
        }
        if code.is_expired(now) {
            outcome.errors.push(Rejection::Expired);
        }
        if code.activation_count() >= code.max_activations() {
            outcome
                .errors
                .push(Rejection::ActivationLimitReached(code.max_activations()));
        }
        if self.registry.product_status(&code.product_id())? != ProductStatus::Active {
            outcome.errors.push(Rejection::ProductUnavailable);
        }

        // Binding proof
        if !self.keygen.verify_software_binding(
            code.human_code(),
            &code.product_id(),
            code.binding_proof(),
        ) {
            outcome.errors.push(Rejection::BindingProofInvalid);
            outcome.binding_failure = Some(BindingFailure {
                code_id: code.id(),
                product_id: code.product_id(),
                ip_address: ip_address.map(str::to_string),
                detected_at: now,
            });
        }

        // Device
        if let (Some(presented), Some(bound)) = (device_fingerprint, code.device()) {
            if bound.fingerprint != presented {
                match self.device_policy.decide(code, presented) {
                    DeviceDecision::Reject(reason) => {
                        outcome.errors.push(Rejection::DeviceChangeRejected(reason));
                    }
                    DeviceDecision::AllowWithWarning(warning) => {
                        outcome.warnings.push(warning);
                        outcome.device_change_allowed = true;
                    }
                    DeviceDecision::RequireVerification(method) => {
                        outcome.requires_verification = true;
                        outcome.verification_method = Some(method);
                    }
                }
            }
        }

        let outcome = outcome.finish();
        debug!(
            code_id = %code.id(),
            valid = outcome.valid,
            errors = outcome.errors.len(),
            "Validated activation code"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("keygen", &self.keygen)
            .finish_non_exhaustive()
    }
}
