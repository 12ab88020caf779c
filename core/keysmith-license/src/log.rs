//! Append-only audit rows and the abuse sink they are forwarded to.

use crate::device::DeviceInfo;
use chrono::{DateTime, Utc};
use keysmith_types::{CodeId, LogId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// What an [`ActivationLog`] row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationAction {
    Activate,
    Validate,
    Deactivate,
    Reactivate,
    Rebind,
}

impl ActivationAction {
    /// Returns the wire form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activate => "ACTIVATE",
            Self::Validate => "VALIDATE",
            Self::Deactivate => "DEACTIVATE",
            Self::Reactivate => "REACTIVATE",
            Self::Rebind => "REBIND",
        }
    }

    /// Parses the wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVATE" => Some(Self::Activate),
            "VALIDATE" => Some(Self::Validate),
            "DEACTIVATE" => Some(Self::Deactivate),
            "REACTIVATE" => Some(Self::Reactivate),
            "REBIND" => Some(Self::Rebind),
            _ => None,
        }
    }
}

impl fmt::Display for ActivationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One activation attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationLog {
    pub id: LogId,
    pub code_id: CodeId,
    pub action: ActivationAction,
    pub device_fingerprint: Option<String>,
    pub device_name: Option<String>,
    pub ip_address: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub is_suspicious: bool,
    pub suspicion_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActivationLog {
    /// Creates a successful row.
    pub fn new(
        code_id: CodeId,
        action: ActivationAction,
        device: Option<&DeviceInfo>,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogId::new(),
            code_id,
            action,
            device_fingerprint: device.map(|d| d.fingerprint.clone()),
            device_name: device.and_then(|d| d.name.clone()),
            ip_address: ip_address.map(str::to_string),
            success: true,
            error_message: None,
            is_suspicious: false,
            suspicion_reason: None,
            created_at: now,
        }
    }

    /// Marks the row as a failed attempt.
    #[must_use]
    pub fn failed(mut self, error: impl fmt::Display) -> Self {
        self.success = false;
        self.error_message = Some(error.to_string());
        self
    }

    /// Flags the row for abuse review.
    #[must_use]
    pub fn suspicious(mut self, reason: impl Into<String>) -> Self {
        self.is_suspicious = true;
        self.suspicion_reason = Some(reason.into());
        self
    }
}

/// One revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationLog {
    pub id: LogId,
    pub code_id: CodeId,
    pub revoked_by: Option<UserId>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl RevocationLog {
    pub fn new(
        code_id: CodeId,
        revoked_by: Option<UserId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogId::new(),
            code_id,
            revoked_by,
            reason: reason.to_string(),
            created_at: now,
        }
    }
}

/// Either kind of audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Activation(ActivationLog),
    Revocation(RevocationLog),
}

impl From<ActivationLog> for AuditRecord {
    fn from(log: ActivationLog) -> Self {
        Self::Activation(log)
    }
}

impl From<RevocationLog> for AuditRecord {
    fn from(log: RevocationLog) -> Self {
        Self::Revocation(log)
    }
}

/// Audit rows collected during one transition, persisted with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditTrail {
    records: Vec<AuditRecord>,
}

impl AuditTrail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row.
    pub fn push(&mut self, record: impl Into<AuditRecord>) {
        self.records.push(record.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter()
    }

    /// Activation rows in insertion order.
    pub fn activations(&self) -> impl Iterator<Item = &ActivationLog> {
        self.records.iter().filter_map(|r| match r {
            AuditRecord::Activation(log) => Some(log),
            AuditRecord::Revocation(_) => None,
        })
    }

    /// Revocation rows in insertion order.
    pub fn revocations(&self) -> impl Iterator<Item = &RevocationLog> {
        self.records.iter().filter_map(|r| match r {
            AuditRecord::Revocation(log) => Some(log),
            AuditRecord::Activation(_) => None,
        })
    }
}

impl IntoIterator for AuditTrail {
    type Item = AuditRecord;
    type IntoIter = std::vec::IntoIter<AuditRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// A presented code whose binding proof did not verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingFailure {
    pub code_id: CodeId,
    pub product_id: ProductId,
    pub ip_address: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Receives committed audit rows and fraud signals.
pub trait AbuseSink: Send + Sync {
    /// Called after a transition commits, once per row.
    fn record(&self, record: &AuditRecord);

    /// Called once per rejected attempt whose binding proof failed, after
    /// any audit rows of the attempt are stored.
    fn binding_failure(&self, failure: &BindingFailure);
}

/// Sink that emits every row as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAbuseSink;

impl AbuseSink for TracingAbuseSink {
    fn record(&self, record: &AuditRecord) {
        match record {
            AuditRecord::Activation(log) if log.is_suspicious => warn!(
                code_id = %log.code_id,
                action = %log.action,
                ip = log.ip_address.as_deref().unwrap_or("-"),
                reason = log.suspicion_reason.as_deref().unwrap_or(""),
                "Suspicious activation attempt"
            ),
            AuditRecord::Activation(log) => info!(
                code_id = %log.code_id,
                action = %log.action,
                success = log.success,
                "Activation event"
            ),
            AuditRecord::Revocation(log) => info!(
                code_id = %log.code_id,
                reason = %log.reason,
                "Activation code revoked"
            ),
        }
    }

    fn binding_failure(&self, failure: &BindingFailure) {
        warn!(
            code_id = %failure.code_id,
            product_id = %failure.product_id,
            ip = failure.ip_address.as_deref().unwrap_or("-"),
            "Binding proof mismatch"
        );
    }
}
