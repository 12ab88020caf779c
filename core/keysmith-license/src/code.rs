//! The activation code entity and its lifecycle.
//!
//! ```text
//!              activate            suspend
//!  GENERATED ───────────▶ ACTIVATED ───────▶ SUSPENDED
//!      │  ▲                  │  ▲               │
//!      │  └──── reinstate ───┼──┼───────────────┘
//!      │                     │  └ activate / rebind / deactivate
//!      └──── revoke ─────────┴──────────▶ REVOKED (terminal)
//!      └──── expire ─────────┴──────────▶ EXPIRED (terminal)
//! ```
//!
//! Every operation takes an explicit `now` and either mutates the code and
//! returns the audit row describing the change, or returns an error and
//! leaves the code untouched.

use crate::device::DeviceInfo;
use crate::error::{LicenseError, LicenseResult};
use crate::keygen::BoundKey;
use crate::log::{ActivationAction, ActivationLog, RevocationLog};
use chrono::{DateTime, Utc};
use keysmith_types::{BatchId, CodeId, ProductId, ProductVersionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commercial classification of a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseType {
    Trial,
    #[default]
    Standard,
    Premium,
    Enterprise,
    Lifetime,
}

impl LicenseType {
    /// Returns the wire form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "TRIAL",
            Self::Standard => "STANDARD",
            Self::Premium => "PREMIUM",
            Self::Enterprise => "ENTERPRISE",
            Self::Lifetime => "LIFETIME",
        }
    }

    /// Parses the wire form (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TRIAL" => Some(Self::Trial),
            "STANDARD" => Some(Self::Standard),
            "PREMIUM" => Some(Self::Premium),
            "ENTERPRISE" => Some(Self::Enterprise),
            "LIFETIME" => Some(Self::Lifetime),
            _ => None,
        }
    }
}

/// Flat status derived from [`CodeState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeStatus {
    Generated,
    Activated,
    Revoked,
    Expired,
    Suspended,
}

impl CodeStatus {
    /// Returns the wire form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "GENERATED",
            Self::Activated => "ACTIVATED",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
            Self::Suspended => "SUSPENDED",
        }
    }

    /// Parses the wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GENERATED" => Some(Self::Generated),
            "ACTIVATED" => Some(Self::Activated),
            "REVOKED" => Some(Self::Revoked),
            "EXPIRED" => Some(Self::Expired),
            "SUSPENDED" => Some(Self::Suspended),
            _ => None,
        }
    }

    /// Returns true for states no operation leaves.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked | Self::Expired)
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revocation record carried by a revoked code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: Option<UserId>,
    pub reason: String,
}

/// Lifecycle state. Each variant carries exactly the timestamps that are
/// meaningful in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeState {
    Generated,
    Activated {
        activated_at: DateTime<Utc>,
    },
    Suspended {
        activated_at: Option<DateTime<Utc>>,
        suspended_at: DateTime<Utc>,
        reason: String,
    },
    Revoked {
        activated_at: Option<DateTime<Utc>>,
        revocation: Revocation,
    },
    Expired {
        activated_at: Option<DateTime<Utc>>,
        expired_at: DateTime<Utc>,
    },
}

impl CodeState {
    /// Returns the flat status.
    #[must_use]
    pub fn status(&self) -> CodeStatus {
        match self {
            Self::Generated => CodeStatus::Generated,
            Self::Activated { .. } => CodeStatus::Activated,
            Self::Suspended { .. } => CodeStatus::Suspended,
            Self::Revoked { .. } => CodeStatus::Revoked,
            Self::Expired { .. } => CodeStatus::Expired,
        }
    }

    /// Returns when the code was first activated, if ever.
    #[must_use]
    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Generated => None,
            Self::Activated { activated_at } => Some(*activated_at),
            Self::Suspended { activated_at, .. }
            | Self::Revoked { activated_at, .. }
            | Self::Expired { activated_at, .. } => *activated_at,
        }
    }
}

/// The device a code is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub fingerprint: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub info: serde_json::Value,
    pub bound_at: DateTime<Utc>,
}

/// Issuance parameters of a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTerms {
    pub license_type: LicenseType,
    pub max_activations: u32,
    pub concurrent_limit: u32,
    pub expires_at: DateTime<Utc>,
    pub product_version_id: Option<ProductVersionId>,
    pub notes: Option<String>,
    /// Batch the code is issued in, if any.
    pub batch_id: Option<BatchId>,
}

/// An issued activation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationCode {
    id: CodeId,
    code_hash: String,
    human_code: String,
    product_id: ProductId,
    product_version_id: Option<ProductVersionId>,
    binding_proof: String,
    license_type: LicenseType,
    state: CodeState,
    max_activations: u32,
    activation_count: u32,
    concurrent_limit: u32,
    device: Option<DeviceBinding>,
    owner_user_id: Option<UserId>,
    issuer_id: Option<UserId>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    batch_id: Option<BatchId>,
    #[serde(default)]
    version: u64,
}

impl ActivationCode {
    /// Creates a GENERATED code from generator output.
    pub fn issue(key: BoundKey, terms: CodeTerms, now: DateTime<Utc>) -> LicenseResult<Self> {
        if terms.max_activations == 0 {
            return Err(LicenseError::InvalidTerms(
                "max_activations must be at least 1".to_string(),
            ));
        }
        if terms.concurrent_limit == 0 {
            return Err(LicenseError::InvalidTerms(
                "concurrent_limit must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            id: CodeId::new(),
            code_hash: key.key_hash,
            human_code: key.key,
            product_id: key.product_id,
            product_version_id: terms.product_version_id,
            binding_proof: key.proof,
            license_type: terms.license_type,
            state: CodeState::Generated,
            max_activations: terms.max_activations,
            activation_count: 0,
            concurrent_limit: terms.concurrent_limit,
            device: None,
            owner_user_id: None,
            issuer_id: key.issuer_id,
            created_at: now,
            expires_at: terms.expires_at,
            last_used_at: None,
            notes: terms.notes,
            batch_id: terms.batch_id,
            version: 0,
        })
    }

    #[must_use]
    pub fn id(&self) -> CodeId {
        self.id
    }

    #[must_use]
    pub fn code_hash(&self) -> &str {
        &self.code_hash
    }

    #[must_use]
    pub fn human_code(&self) -> &str {
        &self.human_code
    }

    #[must_use]
    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    #[must_use]
    pub fn product_version_id(&self) -> Option<ProductVersionId> {
        self.product_version_id
    }

    #[must_use]
    pub fn binding_proof(&self) -> &str {
        &self.binding_proof
    }

    #[must_use]
    pub fn license_type(&self) -> LicenseType {
        self.license_type
    }

    #[must_use]
    pub fn state(&self) -> &CodeState {
        &self.state
    }

    #[must_use]
    pub fn status(&self) -> CodeStatus {
        self.state.status()
    }

    #[must_use]
    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.state.activated_at()
    }

    /// Returns the revocation record if the code is revoked.
    #[must_use]
    pub fn revocation(&self) -> Option<&Revocation> {
        match &self.state {
            CodeState::Revoked { revocation, .. } => Some(revocation),
            _ => None,
        }
    }

    #[must_use]
    pub fn max_activations(&self) -> u32 {
        self.max_activations
    }

    #[must_use]
    pub fn activation_count(&self) -> u32 {
        self.activation_count
    }

    #[must_use]
    pub fn concurrent_limit(&self) -> u32 {
        self.concurrent_limit
    }

    #[must_use]
    pub fn device(&self) -> Option<&DeviceBinding> {
        self.device.as_ref()
    }

    #[must_use]
    pub fn owner_user_id(&self) -> Option<UserId> {
        self.owner_user_id
    }

    #[must_use]
    pub fn issuer_id(&self) -> Option<UserId> {
        self.issuer_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used_at
    }

    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    #[must_use]
    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    /// Optimistic-concurrency counter maintained by the store.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Advances the concurrency counter. Called by stores when they persist
    /// a transition.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// True if the status is EXPIRED or `now` is past `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status() == CodeStatus::Expired || now > self.expires_at
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.status() == CodeStatus::Revoked
    }

    #[must_use]
    pub fn remaining_activations(&self) -> u32 {
        self.max_activations.saturating_sub(self.activation_count)
    }

    /// Whole days until expiry, never negative.
    #[must_use]
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days().max(0)
    }

    /// Activates the code on `device`.
    ///
    /// Allowed from GENERATED and ACTIVATED while unexpired, below the
    /// activation ceiling, and (if a device is already bound) on that same
    /// device. The first activation binds the device.
    pub fn activate(
        &mut self,
        device: &DeviceInfo,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<ActivationLog> {
        match self.state {
            CodeState::Generated | CodeState::Activated { .. } => {}
            CodeState::Revoked { .. } => return Err(LicenseError::Revoked),
            CodeState::Suspended { .. } => return Err(LicenseError::Suspended),
            CodeState::Expired { .. } => return Err(LicenseError::Expired),
        }
        if now > self.expires_at {
            return Err(LicenseError::Expired);
        }
        if self.activation_count >= self.max_activations {
            return Err(LicenseError::ActivationLimitReached {
                max: self.max_activations,
            });
        }
        if let Some(bound) = &self.device {
            if bound.fingerprint != device.fingerprint {
                return Err(LicenseError::DeviceMismatch);
            }
        } else {
            self.device = Some(device.bind(now));
        }

        if self.state == CodeState::Generated {
            self.state = CodeState::Activated { activated_at: now };
        }
        self.activation_count += 1;
        self.last_used_at = Some(now);

        Ok(ActivationLog::new(
            self.id,
            ActivationAction::Activate,
            Some(device),
            ip_address,
            now,
        ))
    }

    /// Revokes the code. Revocation is permanent.
    pub fn revoke(
        &mut self,
        revoked_by: Option<UserId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<RevocationLog> {
        let activated_at = match &self.state {
            CodeState::Revoked { .. } => return Err(LicenseError::AlreadyRevoked),
            CodeState::Expired { .. } => {
                return Err(LicenseError::InvalidTransition {
                    from: CodeStatus::Expired,
                    action: "revoke",
                });
            }
            state => state.activated_at(),
        };

        self.state = CodeState::Revoked {
            activated_at,
            revocation: Revocation {
                revoked_at: now,
                revoked_by,
                reason: reason.to_string(),
            },
        };

        Ok(RevocationLog::new(self.id, revoked_by, reason, now))
    }

    /// Suspends a GENERATED or ACTIVATED code.
    pub fn suspend(&mut self, reason: &str, now: DateTime<Utc>) -> LicenseResult<()> {
        let activated_at = match &self.state {
            CodeState::Generated => None,
            CodeState::Activated { activated_at } => Some(*activated_at),
            other => {
                return Err(LicenseError::InvalidTransition {
                    from: other.status(),
                    action: "suspend",
                });
            }
        };
        self.state = CodeState::Suspended {
            activated_at,
            suspended_at: now,
            reason: reason.to_string(),
        };
        Ok(())
    }

    /// Lifts a suspension, returning to ACTIVATED if the code had been
    /// activated and to GENERATED otherwise.
    pub fn reinstate(&mut self, now: DateTime<Utc>) -> LicenseResult<ActivationLog> {
        let CodeState::Suspended { activated_at, .. } = self.state else {
            return Err(LicenseError::InvalidTransition {
                from: self.status(),
                action: "reinstate",
            });
        };
        self.state = match activated_at {
            Some(activated_at) => CodeState::Activated { activated_at },
            None => CodeState::Generated,
        };
        Ok(ActivationLog::new(
            self.id,
            ActivationAction::Reactivate,
            None,
            None,
            now,
        ))
    }

    /// Moves an overdue code to EXPIRED.
    pub fn expire(&mut self, now: DateTime<Utc>) -> LicenseResult<()> {
        // Only overdue codes in a live state can expire.
        if self.status().is_terminal() || now <= self.expires_at {
            return Err(LicenseError::InvalidTransition {
                from: self.status(),
                action: "expire",
            });
        }
        self.state = CodeState::Expired {
            activated_at: self.state.activated_at(),
            expired_at: now,
        };
        Ok(())
    }

    /// Releases the code from the device identified by `fingerprint`.
    ///
    /// Unless `keep_license` is set the owner is cleared and one activation
    /// is given back.
    pub fn deactivate(
        &mut self,
        fingerprint: &str,
        keep_license: bool,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<ActivationLog> {
        if self.status() != CodeStatus::Activated {
            return Err(LicenseError::InvalidTransition {
                from: self.status(),
                action: "deactivate",
            });
        }
        let bound = self.device.take().ok_or(LicenseError::NoDeviceBound)?;
        if bound.fingerprint != fingerprint {
            self.device = Some(bound);
            return Err(LicenseError::DeviceMismatch);
        }

        if !keep_license {
            self.owner_user_id = None;
            self.activation_count = self.activation_count.saturating_sub(1);
        }
        self.last_used_at = Some(now);

        let device = DeviceInfo {
            fingerprint: bound.fingerprint,
            name: bound.name,
            info: bound.info,
        };
        Ok(ActivationLog::new(
            self.id,
            ActivationAction::Deactivate,
            Some(&device),
            ip_address,
            now,
        ))
    }

    /// Replaces the bound device of an ACTIVATED code. Only reached when the
    /// device-change policy allowed the move.
    pub fn rebind(
        &mut self,
        device: &DeviceInfo,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> LicenseResult<ActivationLog> {
        if self.status() != CodeStatus::Activated {
            return Err(LicenseError::InvalidTransition {
                from: self.status(),
                action: "rebind",
            });
        }
        self.device = Some(device.bind(now));
        self.last_used_at = Some(now);
        Ok(ActivationLog::new(
            self.id,
            ActivationAction::Rebind,
            Some(device),
            ip_address,
            now,
        ))
    }

    /// Sets the owner if the code has none. Returns false if another user
    /// already owns it.
    pub fn assign_owner(&mut self, user: UserId) -> bool {
        match self.owner_user_id {
            None => {
                self.owner_user_id = Some(user);
                true
            }
            Some(owner) => owner == user,
        }
    }
}
