//! Error types for the licensing module.

use crate::code::CodeStatus;
use keysmith_crypto::{CryptoError, FileRejection};
use keysmith_types::{BatchId, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The human code does not match the configured key shape.
    #[error("invalid activation code format: {0}")]
    InvalidKeyFormat(String),

    /// Issuance parameters are out of range.
    #[error("invalid code terms: {0}")]
    InvalidTerms(String),

    /// No activation code matches the lookup.
    #[error("activation code not found")]
    CodeNotFound,

    /// No code batch has this id.
    #[error("code batch {0} not found")]
    BatchNotFound(BatchId),

    /// A code with the same hash already exists.
    #[error("activation code already exists")]
    DuplicateCode,

    /// The requested operation is not allowed from the current status.
    #[error("cannot {action} a code in status {from}")]
    InvalidTransition {
        from: CodeStatus,
        action: &'static str,
    },

    /// The code was already revoked.
    #[error("activation code already revoked")]
    AlreadyRevoked,

    /// The code has been revoked.
    #[error("activation code has been revoked")]
    Revoked,

    /// The code is suspended.
    #[error("activation code is suspended")]
    Suspended,

    /// The code is past its expiry.
    #[error("activation code has expired")]
    Expired,

    /// Every activation slot is used.
    #[error("activation limit reached (max {max})")]
    ActivationLimitReached { max: u32 },

    /// The product is inactive or unknown to the registry.
    #[error("product {0} is not available")]
    ProductUnavailable(ProductId),

    /// The code is bound to a different device.
    #[error("activation code is bound to a different device")]
    DeviceMismatch,

    /// The code belongs to another user.
    #[error("activation code belongs to another user")]
    OwnerMismatch,

    /// The code is not bound to any device.
    #[error("activation code is not bound to a device")]
    NoDeviceBound,

    /// The stored binding proof does not match the code and product.
    #[error("activation code binding proof is invalid")]
    BindingProofInvalid,

    /// A license file was rejected.
    #[error("{0}")]
    LicenseFile(#[from] FileRejection),

    /// Another writer changed the row concurrently.
    #[error("concurrent modification, retry the operation")]
    ConcurrencyConflict,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Product registry failure.
    #[error("product registry unavailable: {0}")]
    Registry(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Key material or encryption failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`LicenseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input: wrong code shape, bad terms, unknown code.
    Format,
    /// The code's lifecycle state forbids the operation.
    State,
    /// Device binding does not allow the operation.
    Binding,
    /// Cryptographic evidence failed verification.
    Integrity,
    /// Lost a race with another writer; safe to retry.
    ConcurrencyConflict,
    /// Storage, registry, configuration or key material failure.
    Infrastructure,
}

impl LicenseError {
    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKeyFormat(_)
            | Self::InvalidTerms(_)
            | Self::CodeNotFound
            | Self::BatchNotFound(_) => ErrorKind::Format,
            Self::InvalidTransition { .. }
            | Self::AlreadyRevoked
            | Self::Revoked
            | Self::Suspended
            | Self::Expired
            | Self::ActivationLimitReached { .. }
            | Self::ProductUnavailable(_) => ErrorKind::State,
            Self::DeviceMismatch | Self::NoDeviceBound | Self::OwnerMismatch => {
                ErrorKind::Binding
            }
            Self::BindingProofInvalid | Self::DuplicateCode | Self::LicenseFile(_) => {
                ErrorKind::Integrity
            }
            Self::ConcurrencyConflict => ErrorKind::ConcurrencyConflict,
            Self::Storage(_)
            | Self::Registry(_)
            | Self::Config(_)
            | Self::Crypto(_)
            | Self::Serialization(_) => ErrorKind::Infrastructure,
        }
    }

    /// Returns true if the operation may succeed when retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
