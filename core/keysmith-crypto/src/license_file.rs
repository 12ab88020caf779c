//! License file container.
//!
//! A license file is a pretty-printed JSON document:
//!
//! ```json
//! {
//!   "header": {"version": "1.1", "generator": "keysmith", "format": "JSON_ENCRYPTED_V2"},
//!   "license": {"encrypted_data": "<base64url>", "algorithm": "CHACHA20-POLY1305", "timestamp": 1700000000},
//!   "signature": "<hex hmac>"
//! }
//! ```
//!
//! Version 1.0 files carry the encrypted claims only. Version 1.1 files wrap
//! the claims in a [`BoundPayload`] with expiry and optional hardware binding
//! and add an outer signature over `encrypted_data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default generator name written into license headers.
pub const DEFAULT_GENERATOR: &str = "keysmith";

/// Cipher label stored in the encrypted package.
pub const CIPHER_ALGORITHM: &str = "CHACHA20-POLY1305";

/// Format label of legacy v1.0 files.
pub const FORMAT_V1_0: &str = "JSON_ENCRYPTED";

/// Format label of v1.1 files.
pub const FORMAT_V1_1: &str = "JSON_ENCRYPTED_V2";

/// License file format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileVersion {
    /// Legacy: encrypted claims, no expiry, no binding, no signature.
    #[serde(rename = "1.0")]
    V1_0,
    /// Expiry, optional hardware binding and outer signature.
    #[serde(rename = "1.1")]
    V1_1,
}

impl FileVersion {
    /// Returns the wire form of the version.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
        }
    }

    /// Parses the wire form of the version.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1.0" => Some(Self::V1_0),
            "1.1" => Some(Self::V1_1),
            _ => None,
        }
    }
}

/// License file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseHeader {
    /// Format version; files without one are read as 1.0.
    #[serde(default = "default_version")]
    pub version: String,
    /// Name of the issuing system.
    #[serde(default)]
    pub generator: String,
    /// Container format label.
    #[serde(default)]
    pub format: String,
}

fn default_version() -> String {
    FileVersion::V1_0.as_str().to_string()
}

/// A sealed payload; see [`crate::seal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPackage {
    /// URL-safe base64 of `nonce || ciphertext || tag`.
    pub encrypted_data: String,
    /// Cipher label.
    pub algorithm: String,
    /// Unix timestamp (seconds) of encryption.
    pub timestamp: i64,
}

/// The on-disk license file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseFile {
    pub header: LicenseHeader,
    pub license: EncryptedPackage,
    /// Hex HMAC over `encrypted_data` (v1.1 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Encrypted body of a v1.1 file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundPayload {
    /// The caller-supplied license claims.
    pub claims: serde_json::Value,
    /// Unix timestamp after which the file is invalid.
    #[serde(default)]
    pub expires_at: i64,
    /// Unix timestamp of issuance.
    pub issued_at: i64,
    /// Device the file is bound to, if any.
    #[serde(default)]
    pub hardware_id: Option<String>,
}

/// Why a license file was rejected.
///
/// Every variant rejects the file wholesale; no partial data is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRejection {
    /// The content is not a parseable license file.
    #[error("Malformed license file")]
    Malformed,

    /// The header names a different generator.
    #[error("Invalid license generator")]
    UnknownGenerator,

    /// The header carries a version this build does not understand.
    #[error("Unsupported license version: {0}")]
    UnsupportedVersion(String),

    /// The outer signature is missing or does not match.
    #[error("License tampered or corrupt")]
    Tampered,

    /// Authenticated decryption failed.
    #[error("License decryption failed")]
    DecryptionFailed,

    /// The file is past its expiry.
    #[error("License has expired")]
    Expired,

    /// The file is bound to another device.
    #[error("License bound to different hardware")]
    HardwareMismatch,
}

/// A license file that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedLicense {
    /// The license claims.
    pub data: serde_json::Value,
    pub header: LicenseHeader,
    pub version: FileVersion,
    /// Expiry (v1.1 only).
    pub expires_at: Option<DateTime<Utc>>,
    /// Hardware binding (v1.1 only).
    pub hardware_id: Option<String>,
}

/// Structured result of license-file validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LicenseFileValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<LicenseHeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<FileVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FileRejection>,
}

impl LicenseFileValidation {
    /// Returns the rejection message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

impl From<Result<ValidatedLicense, FileRejection>> for LicenseFileValidation {
    fn from(result: Result<ValidatedLicense, FileRejection>) -> Self {
        match result {
            Ok(license) => Self {
                valid: true,
                data: Some(license.data),
                header: Some(license.header),
                version: Some(license.version),
                error: None,
            },
            Err(rejection) => Self {
                valid: false,
                data: None,
                header: None,
                version: None,
                error: Some(rejection),
            },
        }
    }
}
