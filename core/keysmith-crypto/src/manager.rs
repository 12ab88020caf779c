//! The license encryption manager.
//!
//! One instance per process, built from the configured key material and
//! shared behind an `Arc`. It never mutates after construction, so concurrent
//! readers need no locking.

use crate::cipher;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KeyMaterial, KeySource};
use crate::license_file::{
    BoundPayload, EncryptedPackage, FORMAT_V1_0, FORMAT_V1_1, FileRejection, FileVersion,
    LicenseFile, LicenseFileValidation, LicenseHeader, ValidatedLicense,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

/// Domain separator for license-file signatures, keeping them distinct from
/// code binding proofs computed with the same MAC key.
const SIGNATURE_CONTEXT: &[u8] = b"license-file|";

/// Encrypts, packages and validates license files.
#[derive(Debug)]
pub struct LicenseEncryptionManager {
    material: KeyMaterial,
    generator: String,
}

impl LicenseEncryptionManager {
    /// Creates a manager over already-loaded key material.
    pub fn new(material: KeyMaterial, generator: impl Into<String>) -> Self {
        Self {
            material,
            generator: generator.into(),
        }
    }

    /// Loads key material from `source` and creates a manager.
    pub fn from_source(source: &KeySource, generator: impl Into<String>) -> CryptoResult<Self> {
        Ok(Self::new(KeyMaterial::load(source)?, generator))
    }

    /// Returns the generator name written into and expected in headers.
    #[must_use]
    pub fn generator(&self) -> &str {
        &self.generator
    }

    /// Returns the key material (for components that share the MAC key).
    #[must_use]
    pub fn key_material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Encrypts the compact JSON form of `data`.
    pub fn encrypt<T: Serialize + ?Sized>(&self, data: &T) -> CryptoResult<EncryptedPackage> {
        self.encrypt_at(data, Utc::now())
    }

    fn encrypt_at<T: Serialize + ?Sized>(
        &self,
        data: &T,
        now: DateTime<Utc>,
    ) -> CryptoResult<EncryptedPackage> {
        cipher::seal(self.material.cipher_key(), data, now)
    }

    /// Decrypts a package produced by [`LicenseEncryptionManager::encrypt`].
    ///
    /// Fails closed: any encoding, integrity or JSON error yields `Err` and
    /// no data.
    pub fn decrypt<T: DeserializeOwned>(&self, package: &EncryptedPackage) -> CryptoResult<T> {
        cipher::open(self.material.cipher_key(), package)
    }

    /// Creates a legacy v1.0 license file: encrypted claims only.
    pub fn create_license_file<T: Serialize + ?Sized>(&self, data: &T) -> CryptoResult<Vec<u8>> {
        let file = LicenseFile {
            header: self.header(FileVersion::V1_0),
            license: self.encrypt(data)?,
            signature: None,
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    /// Creates a v1.1 license file expiring `expiry_days` from now and
    /// optionally bound to `hardware_id`. An empty id leaves the file unbound.
    pub fn create_license_file_with_binding<T: Serialize + ?Sized>(
        &self,
        data: &T,
        hardware_id: Option<&str>,
        expiry_days: i64,
    ) -> CryptoResult<Vec<u8>> {
        self.create_license_file_with_binding_at(data, hardware_id, expiry_days, Utc::now())
    }

    /// [`LicenseEncryptionManager::create_license_file_with_binding`] with an
    /// explicit issuance time.
    pub fn create_license_file_with_binding_at<T: Serialize + ?Sized>(
        &self,
        data: &T,
        hardware_id: Option<&str>,
        expiry_days: i64,
        now: DateTime<Utc>,
    ) -> CryptoResult<Vec<u8>> {
        let expires_at = Duration::try_days(expiry_days)
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| {
                CryptoError::Encryption(format!("expiry of {expiry_days} days is out of range"))
            })?;

        let payload = BoundPayload {
            claims: serde_json::to_value(data)?,
            expires_at: expires_at.timestamp(),
            issued_at: now.timestamp(),
            hardware_id: hardware_id.filter(|h| !h.is_empty()).map(str::to_string),
        };

        let license = self.encrypt_at(&payload, now)?;
        let signature = self.sign(&license.encrypted_data);

        let file = LicenseFile {
            header: self.header(FileVersion::V1_1),
            license,
            signature: Some(signature),
        };
        Ok(serde_json::to_vec_pretty(&file)?)
    }

    /// Validates a v1.0 or v1.1 license file against the current time.
    pub fn validate_license_file(
        &self,
        content: &[u8],
        current_hardware_id: Option<&str>,
    ) -> LicenseFileValidation {
        self.check_license_file(content, current_hardware_id, Utc::now())
            .into()
    }

    /// Runs every license-file check and returns the validated claims or the
    /// first rejection.
    ///
    /// Order: parse, generator, signature (v1.1, before any decryption),
    /// decryption, expiry (v1.1), hardware binding (v1.1, only when both the
    /// file and the caller supply a non-empty id).
    pub fn check_license_file(
        &self,
        content: &[u8],
        current_hardware_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ValidatedLicense, FileRejection> {
        let file: LicenseFile = serde_json::from_slice(content).map_err(|e| {
            debug!(error = %e, "License file failed to parse");
            FileRejection::Malformed
        })?;

        if file.header.generator != self.generator {
            warn!(generator = %file.header.generator, "License file from unknown generator");
            return Err(FileRejection::UnknownGenerator);
        }

        let version = FileVersion::parse(&file.header.version)
            .ok_or_else(|| FileRejection::UnsupportedVersion(file.header.version.clone()))?;

        match version {
            FileVersion::V1_0 => {
                let data: serde_json::Value = self.decrypt(&file.license).map_err(|e| {
                    error!(error = %e, "License decryption failed");
                    FileRejection::DecryptionFailed
                })?;
                Ok(ValidatedLicense {
                    data,
                    header: file.header,
                    version,
                    expires_at: None,
                    hardware_id: None,
                })
            }
            FileVersion::V1_1 => {
                let signature = file.signature.as_deref().unwrap_or_default();
                if !self.verify_signature(&file.license.encrypted_data, signature) {
                    warn!("License file signature mismatch");
                    return Err(FileRejection::Tampered);
                }

                let payload: BoundPayload = self.decrypt(&file.license).map_err(|e| {
                    error!(error = %e, "License decryption failed");
                    FileRejection::DecryptionFailed
                })?;

                if now.timestamp() > payload.expires_at {
                    return Err(FileRejection::Expired);
                }

                let current = current_hardware_id.filter(|h| !h.is_empty());
                let bound = payload.hardware_id.as_deref().filter(|h| !h.is_empty());
                if let (Some(current), Some(bound)) = (current, bound) {
                    if current != bound {
                        return Err(FileRejection::HardwareMismatch);
                    }
                }

                Ok(ValidatedLicense {
                    data: payload.claims,
                    header: file.header,
                    version,
                    expires_at: DateTime::from_timestamp(payload.expires_at, 0),
                    hardware_id: payload.hardware_id,
                })
            }
        }
    }

    fn header(&self, version: FileVersion) -> LicenseHeader {
        let format = match version {
            FileVersion::V1_0 => FORMAT_V1_0,
            FileVersion::V1_1 => FORMAT_V1_1,
        };
        LicenseHeader {
            version: version.as_str().to_string(),
            generator: self.generator.clone(),
            format: format.to_string(),
        }
    }

    fn sign(&self, encrypted_data: &str) -> String {
        self.material
            .mac_key()
            .sign_parts(&[SIGNATURE_CONTEXT, encrypted_data.as_bytes()])
    }

    fn verify_signature(&self, encrypted_data: &str, signature: &str) -> bool {
        self.material
            .mac_key()
            .verify_parts(&[SIGNATURE_CONTEXT, encrypted_data.as_bytes()], signature)
    }
}
