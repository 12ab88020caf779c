//! Cryptographic primitives for Keysmith licensing.
//!
//! This crate handles:
//! - Key material loading (key file or Argon2id master-secret derivation)
//! - ChaCha20-Poly1305 authenticated encryption of license payloads
//! - HMAC-SHA256 binding proofs and license-file signatures
//! - The v1.0 / v1.1 license file container
//!
//! # Security Model
//!
//! - Keys are zeroized on drop and redacted from `Debug` output
//! - Every decryption failure is fatal: no partial plaintext is returned
//! - MAC comparisons run in constant time

mod cipher;
mod error;
mod key;
mod license_file;
mod mac;
mod manager;

pub use cipher::{NONCE_SIZE, TAG_SIZE, open, seal};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    DerivedKey, KEY_SIZE, KdfParams, KeyMaterial, KeySource, SALT_SIZE, Salt, generate_random_key,
};
pub use license_file::{
    BoundPayload, CIPHER_ALGORITHM, DEFAULT_GENERATOR, EncryptedPackage, FORMAT_V1_0, FORMAT_V1_1,
    FileRejection, FileVersion, LicenseFile, LicenseFileValidation, LicenseHeader,
    ValidatedLicense,
};
pub use mac::{MAC_HEX_LEN, MacKey};
pub use manager::LicenseEncryptionManager;
