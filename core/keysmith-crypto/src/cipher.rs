//! Sealing license payloads into [`EncryptedPackage`]s.
//!
//! A package carries the compact JSON of a payload encrypted with
//! ChaCha20-Poly1305 under the deployment cipher key. The wire form of
//! `encrypted_data` is URL-safe base64 of `nonce || ciphertext || tag`.
//! Opening fails closed: a wrong label, bad encoding, failed authentication
//! or a payload of the wrong shape all yield `Err` and no data.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use crate::license_file::{CIPHER_ALGORITHM, EncryptedPackage};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Nonce length of ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag length.
pub const TAG_SIZE: usize = 16;

/// Encrypts the compact JSON of `payload` into a package stamped with `now`.
pub fn seal<T: Serialize + ?Sized>(
    key: &DerivedKey,
    payload: &T,
    now: DateTime<Utc>,
) -> CryptoResult<EncryptedPackage> {
    let json = serde_json::to_vec(payload)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let sealed = aead(key)
        .encrypt(Nonce::from_slice(&nonce), json.as_slice())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut wire = Vec::with_capacity(NONCE_SIZE + sealed.len());
    wire.extend_from_slice(&nonce);
    wire.extend_from_slice(&sealed);

    Ok(EncryptedPackage {
        encrypted_data: URL_SAFE.encode(wire),
        algorithm: CIPHER_ALGORITHM.to_string(),
        timestamp: now.timestamp(),
    })
}

/// Decrypts `package` and parses the payload as `T`.
pub fn open<T: DeserializeOwned>(key: &DerivedKey, package: &EncryptedPackage) -> CryptoResult<T> {
    if package.algorithm != CIPHER_ALGORITHM {
        return Err(CryptoError::Decryption(format!(
            "unsupported algorithm: {}",
            package.algorithm
        )));
    }

    let wire = URL_SAFE
        .decode(&package.encrypted_data)
        .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;
    if wire.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decryption("encrypted data too short".to_string()));
    }
    let (nonce, sealed) = wire.split_at(NONCE_SIZE);

    let json = aead(key)
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| {
            CryptoError::Decryption("authentication failed (wrong key or tampered data)".into())
        })?;
    Ok(serde_json::from_slice(&json)?)
}

fn aead(key: &DerivedKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(key.as_bytes().into())
}
