//! Key material loading and derivation.
//!
//! A licensing deployment owns exactly two secrets:
//! - the cipher key, used for license-file payload encryption
//! - the MAC key, used for code binding proofs and license-file signatures
//!
//! Both are loaded once from a [`KeySource`] and treated as read-only for the
//! lifetime of the process.

use crate::error::{CryptoError, CryptoResult};
use crate::mac::MacKey;
use argon2::{Argon2, Params, Version};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Size of the encoded key file body: cipher key followed by MAC key.
const MATERIAL_SIZE: usize = KEY_SIZE * 2;

/// A symmetric encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Salt for master-secret derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    /// Generates a random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a salt from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    /// Parses a salt from its hex form (as stored in configuration).
    pub fn from_hex(encoded: &str) -> CryptoResult<Self> {
        let decoded = hex::decode(encoded.trim())
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid salt hex: {e}")))?;
        let bytes: [u8; SALT_SIZE] =
            decoded
                .try_into()
                .map_err(|v: Vec<u8>| CryptoError::InvalidKeyLength {
                    expected: SALT_SIZE,
                    actual: v.len(),
                })?;
        Ok(Self { bytes })
    }

    /// Returns the hex form of the salt.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Returns the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

/// Key derivation parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id (2023)
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Where the process obtains its key material.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum KeySource {
    /// A key file produced by [`KeyMaterial::save_to_file`].
    File { path: PathBuf },
    /// Argon2id derivation from a master secret. Documented fallback for
    /// deployments that cannot distribute a key file; rotating the secret
    /// or the salt invalidates every issued proof and license file.
    MasterSecret {
        secret: String,
        salt: String,
        #[serde(default)]
        kdf: KdfParams,
    },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path } => f.debug_struct("File").field("path", path).finish(),
            Self::MasterSecret { salt, kdf, .. } => f
                .debug_struct("MasterSecret")
                .field("secret", &"[REDACTED]")
                .field("salt", salt)
                .field("kdf", kdf)
                .finish(),
        }
    }
}

/// The cipher key and MAC key used by every licensing component.
#[derive(Clone)]
pub struct KeyMaterial {
    cipher_key: DerivedKey,
    mac_key: MacKey,
}

impl KeyMaterial {
    /// Generates fresh random key material (for operator setup and tests).
    pub fn generate() -> Self {
        let mut cipher = [0u8; KEY_SIZE];
        let mut mac = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut cipher);
        rand::rngs::OsRng.fill_bytes(&mut mac);
        let material = Self::from_bytes(cipher, &mac);
        cipher.zeroize();
        mac.zeroize();
        material
    }

    /// Builds key material from raw parts.
    pub fn from_bytes(cipher_key: [u8; KEY_SIZE], mac_key: &[u8]) -> Self {
        Self {
            cipher_key: DerivedKey::from_bytes(cipher_key),
            mac_key: MacKey::from_bytes(mac_key),
        }
    }

    /// Loads key material from the configured source.
    pub fn load(source: &KeySource) -> CryptoResult<Self> {
        match source {
            KeySource::File { path } => {
                let material = Self::load_from_file(path)?;
                info!(path = %path.display(), "Loaded license key material from file");
                Ok(material)
            }
            KeySource::MasterSecret { secret, salt, kdf } => {
                if secret.is_empty() {
                    return Err(CryptoError::KeyMaterial(
                        "master secret is empty".to_string(),
                    ));
                }
                let salt = Salt::from_hex(salt)?;
                warn!("No key file configured, deriving license key material from master secret");
                Self::derive_from_secret(secret, &salt, kdf)
            }
        }
    }

    /// Derives key material from a master secret using Argon2id.
    pub fn derive_from_secret(secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<Self> {
        let argon2_params = Params::new(
            params.memory_cost,
            params.time_cost,
            params.parallelism,
            Some(MATERIAL_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

        let mut out = [0u8; MATERIAL_SIZE];
        argon2
            .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut out)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let material = Self::split(&out);
        out.zeroize();
        Ok(material)
    }

    /// Reads a key file written by [`KeyMaterial::save_to_file`].
    pub fn load_from_file(path: &Path) -> CryptoResult<Self> {
        if !path.exists() {
            return Err(CryptoError::KeyMaterial(format!(
                "key file not found: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_base64(&contents)
    }

    /// Writes the key material to `path`, creating parent directories.
    ///
    /// On Unix the file is restricted to the owner (mode 600).
    pub fn save_to_file(&self, path: &Path) -> CryptoResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, format!("{}\n", self.to_base64()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Encodes the material as base64 (cipher key then MAC key).
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(MATERIAL_SIZE);
        bytes.extend_from_slice(self.cipher_key.as_bytes());
        bytes.extend_from_slice(self.mac_key.as_bytes());
        let encoded = STANDARD.encode(&bytes);
        bytes.zeroize();
        encoded
    }

    /// Decodes material produced by [`KeyMaterial::to_base64`].
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::KeyMaterial(format!("invalid key file encoding: {e}")))?;

        if bytes.len() != MATERIAL_SIZE {
            let actual = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::InvalidKeyLength {
                expected: MATERIAL_SIZE,
                actual,
            });
        }

        let material = Self::split(&bytes);
        bytes.zeroize();
        Ok(material)
    }

    /// Returns the cipher key.
    pub fn cipher_key(&self) -> &DerivedKey {
        &self.cipher_key
    }

    /// Returns the MAC key.
    pub fn mac_key(&self) -> &MacKey {
        &self.mac_key
    }

    fn split(bytes: &[u8]) -> Self {
        let mut cipher = [0u8; KEY_SIZE];
        cipher.copy_from_slice(&bytes[..KEY_SIZE]);
        let material = Self::from_bytes(cipher, &bytes[KEY_SIZE..MATERIAL_SIZE]);
        cipher.zeroize();
        material
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("cipher_key", &"[REDACTED]")
            .field("mac_key", &"[REDACTED]")
            .finish()
    }
}

/// Generates a random encryption key.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}
