//! Activation code generation and product binding.
//!
//! Human codes are dash-grouped strings drawn from an alphabet without the
//! confusable characters `0`, `O`, `1` and `I`:
//!
//! ```text
//! 7KQ3M-XWZ9A-RT4HP-N2BCD-FJ8LS-EUV6Y
//! ```
//!
//! A software-bound code carries a `proof`: an HMAC over
//! `product_id|code`. Codes cannot be moved to another product without the
//! proof secret.

use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, Utc};
use keysmith_crypto::{KeyMaterial, MacKey};
use keysmith_types::{ProductId, UserId};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::thread;
use tracing::{debug, warn};

/// Alphabet shared by the standard and alphanumeric formats.
pub const STANDARD_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Standard alphabet plus symbols.
pub const EXTENDED_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789!@#$%^&*";

/// Longest supported code, bounded by the SHA-256 digest used for bound
/// derivation.
pub const MAX_KEY_LENGTH: usize = 32;

/// Shapes below this many bits of entropy are accepted with a warning.
pub const MIN_ENTROPY_BITS: f64 = 128.0;

const SEED_SIZE: usize = 32;

/// Character set of a human code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyFormat {
    #[default]
    Standard,
    Alphanum,
    Extended,
}

impl KeyFormat {
    /// Returns the alphabet characters.
    #[must_use]
    pub fn alphabet(&self) -> &'static [u8] {
        match self {
            Self::Standard | Self::Alphanum => STANDARD_ALPHABET.as_bytes(),
            Self::Extended => EXTENDED_ALPHABET.as_bytes(),
        }
    }

    fn contains(&self, c: char) -> bool {
        c.is_ascii() && self.alphabet().contains(&(c as u8))
    }
}

/// Layout of a human code: alphabet, character count and group count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyShape {
    pub format: KeyFormat,
    pub length: usize,
    pub groups: usize,
}

impl KeyShape {
    /// Production default: 30 characters in 5 groups (150 bits).
    pub const DEFAULT: Self = Self {
        format: KeyFormat::Standard,
        length: 30,
        groups: 5,
    };

    /// The 25-character, 4-group layout of earlier releases (125 bits).
    pub const LEGACY: Self = Self {
        format: KeyFormat::Standard,
        length: 25,
        groups: 4,
    };

    /// Creates a shape, checking its bounds.
    pub fn new(format: KeyFormat, length: usize, groups: usize) -> LicenseResult<Self> {
        let shape = Self {
            format,
            length,
            groups,
        };
        shape.check()?;
        Ok(shape)
    }

    /// Checks the shape's bounds.
    pub fn check(&self) -> LicenseResult<()> {
        if self.length == 0 || self.length > MAX_KEY_LENGTH {
            return Err(LicenseError::InvalidKeyFormat(format!(
                "length must be between 1 and {MAX_KEY_LENGTH}, got {}",
                self.length
            )));
        }
        if self.groups == 0 || self.groups > self.length {
            return Err(LicenseError::InvalidKeyFormat(format!(
                "groups must be between 1 and {}, got {}",
                self.length, self.groups
            )));
        }
        Ok(())
    }

    /// Entropy of a uniformly drawn code of this shape.
    #[must_use]
    pub fn entropy_bits(&self) -> f64 {
        self.length as f64 * (self.format.alphabet().len() as f64).log2()
    }

    /// Sizes of each group; the first `length % groups` are one longer.
    pub fn group_lengths(&self) -> impl Iterator<Item = usize> {
        let base = self.length / self.groups;
        let extra = self.length % self.groups;
        (0..self.groups).map(move |i| base + usize::from(i < extra))
    }

    /// Length of the grouped code including dashes.
    #[must_use]
    pub fn formatted_len(&self) -> usize {
        self.length + self.groups - 1
    }
}

impl Default for KeyShape {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A code bound to a product, with its lookup hash and binding proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundKey {
    /// The dash-grouped human code.
    pub key: String,
    /// Lookup digest, see [`hash_code`].
    pub key_hash: String,
    /// Hex HMAC over `product_id|key`.
    pub proof: String,
    pub product_id: ProductId,
    pub issuer_id: Option<UserId>,
    pub generated_at: DateTime<Utc>,
}

/// Generates activation codes and verifies their product binding.
///
/// Holds the proof secret; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    proof_key: MacKey,
    shape: KeyShape,
}

impl KeyGenerator {
    /// Creates a generator with the proof secret and default shape.
    pub fn new(proof_key: MacKey, shape: KeyShape) -> LicenseResult<Self> {
        shape.check()?;
        let bits = shape.entropy_bits();
        if bits < MIN_ENTROPY_BITS {
            warn!(
                bits = bits.floor() as u32,
                length = shape.length,
                "Activation code shape is below 128 bits of entropy"
            );
        }
        Ok(Self { proof_key, shape })
    }

    /// Creates a generator using the MAC key of the deployment's key
    /// material.
    pub fn from_material(material: &KeyMaterial, shape: KeyShape) -> LicenseResult<Self> {
        Self::new(material.mac_key().clone(), shape)
    }

    /// Returns the default shape.
    #[must_use]
    pub fn shape(&self) -> KeyShape {
        self.shape
    }

    /// Draws a code uniformly at random from the OS CSPRNG.
    pub fn generate_secure_key(&self, shape: &KeyShape) -> LicenseResult<String> {
        shape.check()?;
        let alphabet = shape.format.alphabet();
        let mut rng = rand::rngs::OsRng;
        let chars: Vec<u8> = (0..shape.length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        Ok(format_groups(&chars, shape))
    }

    /// Generates a code bound to `product_id` (and optionally the issuer).
    pub fn generate_software_bound_key(
        &self,
        product_id: &ProductId,
        issuer_id: Option<&UserId>,
        shape: &KeyShape,
    ) -> LicenseResult<BoundKey> {
        self.generate_software_bound_key_at(product_id, issuer_id, shape, Utc::now())
    }

    /// [`KeyGenerator::generate_software_bound_key`] with an explicit time.
    pub fn generate_software_bound_key_at(
        &self,
        product_id: &ProductId,
        issuer_id: Option<&UserId>,
        shape: &KeyShape,
        now: DateTime<Utc>,
    ) -> LicenseResult<BoundKey> {
        shape.check()?;

        let mut seed = [0u8; SEED_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut seed);

        let mut derivation = product_id.to_string();
        if let Some(issuer) = issuer_id {
            derivation.push('|');
            derivation.push_str(&issuer.to_string());
        }
        derivation.push('|');
        derivation.push_str(&now.timestamp().to_string());
        derivation.push('|');
        derivation.push_str(&hex::encode(seed));

        let digest = Sha256::digest(derivation.as_bytes());
        let alphabet = shape.format.alphabet();
        // Modulo mapping keeps codes compatible with previously issued ones.
        let chars: Vec<u8> = digest[..shape.length]
            .iter()
            .map(|b| alphabet[usize::from(*b) % alphabet.len()])
            .collect();

        let key = format_groups(&chars, shape);
        Ok(BoundKey {
            key_hash: hash_code(&key),
            proof: self.proof(product_id, &key),
            key,
            product_id: *product_id,
            issuer_id: issuer_id.copied(),
            generated_at: now,
        })
    }

    /// Checks a code's binding proof in constant time.
    #[must_use]
    pub fn verify_software_binding(&self, key: &str, product_id: &ProductId, proof: &str) -> bool {
        let product = product_id.to_string();
        self.proof_key
            .verify_parts(&[product.as_bytes(), b"|", key.as_bytes()], proof)
    }

    /// Generates `count` independent bound codes on scoped worker threads.
    pub fn generate_batch_keys(
        &self,
        product_id: &ProductId,
        count: usize,
        issuer_id: Option<&UserId>,
        shape: &KeyShape,
    ) -> LicenseResult<Vec<BoundKey>> {
        shape.check()?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(count);
        let per_worker = count.div_ceil(workers);
        let now = Utc::now();

        let results: Vec<LicenseResult<Vec<BoundKey>>> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|w| {
                    let n = per_worker.min(count.saturating_sub(w * per_worker));
                    s.spawn(move || {
                        (0..n)
                            .map(|_| {
                                self.generate_software_bound_key_at(
                                    product_id, issuer_id, shape, now,
                                )
                            })
                            .collect::<LicenseResult<Vec<_>>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(LicenseError::InvalidTerms(
                            "key generation worker panicked".to_string(),
                        ))
                    })
                })
                .collect()
        });

        let mut keys = Vec::with_capacity(count);
        for chunk in results {
            keys.extend(chunk?);
        }
        debug!(product_id = %product_id, count = keys.len(), workers, "Generated key batch");
        Ok(keys)
    }

    /// Structural check of a grouped code: group layout, length and
    /// alphabet. Lowercase input is rejected; see
    /// [`KeyGenerator::normalize_human_code`].
    #[must_use]
    pub fn validate_key_format(key: &str, shape: &KeyShape) -> bool {
        if shape.check().is_err() || key.len() != shape.formatted_len() {
            return false;
        }
        let groups: Vec<&str> = key.split('-').collect();
        if groups.len() != shape.groups {
            return false;
        }
        groups
            .iter()
            .zip(shape.group_lengths())
            .all(|(group, len)| {
                group.chars().count() == len && group.chars().all(|c| shape.format.contains(c))
            })
    }

    /// Normalizes typed input into the grouped form: trims, upper-cases,
    /// drops dashes and whitespace, then regroups. Returns `None` if the
    /// result is not a well-formed code.
    #[must_use]
    pub fn normalize_human_code(input: &str, shape: &KeyShape) -> Option<String> {
        if !input.is_ascii() {
            return None;
        }
        let compact: Vec<u8> = input
            .bytes()
            .filter(|b| *b != b'-' && !b.is_ascii_whitespace())
            .map(|b| b.to_ascii_uppercase())
            .collect();
        if compact.len() != shape.length {
            return None;
        }
        let grouped = format_groups(&compact, shape);
        Self::validate_key_format(&grouped, shape).then_some(grouped)
    }

    fn proof(&self, product_id: &ProductId, key: &str) -> String {
        let product = product_id.to_string();
        self.proof_key
            .sign_parts(&[product.as_bytes(), b"|", key.as_bytes()])
    }
}

/// Lookup digest of a grouped code: hex SHA-256.
#[must_use]
pub fn hash_code(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn format_groups(chars: &[u8], shape: &KeyShape) -> String {
    let mut out = String::with_capacity(shape.formatted_len());
    let mut offset = 0;
    for (i, len) in shape.group_lengths().enumerate() {
        if i > 0 {
            out.push('-');
        }
        out.extend(chars[offset..offset + len].iter().map(|b| char::from(*b)));
        offset += len;
    }
    out
}
