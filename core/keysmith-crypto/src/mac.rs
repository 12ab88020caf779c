//! Keyed message authentication (HMAC-SHA256).
//!
//! Used for activation-code binding proofs and for the outer signature of
//! v1.1 license files. Digests travel as lowercase hex.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded HMAC-SHA256 digest.
pub const MAC_HEX_LEN: usize = 64;

/// Secret key for HMAC signing. Any length is accepted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MacKey {
    bytes: Vec<u8>,
}

impl MacKey {
    /// Creates a MAC key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Signs `message` and returns the hex digest.
    pub fn sign(&self, message: &[u8]) -> String {
        self.sign_parts(&[message])
    }

    /// Signs the concatenation of `parts` without allocating the joined
    /// message.
    pub fn sign_parts(&self, parts: &[&[u8]]) -> String {
        let mut mac = self.hmac();
        for part in parts {
            mac.update(part);
        }
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verifies a hex digest in constant time.
    pub fn verify(&self, message: &[u8], expected_hex: &str) -> bool {
        self.verify_parts(&[message], expected_hex)
    }

    /// Verifies a hex digest over the concatenation of `parts` in constant
    /// time.
    pub fn verify_parts(&self, parts: &[&[u8]], expected_hex: &str) -> bool {
        let computed = self.sign_parts(parts);
        let provided = expected_hex.as_bytes();

        // Digest length is public (always 64 hex chars)
        if provided.len() != computed.len() {
            return false;
        }

        computed.as_bytes().ct_eq(provided).into()
    }

    fn hmac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        match <HmacSha256 as Mac>::new_from_slice(&self.bytes) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
        }
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
