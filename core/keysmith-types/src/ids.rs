//! Identifier types used throughout keysmith.
//!
//! Records created by the licensing core (codes, batches, audit rows) use
//! UUID v7 so they sort by creation time. Identifiers owned by the
//! surrounding platform (products, users) are plain UUIDs; `new()` mints a
//! random v4 for tests and tooling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $ctor:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new() -> Self {
                Self($ctor)
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses an identifier from a string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an activation code.
    CodeId,
    Uuid::now_v7()
);

uuid_id!(
    /// Unique identifier for a batch of codes issued together.
    BatchId,
    Uuid::now_v7()
);

uuid_id!(
    /// Unique identifier for an activation or revocation audit row.
    LogId,
    Uuid::now_v7()
);

uuid_id!(
    /// Identifier of the product (software) a code is bound to.
    ProductId,
    Uuid::new_v4()
);

uuid_id!(
    /// Identifier of a specific product release.
    ProductVersionId,
    Uuid::new_v4()
);

uuid_id!(
    /// Identifier of a platform user (owner, issuer or administrator).
    UserId,
    Uuid::new_v4()
);
