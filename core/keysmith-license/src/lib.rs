//! Activation codes for keysmith.
//!
//! This crate handles:
//! - Generating human-enterable codes bound to a product by an HMAC proof
//! - The activation code lifecycle (activate, revoke, suspend, expire)
//! - Pre-activation validation and device-change policy
//! - Issuing license files on successful activation
//!
//! # Code Format
//!
//! Codes are drawn from an unambiguous alphabet (no `I`, `O`, `0`, `1`) and
//! rendered in dash-separated groups, e.g. `ABCDEF-GHJKLM-NPQRST-UVWXYZ-234567`.
//! Lookups go through the SHA-256 of the canonical grouped form, dashes
//! included, after input is normalized to upper case and regrouped.
//!
//! # State Machine
//!
//! Every transition runs through [`ActivationCode`] inside a
//! [`CodeStore::transition`], so the entity and its audit rows commit
//! together and concurrent activations cannot exceed `max_activations`.

mod batch;
mod code;
mod config;
mod device;
mod error;
mod feature;
mod keygen;
mod log;
mod policy;
mod service;
mod store;
mod validation;

pub use batch::{BatchUsage, CodeBatch};
pub use code::{
    ActivationCode, CodeState, CodeStatus, CodeTerms, DeviceBinding, LicenseType, Revocation,
};
pub use config::{
    CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE, DeviceConfig, DevicePolicyKind, IssuanceConfig,
    KeyMaterialConfig, KeysConfig, LicensingConfig, MASTER_SECRET_ENV, ProductConfig, StoreConfig,
};
pub use device::{DeviceInfo, FingerprintProvider, HostFingerprint, RequestSignals};
pub use error::{ErrorKind, LicenseError, LicenseResult};
pub use feature::{FeatureCatalog, LicenseFeature};
pub use keygen::{
    BoundKey, EXTENDED_ALPHABET, KeyFormat, KeyGenerator, KeyShape, MAX_KEY_LENGTH,
    MIN_ENTROPY_BITS, STANDARD_ALPHABET, hash_code,
};
pub use log::{
    AbuseSink, ActivationAction, ActivationLog, AuditRecord, AuditTrail, BindingFailure,
    RevocationLog, TracingAbuseSink,
};
pub use policy::{
    DeviceChangePolicy, DeviceDecision, LenientDevicePolicy, OpenRegistry, ProductRegistry,
    ProductStatus, StaticProductRegistry, StrictDevicePolicy, VerifyDevicePolicy,
};
pub use service::{
    ActivationReceipt, ActivationRequest, ActivationResult, ActivationService, IssueRequest,
    LicenseClaims, MAX_BATCH_SIZE,
};
pub use store::{CodeStore, MemoryCodeStore, Transition};
pub use validation::{Rejection, ValidationEngine, ValidationOutcome};
