//! Licensing configuration, read from `keysmith.toml`.
//!
//! ```toml
//! generator = "keysmith"
//!
//! [keys]
//! format = "STANDARD"
//! length = 30
//! groups = 5
//!
//! [issuance]
//! default_expiry_days = 365
//! max_activations = 1
//!
//! [key_material]
//! key_file = "/etc/keysmith/license.key"
//!
//! [device]
//! policy = "verify"
//! verification_method = "email"
//!
//! [store]
//! database_path = "/var/lib/keysmith/codes.db"
//!
//! [[products]]
//! id = "6f1c2b1e-8a53-4d8f-9a57-0c1f4c0e8b2a"
//! name = "Atlas Pro"
//!
//! [[features]]
//! product_id = "6f1c2b1e-8a53-4d8f-9a57-0c1f4c0e8b2a"
//! code = "export"
//! name = "PDF export"
//! available_in = ["PREMIUM", "ENTERPRISE"]
//! ```
//!
//! Every section is optional. `KEYSMITH_CONFIG` overrides the file path and
//! `KEYSMITH_MASTER_SECRET` supplies the master secret without writing it to
//! disk.

use crate::code::LicenseType;
use crate::error::{LicenseError, LicenseResult};
use crate::feature::{FeatureCatalog, LicenseFeature};
use crate::keygen::{KeyFormat, KeyShape};
use crate::policy::{
    DeviceChangePolicy, LenientDevicePolicy, OpenRegistry, ProductRegistry, StaticProductRegistry,
    StrictDevicePolicy, VerifyDevicePolicy,
};
use keysmith_crypto::{DEFAULT_GENERATOR, KdfParams, KeySource};
use keysmith_types::ProductId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "KEYSMITH_CONFIG";

/// Environment variable carrying the master secret.
pub const MASTER_SECRET_ENV: &str = "KEYSMITH_MASTER_SECRET";

/// Configuration file read when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "keysmith.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicensingConfig {
    /// Generator name written into and required in license-file headers.
    #[serde(default = "default_generator")]
    pub generator: String,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub issuance: IssuanceConfig,
    #[serde(default)]
    pub key_material: KeyMaterialConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
    #[serde(default)]
    pub features: Vec<LicenseFeature>,
}

/// `[keys]`: shape of newly issued codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default)]
    pub format: KeyFormat,
    #[serde(default = "default_key_length")]
    pub length: usize,
    #[serde(default = "default_key_groups")]
    pub groups: usize,
}

/// `[issuance]`: defaults applied when a request leaves a term unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceConfig {
    #[serde(default)]
    pub license_type: LicenseType,
    #[serde(default = "default_expiry_days")]
    pub default_expiry_days: i64,
    #[serde(default = "default_one")]
    pub max_activations: u32,
    #[serde(default = "default_one")]
    pub concurrent_limit: u32,
    /// Longest validity of a license file handed out on activation.
    #[serde(default = "default_license_file_days")]
    pub license_file_days: i64,
}

/// `[key_material]`: where the cipher and MAC keys come from.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterialConfig {
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub master_secret: Option<String>,
    /// Hex salt for master-secret derivation.
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl fmt::Debug for KeyMaterialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterialConfig")
            .field("key_file", &self.key_file)
            .field(
                "master_secret",
                &self.master_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("salt", &self.salt)
            .field("kdf", &self.kdf)
            .finish()
    }
}

/// Device-change policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePolicyKind {
    #[default]
    Strict,
    Verify,
    Lenient,
}

/// `[device]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub policy: DevicePolicyKind,
    #[serde(default = "default_verification_method")]
    pub verification_method: String,
}

/// `[store]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Retries of a transition that lost a race with another writer.
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// `[[products]]`: static product registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductConfig {
    pub id: ProductId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_generator() -> String {
    DEFAULT_GENERATOR.to_string()
}

fn default_key_length() -> usize {
    KeyShape::DEFAULT.length
}

fn default_key_groups() -> usize {
    KeyShape::DEFAULT.groups
}

fn default_expiry_days() -> i64 {
    365
}

fn default_license_file_days() -> i64 {
    365
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_verification_method() -> String {
    "email".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("keysmith.db")
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            generator: default_generator(),
            keys: KeysConfig::default(),
            issuance: IssuanceConfig::default(),
            key_material: KeyMaterialConfig::default(),
            device: DeviceConfig::default(),
            store: StoreConfig::default(),
            products: Vec::new(),
            features: Vec::new(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            format: KeyShape::DEFAULT.format,
            length: default_key_length(),
            groups: default_key_groups(),
        }
    }
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            license_type: LicenseType::default(),
            default_expiry_days: default_expiry_days(),
            max_activations: default_one(),
            concurrent_limit: default_one(),
            license_file_days: default_license_file_days(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            policy: DevicePolicyKind::default(),
            verification_method: default_verification_method(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_conflict_retries: default_conflict_retries(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl LicensingConfig {
    /// Loads configuration from `KEYSMITH_CONFIG` (or `keysmith.toml`) and
    /// applies environment overrides.
    pub fn load() -> LicenseResult<Self> {
        Self::load_with_env(|key| std::env::var(key).ok())
    }

    /// [`LicensingConfig::load`] with an explicit environment lookup.
    pub fn load_with_env(env: impl Fn(&str) -> Option<String>) -> LicenseResult<Self> {
        let path = env(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(env);
        Ok(config)
    }

    /// Loads configuration from `path`.
    ///
    /// A missing file yields the defaults; an unreadable or invalid file is
    /// an error.
    pub fn load_from(path: &Path) -> LicenseResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LicenseError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            LicenseError::Config(msg) => LicenseError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        info!(path = %path.display(), "Loaded licensing config");
        Ok(config)
    }

    /// Parses and checks a TOML document.
    pub fn from_toml_str(contents: &str) -> LicenseResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| LicenseError::Config(format!("invalid config: {e}")))?;
        config.check()?;
        Ok(config)
    }

    /// Applies environment overrides. Currently only the master secret.
    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = env(MASTER_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.key_material.master_secret = Some(secret);
        }
    }

    /// Checks cross-field constraints.
    pub fn check(&self) -> LicenseResult<()> {
        if self.generator.trim().is_empty() {
            return Err(LicenseError::Config("generator must not be empty".to_string()));
        }
        self.key_shape()
            .map_err(|e| LicenseError::Config(format!("[keys]: {e}")))?;
        if self.issuance.max_activations == 0 || self.issuance.concurrent_limit == 0 {
            return Err(LicenseError::Config(
                "[issuance]: max_activations and concurrent_limit must be at least 1".to_string(),
            ));
        }
        if self.issuance.default_expiry_days <= 0 || self.issuance.license_file_days <= 0 {
            return Err(LicenseError::Config(
                "[issuance]: expiry periods must be positive".to_string(),
            ));
        }
        self.feature_catalog()?;
        Ok(())
    }

    /// The configured code shape.
    pub fn key_shape(&self) -> LicenseResult<KeyShape> {
        KeyShape::new(self.keys.format, self.keys.length, self.keys.groups)
    }

    /// Resolves the key material source. A key file wins over a master
    /// secret.
    pub fn key_source(&self) -> LicenseResult<KeySource> {
        let km = &self.key_material;
        if let Some(path) = &km.key_file {
            return Ok(KeySource::File { path: path.clone() });
        }
        match (&km.master_secret, &km.salt) {
            (Some(secret), Some(salt)) => Ok(KeySource::MasterSecret {
                secret: secret.clone(),
                salt: salt.clone(),
                kdf: km.kdf.clone(),
            }),
            (Some(_), None) => Err(LicenseError::Config(
                "[key_material]: master_secret requires a salt".to_string(),
            )),
            _ => Err(LicenseError::Config(format!(
                "[key_material]: set key_file, or master_secret and salt (or {MASTER_SECRET_ENV})"
            ))),
        }
    }

    /// Builds the configured device-change policy.
    #[must_use]
    pub fn device_policy(&self) -> Arc<dyn DeviceChangePolicy> {
        match self.device.policy {
            DevicePolicyKind::Strict => Arc::new(StrictDevicePolicy),
            DevicePolicyKind::Verify => Arc::new(VerifyDevicePolicy {
                method: self.device.verification_method.clone(),
            }),
            DevicePolicyKind::Lenient => Arc::new(LenientDevicePolicy),
        }
    }

    /// Builds the feature catalog from `[[features]]`.
    pub fn feature_catalog(&self) -> LicenseResult<FeatureCatalog> {
        FeatureCatalog::new(self.features.clone())
    }

    /// Builds the product registry. Without `[[products]]` every product is
    /// treated as active.
    #[must_use]
    pub fn product_registry(&self) -> Arc<dyn ProductRegistry> {
        if self.products.is_empty() {
            info!("No products configured, accepting every product id");
            return Arc::new(OpenRegistry);
        }
        Arc::new(
            self.products
                .iter()
                .fold(StaticProductRegistry::new(), |registry, p| {
                    registry.with_product(p.id, p.active)
                }),
        )
    }
}
