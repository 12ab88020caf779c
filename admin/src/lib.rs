//! Operator tooling for keysmith.
//!
//! The `keysmith-admin` binary is a thin clap front end over these helpers.

use anyhow::{Context, Result, bail};
use keysmith_crypto::{KeyMaterial, LicenseEncryptionManager, LicenseFileValidation};
use keysmith_license::{
    ActivationCode, ActivationService, BatchUsage, LicensingConfig, TracingAbuseSink,
};
use keysmith_store::SqliteCodeStore;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Loads configuration from `path`, or from the default location when no
/// path is given. Environment overrides apply in both cases.
pub fn load_config(path: Option<&Path>) -> Result<LicensingConfig> {
    let config = match path {
        Some(path) => {
            let mut config = LicensingConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => LicensingConfig::load()?,
    };
    Ok(config)
}

/// Writes fresh key material to `path`. Refuses to replace an existing file
/// unless `force` is set, since every issued code and license file depends
/// on it.
pub fn init_keys(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; rerun with --force to replace it",
            path.display()
        );
    }
    KeyMaterial::generate()
        .save_to_file(path)
        .with_context(|| format!("Failed to write key file {}", path.display()))?;
    info!(path = %path.display(), "Wrote new license key material");
    Ok(())
}

/// Loads the license encryption manager without opening the database.
pub fn load_manager(config: &LicensingConfig) -> Result<LicenseEncryptionManager> {
    let source = config.key_source()?;
    LicenseEncryptionManager::from_source(&source, config.generator.clone())
        .context("Failed to load license key material")
}

/// Opens the code database and builds the activation service.
pub fn open_service(config: &LicensingConfig) -> Result<ActivationService<SqliteCodeStore>> {
    let store = SqliteCodeStore::from_config(&config.store).with_context(|| {
        format!(
            "Failed to open code database {}",
            config.store.database_path.display()
        )
    })?;
    let service =
        ActivationService::from_config(Arc::new(store), config, Arc::new(TracingAbuseSink))?;
    Ok(service)
}

/// Reads and validates a license file.
pub fn verify_file(
    manager: &LicenseEncryptionManager,
    path: &Path,
    hardware_id: Option<&str>,
) -> Result<LicenseFileValidation> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(manager.validate_license_file(&content, hardware_id))
}

/// One-line summary of a code for listings.
#[must_use]
pub fn format_code(code: &ActivationCode) -> String {
    format!(
        "{}  {}  {:<9}  {}/{}  expires {}",
        code.id(),
        code.human_code(),
        code.status().as_str(),
        code.activation_count(),
        code.max_activations(),
        code.expires_at().format("%Y-%m-%d"),
    )
}

/// One-line summary of a batch and its redemption.
#[must_use]
pub fn format_batch(usage: &BatchUsage) -> String {
    let batch = &usage.batch;
    format!(
        "{}  {}  {:<10}  used {}/{}  created {}",
        batch.id,
        batch.name,
        batch.license_type.as_str(),
        usage.used_count,
        batch.count,
        batch.created_at.format("%Y-%m-%d"),
    )
}
