use chrono::Utc;
use keysmith_admin::{
    format_batch, format_code, init_keys, load_config, load_manager, open_service, verify_file,
};
use keysmith_crypto::{FileRejection, KeyMaterial};
use keysmith_license::{
    ActivationRequest, ActivationResult, CodeStatus, DeviceInfo, IssueRequest, LicensingConfig,
};
use keysmith_types::ProductId;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Config with a fresh key file and database inside `dir`.
fn config_in(dir: &Path) -> LicensingConfig {
    let key_file = dir.join("keys").join("keysmith.key");
    init_keys(&key_file, false).unwrap();

    let mut config = LicensingConfig::default();
    config.key_material.key_file = Some(key_file);
    config.store.database_path = dir.join("codes.db");
    config
}

// ── init-keys ────────────────────────────────────────────────────

#[test]
fn init_keys_writes_loadable_material() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("keysmith.key");

    init_keys(&path, false).unwrap();

    assert!(KeyMaterial::load_from_file(&path).is_ok());
}

#[test]
fn init_keys_refuses_to_overwrite_without_force() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keysmith.key");
    init_keys(&path, false).unwrap();
    let original = fs::read_to_string(&path).unwrap();

    let err = init_keys(&path, false).unwrap_err();
    assert!(err.to_string().contains("--force"));
    assert_eq!(fs::read_to_string(&path).unwrap(), original);

    init_keys(&path, true).unwrap();
    assert_ne!(fs::read_to_string(&path).unwrap(), original);
}

// ── Configuration ────────────────────────────────────────────────

#[test]
fn missing_config_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.store, LicensingConfig::default().store);
}

#[test]
fn config_file_is_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keysmith.toml");
    fs::write(
        &path,
        "[issuance]\nmax_activations = 4\n\n[keys]\nlength = 24\ngroups = 4\n",
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();

    assert_eq!(config.issuance.max_activations, 4);
    assert_eq!(config.keys.length, 24);
}

#[test]
fn invalid_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keysmith.toml");
    fs::write(&path, "[issuance]\nmax_activations = 0\n").unwrap();

    assert!(load_config(Some(&path)).is_err());
}

#[test]
fn service_requires_key_material() {
    let dir = TempDir::new().unwrap();
    let mut config = LicensingConfig::default();
    config.store.database_path = dir.path().join("codes.db");

    assert!(open_service(&config).is_err());
    assert!(load_manager(&config).is_err());
}

// ── Issue, activate, verify ──────────────────────────────────────

#[test]
fn issued_codes_survive_reopening() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let product = ProductId::new();

    let issued = open_service(&config)
        .unwrap()
        .issue_codes(&IssueRequest::new(product, 3), Utc::now())
        .unwrap();

    let service = open_service(&config).unwrap();
    let listed = service
        .store()
        .list_codes(Some(&product), Some(CodeStatus::Generated))
        .unwrap();
    assert_eq!(listed.len(), 3);
    for code in &issued {
        assert_eq!(service.find_code(code.human_code()).unwrap().id(), code.id());
    }
}

#[test]
fn activation_license_file_verifies_offline() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let service = open_service(&config).unwrap();
    let now = Utc::now();
    let code = service
        .issue_codes(&IssueRequest::new(ProductId::new(), 1), now)
        .unwrap()
        .remove(0);

    let request = ActivationRequest {
        code: code.human_code().to_lowercase(),
        device: DeviceInfo::new("fp-workstation"),
        ip_address: None,
        user_id: None,
    };
    let ActivationResult::Activated(receipt) = service.activate(&request, now).unwrap() else {
        panic!("activation was not granted");
    };
    let path = dir.path().join("license.json");
    fs::write(&path, &receipt.license_file).unwrap();

    // Verification needs only the key material, not the database.
    let manager = load_manager(&config).unwrap();

    let ok = verify_file(&manager, &path, Some("fp-workstation")).unwrap();
    assert!(ok.valid);
    assert_eq!(ok.data.unwrap()["code_id"], code.id().to_string());

    let moved = verify_file(&manager, &path, Some("fp-other")).unwrap();
    assert!(!moved.valid);
    assert_eq!(moved.error, Some(FileRejection::HardwareMismatch));
}

#[test]
fn verify_file_reports_unreadable_path() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let manager = load_manager(&config).unwrap();

    assert!(verify_file(&manager, &dir.path().join("nope.json"), None).is_err());
}

#[test]
fn foreign_license_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ours = config_in(&dir.path().join("ours"));
    let theirs = config_in(&dir.path().join("theirs"));

    let foreign = load_manager(&theirs)
        .unwrap()
        .create_license_file_with_binding(&serde_json::json!({"product": "x"}), Some("fp"), 30)
        .unwrap();
    let path = dir.path().join("foreign.json");
    fs::write(&path, foreign).unwrap();

    let result = verify_file(&load_manager(&ours).unwrap(), &path, Some("fp")).unwrap();
    assert!(!result.valid);
    assert_eq!(result.error, Some(FileRejection::Tampered));
}

// ── Output ───────────────────────────────────────────────────────

#[test]
fn format_code_summarizes_the_row() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let code = open_service(&config)
        .unwrap()
        .issue_codes(&IssueRequest::new(ProductId::new(), 1), Utc::now())
        .unwrap()
        .remove(0);

    let line = format_code(&code);

    assert!(line.starts_with(&code.id().to_string()));
    assert!(line.contains(code.human_code()));
    assert!(line.contains("GENERATED"));
    assert!(line.contains("0/1"));
}

#[test]
fn format_batch_shows_redemption() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let service = open_service(&config).unwrap();
    let mut request = IssueRequest::new(ProductId::new(), 2);
    request.batch_name = Some("spring promo".into());
    let codes = service.issue_codes(&request, Utc::now()).unwrap();

    let usage = open_service(&config)
        .unwrap()
        .batch_usage(&codes[0].batch_id().unwrap())
        .unwrap();
    let line = format_batch(&usage);

    assert!(line.starts_with(&usage.batch.id.to_string()));
    assert!(line.contains("spring promo"));
    assert!(line.contains("STANDARD"));
    assert!(line.contains("used 0/2"));
}
