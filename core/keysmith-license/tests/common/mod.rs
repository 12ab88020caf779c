//! Shared fixtures for licensing tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use keysmith_crypto::{KeyMaterial, LicenseEncryptionManager};
use keysmith_license::{
    AbuseSink, ActivationCode, ActivationLog, ActivationRequest, ActivationService, AuditRecord,
    BindingFailure, CodeTerms, DeviceInfo, DevicePolicyKind, IssueRequest, KeyGenerator, KeyShape,
    LicenseType, LicensingConfig, MemoryCodeStore,
};
use keysmith_types::ProductId;
use std::sync::{Arc, Mutex};

/// Fixed clock for deterministic tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn manager() -> Arc<LicenseEncryptionManager> {
    Arc::new(LicenseEncryptionManager::new(
        KeyMaterial::generate(),
        "keysmith",
    ))
}

pub fn keygen() -> KeyGenerator {
    KeyGenerator::from_material(&KeyMaterial::generate(), KeyShape::DEFAULT).unwrap()
}

pub fn terms(max_activations: u32) -> CodeTerms {
    CodeTerms {
        license_type: LicenseType::Standard,
        max_activations,
        concurrent_limit: 1,
        expires_at: now() + chrono::Duration::days(30),
        product_version_id: None,
        notes: None,
        batch_id: None,
    }
}

/// A GENERATED code signed by `keygen`.
pub fn fresh_code(keygen: &KeyGenerator, product: ProductId, max_activations: u32) -> ActivationCode {
    let key = keygen
        .generate_software_bound_key_at(&product, None, &KeyShape::DEFAULT, now())
        .unwrap();
    ActivationCode::issue(key, terms(max_activations), now()).unwrap()
}

pub fn device(fingerprint: &str) -> DeviceInfo {
    DeviceInfo::new(fingerprint).with_name(format!("{fingerprint}-laptop"))
}

pub fn request(code: &ActivationCode, fingerprint: &str) -> ActivationRequest {
    ActivationRequest {
        code: code.human_code().to_string(),
        device: device(fingerprint),
        ip_address: Some("203.0.113.7".to_string()),
        user_id: None,
    }
}

/// Abuse sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<AuditRecord>>,
    pub failures: Mutex<Vec<BindingFailure>>,
}

impl RecordingSink {
    pub fn activation_rows(&self) -> Vec<ActivationLog> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| match r {
                AuditRecord::Activation(log) => Some(log.clone()),
                AuditRecord::Revocation(_) => None,
            })
            .collect()
    }

    pub fn binding_failures(&self) -> usize {
        self.failures.lock().unwrap().len()
    }
}

impl AbuseSink for RecordingSink {
    fn record(&self, record: &AuditRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn binding_failure(&self, failure: &BindingFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}

pub fn config(policy: DevicePolicyKind) -> LicensingConfig {
    let mut config = LicensingConfig::default();
    config.device.policy = policy;
    config
}

pub struct Harness {
    pub service: ActivationService<MemoryCodeStore>,
    pub sink: Arc<RecordingSink>,
    pub product: ProductId,
}

pub fn harness(policy: DevicePolicyKind) -> Harness {
    harness_with(config(policy))
}

pub fn harness_with(config: LicensingConfig) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let service = ActivationService::new(
        Arc::new(MemoryCodeStore::new()),
        &config,
        manager(),
        sink.clone(),
    )
    .unwrap();
    Harness {
        service,
        sink,
        product: ProductId::new(),
    }
}

impl Harness {
    /// Issues one code with the given activation ceiling.
    pub fn issue(&self, max_activations: u32) -> ActivationCode {
        let mut request = IssueRequest::new(self.product, 1);
        request.max_activations = Some(max_activations);
        self.service
            .issue_codes(&request, now())
            .unwrap()
            .remove(0)
    }
}
