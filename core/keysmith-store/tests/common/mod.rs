//! Shared fixtures for store tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use keysmith_crypto::KeyMaterial;
use keysmith_license::{ActivationCode, CodeBatch, CodeTerms, KeyGenerator, KeyShape, LicenseType};
use keysmith_types::{BatchId, ProductId};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap()
}

pub fn keygen() -> KeyGenerator {
    KeyGenerator::from_material(&KeyMaterial::generate(), KeyShape::DEFAULT).unwrap()
}

/// A GENERATED code expiring `days` after [`now`].
pub fn code_for(product: ProductId, days: i64) -> ActivationCode {
    code_with(product, days, None)
}

fn code_with(product: ProductId, days: i64, batch_id: Option<BatchId>) -> ActivationCode {
    let key = keygen()
        .generate_software_bound_key_at(&product, None, &KeyShape::DEFAULT, now())
        .unwrap();
    let terms = CodeTerms {
        license_type: LicenseType::Trial,
        max_activations: 2,
        concurrent_limit: 1,
        expires_at: now() + Duration::days(days),
        product_version_id: None,
        notes: Some("store fixture".into()),
        batch_id,
    };
    ActivationCode::issue(key, terms, now()).unwrap()
}

pub fn code() -> ActivationCode {
    code_for(ProductId::new(), 30)
}

/// A batch record for `count` codes of `product`.
pub fn batch(product: ProductId, name: &str, count: u32) -> CodeBatch {
    CodeBatch {
        id: BatchId::new(),
        product_id: product,
        name: name.to_string(),
        description: None,
        license_type: LicenseType::Trial,
        count,
        max_activations: 2,
        expires_at: now() + Duration::days(30),
        generated_by: None,
        created_at: now(),
    }
}

/// `batch.count` codes belonging to `batch`.
pub fn batch_codes(batch: &CodeBatch) -> Vec<ActivationCode> {
    (0..batch.count)
        .map(|_| code_with(batch.product_id, 30, Some(batch.id)))
        .collect()
}
