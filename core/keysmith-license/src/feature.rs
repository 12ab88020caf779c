//! Product features and the license types that unlock them.

use crate::code::LicenseType;
use crate::error::{LicenseError, LicenseResult};
use keysmith_types::ProductId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// `[[features]]`: one feature of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseFeature {
    pub product_id: ProductId,
    /// Stable identifier written into license claims.
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// License types the feature is available in.
    #[serde(default = "default_available_in")]
    pub available_in: Vec<LicenseType>,
    /// Usage ceiling enforced by the client; `None` is unlimited.
    #[serde(default)]
    pub max_usage: Option<u32>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub display_order: i32,
}

fn default_available_in() -> Vec<LicenseType> {
    vec![
        LicenseType::Standard,
        LicenseType::Premium,
        LicenseType::Enterprise,
    ]
}

fn default_true() -> bool {
    true
}

impl LicenseFeature {
    /// A feature available in the default license types.
    pub fn new(product_id: ProductId, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            product_id,
            code: code.into(),
            name: name.into(),
            description: None,
            available_in: default_available_in(),
            max_usage: None,
            active: true,
            display_order: 0,
        }
    }

    #[must_use]
    pub fn is_available_for_license_type(&self, license_type: LicenseType) -> bool {
        self.available_in.contains(&license_type)
    }
}

/// Every configured feature, ordered for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureCatalog {
    features: Vec<LicenseFeature>,
}

impl FeatureCatalog {
    /// Builds a catalog. Feature codes must be non-empty and unique per
    /// product.
    pub fn new(mut features: Vec<LicenseFeature>) -> LicenseResult<Self> {
        let mut seen = HashSet::new();
        for feature in &features {
            if feature.code.trim().is_empty() {
                return Err(LicenseError::Config(format!(
                    "[[features]]: feature {:?} has an empty code",
                    feature.name
                )));
            }
            if !seen.insert((feature.product_id, feature.code.clone())) {
                return Err(LicenseError::Config(format!(
                    "[[features]]: duplicate code {} for product {}",
                    feature.code, feature.product_id
                )));
            }
        }
        features.sort_by(|a, b| (a.display_order, &a.name).cmp(&(b.display_order, &b.name)));
        Ok(Self { features })
    }

    /// Features of `product_id`, including inactive ones.
    pub fn for_product(&self, product_id: &ProductId) -> impl Iterator<Item = &LicenseFeature> {
        self.features
            .iter()
            .filter(move |f| f.product_id == *product_id)
    }

    /// Codes of the active features a license of `license_type` unlocks.
    #[must_use]
    pub fn entitlements(&self, product_id: &ProductId, license_type: LicenseType) -> Vec<String> {
        self.for_product(product_id)
            .filter(|f| f.active && f.is_available_for_license_type(license_type))
            .map(|f| f.code.clone())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
