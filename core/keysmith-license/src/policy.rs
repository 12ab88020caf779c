//! Device-change policies and the product registry.

use crate::code::ActivationCode;
use crate::error::LicenseResult;
use keysmith_types::ProductId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of presenting a different device for a bound code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
pub enum DeviceDecision {
    /// Refuse the new device.
    Reject(String),
    /// Move the binding to the new device and warn.
    AllowWithWarning(String),
    /// Hold the activation until the holder completes verification.
    RequireVerification(String),
}

/// Decides what happens when a bound code is presented from another device.
pub trait DeviceChangePolicy: Send + Sync {
    fn decide(&self, code: &ActivationCode, presented_fingerprint: &str) -> DeviceDecision;
}

/// Never allows a device change.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictDevicePolicy;

impl DeviceChangePolicy for StrictDevicePolicy {
    fn decide(&self, _code: &ActivationCode, _presented: &str) -> DeviceDecision {
        DeviceDecision::Reject("Code is bound to a different device".to_string())
    }
}

/// Requires out-of-band verification before moving a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyDevicePolicy {
    pub method: String,
}

impl DeviceChangePolicy for VerifyDevicePolicy {
    fn decide(&self, _code: &ActivationCode, _presented: &str) -> DeviceDecision {
        DeviceDecision::RequireVerification(self.method.clone())
    }
}

/// Moves the binding to the new device with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientDevicePolicy;

impl DeviceChangePolicy for LenientDevicePolicy {
    fn decide(&self, _code: &ActivationCode, _presented: &str) -> DeviceDecision {
        DeviceDecision::AllowWithWarning(
            "Device change detected; the previous device will be unbound".to_string(),
        )
    }
}

/// Availability of a product for activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Inactive,
    Unknown,
}

/// Read-only view of the product catalogue.
pub trait ProductRegistry: Send + Sync {
    /// Returns the product's status. `Err` means the registry itself could
    /// not be consulted.
    fn product_status(&self, product_id: &ProductId) -> LicenseResult<ProductStatus>;
}

/// Registry backed by a fixed list, usually loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProductRegistry {
    products: HashMap<ProductId, bool>,
}

impl StaticProductRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    #[must_use]
    pub fn with_product(mut self, id: ProductId, active: bool) -> Self {
        self.products.insert(id, active);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl ProductRegistry for StaticProductRegistry {
    fn product_status(&self, product_id: &ProductId) -> LicenseResult<ProductStatus> {
        Ok(match self.products.get(product_id) {
            Some(true) => ProductStatus::Active,
            Some(false) => ProductStatus::Inactive,
            None => ProductStatus::Unknown,
        })
    }
}

/// Registry that treats every product as active.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRegistry;

impl ProductRegistry for OpenRegistry {
    fn product_status(&self, _product_id: &ProductId) -> LicenseResult<ProductStatus> {
        Ok(ProductStatus::Active)
    }
}
