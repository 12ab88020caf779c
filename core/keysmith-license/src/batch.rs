//! Named batches of codes issued together.

use crate::code::{ActivationCode, LicenseType};
use chrono::{DateTime, Utc};
use keysmith_types::{BatchId, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// A group of codes generated by one issuance request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBatch {
    pub id: BatchId,
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub license_type: LicenseType,
    /// Number of codes generated.
    pub count: u32,
    pub max_activations: u32,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub generated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Redemption figures of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUsage {
    pub batch: CodeBatch,
    /// Codes of the batch that have been activated at least once.
    pub used_count: u32,
}

impl BatchUsage {
    /// Counts the used codes among `codes`. Codes from other batches are
    /// ignored.
    #[must_use]
    pub fn tally(batch: CodeBatch, codes: &[ActivationCode]) -> Self {
        let used = codes
            .iter()
            .filter(|c| c.batch_id() == Some(batch.id) && c.activated_at().is_some())
            .count();
        Self {
            used_count: u32::try_from(used).unwrap_or(u32::MAX),
            batch,
        }
    }

    #[must_use]
    pub fn unused_count(&self) -> u32 {
        self.batch.count.saturating_sub(self.used_count)
    }

    /// At least one code of the batch has been redeemed.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used_count > 0
    }
}
