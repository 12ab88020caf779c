mod common;

use chrono::Duration;
use common::{device, fresh_code, keygen, now};
use keysmith_license::{
    ActivationCode, DeviceChangePolicy, KeyGenerator, LenientDevicePolicy, LicenseError,
    LicenseResult, OpenRegistry, ProductRegistry, ProductStatus, Rejection, StaticProductRegistry,
    StrictDevicePolicy, ValidationEngine, ValidationOutcome, VerifyDevicePolicy,
};
use keysmith_types::ProductId;
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Fixture {
    keygen: Arc<KeyGenerator>,
    product: ProductId,
}

impl Fixture {
    fn new() -> Self {
        Self {
            keygen: Arc::new(keygen()),
            product: ProductId::new(),
        }
    }

    fn engine(
        &self,
        registry: Arc<dyn ProductRegistry>,
        policy: Arc<dyn DeviceChangePolicy>,
    ) -> ValidationEngine {
        ValidationEngine::new(self.keygen.clone(), registry, policy)
    }

    fn strict(&self) -> ValidationEngine {
        self.engine(Arc::new(OpenRegistry), Arc::new(StrictDevicePolicy))
    }

    fn code(&self, max_activations: u32) -> ActivationCode {
        fresh_code(&self.keygen, self.product, max_activations)
    }

    fn bound_code(&self) -> ActivationCode {
        let mut code = self.code(3);
        code.activate(&device("D1"), None, now()).unwrap();
        code
    }
}

fn check(engine: &ValidationEngine, code: &ActivationCode, fp: Option<&str>) -> ValidationOutcome {
    engine
        .validate_for_activation(code, fp, Some("192.0.2.10"), now())
        .unwrap()
}

#[test]
fn fresh_code_is_valid() {
    let fx = Fixture::new();
    let outcome = check(&fx.strict(), &fx.code(1), Some("D1"));
    assert!(outcome.valid);
    assert!(outcome.can_activate);
    assert!(outcome.errors.is_empty());
    assert!(outcome.warnings.is_empty());
    assert!(!outcome.requires_verification);
    assert_eq!(outcome.error_summary(), "");
}

#[test]
fn collects_every_state_failure() {
    let fx = Fixture::new();
    let mut code = fx.code(1);
    code.activate(&device("D1"), None, now()).unwrap();

    let late = code.expires_at() + Duration::days(1);
    let outcome = fx
        .strict()
        .validate_for_activation(&code, Some("D1"), None, late)
        .unwrap();

    assert!(!outcome.valid);
    assert!(!outcome.can_activate);
    assert_eq!(
        outcome.errors,
        vec![Rejection::Expired, Rejection::ActivationLimitReached(1)]
    );
    assert_eq!(
        outcome.error_summary(),
        "Activation code has expired; Maximum activations reached (1)"
    );
}

#[test]
fn revoked_and_suspended() {
    let fx = Fixture::new();
    let engine = fx.strict();

    let mut revoked = fx.code(1);
    revoked.revoke(None, "refund", now()).unwrap();
    assert_eq!(
        check(&engine, &revoked, None).errors,
        vec![Rejection::Revoked]
    );

    let mut suspended = fx.code(1);
    suspended.suspend("review", now()).unwrap();
    assert_eq!(
        check(&engine, &suspended, None).errors,
        vec![Rejection::Suspended]
    );
}

#[test]
fn foreign_proof_carries_a_binding_failure() {
    let fx = Fixture::new();
    // Issued under another deployment's secret
    let foreign = fresh_code(&keygen(), fx.product, 1);

    let outcome = check(&fx.strict(), &foreign, Some("D1"));
    assert!(!outcome.valid);
    assert!(outcome.binding_failed());
    assert_eq!(outcome.errors, vec![Rejection::BindingProofInvalid]);

    let failure = outcome.binding_failure.clone().unwrap();
    assert_eq!(failure.code_id, foreign.id());
    assert_eq!(failure.product_id, fx.product);
    assert_eq!(failure.ip_address.as_deref(), Some("192.0.2.10"));
    assert_eq!(failure.detected_at, now());

    // Internal signal only; never part of the serialized response
    let json = serde_json::to_value(&outcome).unwrap();
    assert!(json.get("binding_failure").is_none());
}

#[test]
fn valid_proof_has_no_binding_failure() {
    let fx = Fixture::new();
    let outcome = check(&fx.strict(), &fx.code(1), None);
    assert_eq!(outcome.binding_failure, None);
}

#[test]
fn inactive_and_unknown_products() {
    let fx = Fixture::new();
    let inactive = StaticProductRegistry::new().with_product(fx.product, false);
    let engine = fx.engine(Arc::new(inactive), Arc::new(StrictDevicePolicy));
    assert_eq!(
        check(&engine, &fx.code(1), None).errors,
        vec![Rejection::ProductUnavailable]
    );

    let unrelated = StaticProductRegistry::new().with_product(ProductId::new(), true);
    let engine = fx.engine(Arc::new(unrelated), Arc::new(StrictDevicePolicy));
    assert_eq!(
        check(&engine, &fx.code(1), None).errors,
        vec![Rejection::ProductUnavailable]
    );

    let active = StaticProductRegistry::new().with_product(fx.product, true);
    let engine = fx.engine(Arc::new(active), Arc::new(StrictDevicePolicy));
    assert!(check(&engine, &fx.code(1), None).valid);
}

struct BrokenRegistry;

impl ProductRegistry for BrokenRegistry {
    fn product_status(&self, _product_id: &ProductId) -> LicenseResult<ProductStatus> {
        Err(LicenseError::Registry("catalogue offline".to_string()))
    }
}

#[test]
fn registry_failure_is_an_error() {
    let fx = Fixture::new();
    let engine = fx.engine(Arc::new(BrokenRegistry), Arc::new(StrictDevicePolicy));
    let err = engine
        .validate_for_activation(&fx.code(1), None, None, now())
        .unwrap_err();
    assert!(matches!(err, LicenseError::Registry(_)));
}

// ── Device policy ────────────────────────────────────────────────

#[test]
fn same_device_skips_policy() {
    let fx = Fixture::new();
    let engine = fx.engine(
        Arc::new(OpenRegistry),
        Arc::new(VerifyDevicePolicy {
            method: "email".into(),
        }),
    );
    let outcome = check(&engine, &fx.bound_code(), Some("D1"));
    assert!(outcome.can_activate);
    assert!(!outcome.requires_verification);
}

#[test]
fn no_fingerprint_skips_policy() {
    let fx = Fixture::new();
    let outcome = check(&fx.strict(), &fx.bound_code(), None);
    assert!(outcome.valid);
}

#[test]
fn strict_policy_rejects_new_device() {
    let fx = Fixture::new();
    let outcome = check(&fx.strict(), &fx.bound_code(), Some("D2"));
    assert!(!outcome.valid);
    assert_eq!(
        outcome.errors,
        vec![Rejection::DeviceChangeRejected(
            "Code is bound to a different device".to_string()
        )]
    );
    assert!(!outcome.device_change_allowed);
}

#[test]
fn lenient_policy_warns() {
    let fx = Fixture::new();
    let engine = fx.engine(Arc::new(OpenRegistry), Arc::new(LenientDevicePolicy));
    let outcome = check(&engine, &fx.bound_code(), Some("D2"));
    assert!(outcome.can_activate);
    assert!(outcome.device_change_allowed);
    assert_eq!(outcome.warnings.len(), 1);
}

#[test]
fn verify_policy_holds_activation() {
    let fx = Fixture::new();
    let engine = fx.engine(
        Arc::new(OpenRegistry),
        Arc::new(VerifyDevicePolicy {
            method: "sms".into(),
        }),
    );
    let outcome = check(&engine, &fx.bound_code(), Some("D2"));
    assert!(outcome.valid);
    assert!(!outcome.can_activate);
    assert!(outcome.requires_verification);
    assert_eq!(outcome.verification_method.as_deref(), Some("sms"));
}

#[test]
fn outcome_serializes_reasons() {
    let fx = Fixture::new();
    let mut code = fx.code(1);
    code.revoke(None, "refund", now()).unwrap();
    let json = serde_json::to_value(check(&fx.strict(), &code, None)).unwrap();
    assert_eq!(json["valid"], false);
    assert_eq!(json["errors"][0]["reason"], "revoked");
}
