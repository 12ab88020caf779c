use keysmith_license::{FeatureCatalog, LicenseError, LicenseFeature, LicenseType};
use keysmith_types::ProductId;
use pretty_assertions::assert_eq;

#[test]
fn default_availability_excludes_trial_and_lifetime() {
    let feature = LicenseFeature::new(ProductId::new(), "export", "PDF export");

    assert!(!feature.is_available_for_license_type(LicenseType::Trial));
    assert!(feature.is_available_for_license_type(LicenseType::Standard));
    assert!(feature.is_available_for_license_type(LicenseType::Premium));
    assert!(feature.is_available_for_license_type(LicenseType::Enterprise));
    assert!(!feature.is_available_for_license_type(LicenseType::Lifetime));
}

#[test]
fn entitlements_follow_display_order_then_name() {
    let product = ProductId::new();
    let mut pinned = LicenseFeature::new(product, "zeta", "Zeta reports");
    pinned.display_order = -1;
    let catalog = FeatureCatalog::new(vec![
        LicenseFeature::new(product, "sync", "Sync"),
        LicenseFeature::new(product, "audit", "Audit log"),
        pinned,
    ])
    .unwrap();

    assert_eq!(
        catalog.entitlements(&product, LicenseType::Standard),
        vec!["zeta", "audit", "sync"]
    );
    assert_eq!(catalog.for_product(&product).count(), 3);
}

#[test]
fn inactive_and_foreign_features_are_not_granted() {
    let product = ProductId::new();
    let mut paused = LicenseFeature::new(product, "sync", "Sync");
    paused.active = false;
    let mut trial_only = LicenseFeature::new(product, "tour", "Guided tour");
    trial_only.available_in = vec![LicenseType::Trial];
    let catalog = FeatureCatalog::new(vec![
        paused,
        trial_only,
        LicenseFeature::new(ProductId::new(), "export", "Export"),
    ])
    .unwrap();

    assert!(catalog.entitlements(&product, LicenseType::Premium).is_empty());
    assert_eq!(catalog.entitlements(&product, LicenseType::Trial), vec!["tour"]);
    // Listed but not granted
    assert_eq!(catalog.for_product(&product).count(), 2);
}

#[test]
fn same_code_on_two_products_is_allowed() {
    let catalog = FeatureCatalog::new(vec![
        LicenseFeature::new(ProductId::new(), "export", "Export"),
        LicenseFeature::new(ProductId::new(), "export", "Export"),
    ]);
    assert!(catalog.is_ok());
}

#[test]
fn blank_code_is_a_config_error() {
    let err = FeatureCatalog::new(vec![LicenseFeature::new(ProductId::new(), " ", "Nameless")])
        .unwrap_err();
    assert!(matches!(err, LicenseError::Config(_)));
    assert!(FeatureCatalog::default().is_empty());
}
