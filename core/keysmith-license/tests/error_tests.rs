use keysmith_crypto::{CryptoError, FileRejection};
use keysmith_license::{CodeStatus, ErrorKind, LicenseError};
use keysmith_types::{BatchId, ProductId};
use pretty_assertions::assert_eq;

#[test]
fn kinds() {
    let cases = [
        (LicenseError::InvalidKeyFormat("x".into()), ErrorKind::Format),
        (LicenseError::CodeNotFound, ErrorKind::Format),
        (LicenseError::BatchNotFound(BatchId::new()), ErrorKind::Format),
        (LicenseError::Revoked, ErrorKind::State),
        (LicenseError::AlreadyRevoked, ErrorKind::State),
        (
            LicenseError::ActivationLimitReached { max: 2 },
            ErrorKind::State,
        ),
        (
            LicenseError::ProductUnavailable(ProductId::new()),
            ErrorKind::State,
        ),
        (
            LicenseError::InvalidTransition {
                from: CodeStatus::Expired,
                action: "revoke",
            },
            ErrorKind::State,
        ),
        (LicenseError::DeviceMismatch, ErrorKind::Binding),
        (LicenseError::OwnerMismatch, ErrorKind::Binding),
        (LicenseError::NoDeviceBound, ErrorKind::Binding),
        (LicenseError::BindingProofInvalid, ErrorKind::Integrity),
        (LicenseError::DuplicateCode, ErrorKind::Integrity),
        (
            LicenseError::ConcurrencyConflict,
            ErrorKind::ConcurrencyConflict,
        ),
        (LicenseError::Storage("disk".into()), ErrorKind::Infrastructure),
        (LicenseError::Config("bad".into()), ErrorKind::Infrastructure),
    ];
    for (err, kind) in cases {
        assert_eq!(err.kind(), kind, "{err}");
    }
}

#[test]
fn only_conflicts_are_retryable() {
    assert!(LicenseError::ConcurrencyConflict.is_retryable());
    assert!(!LicenseError::Storage("locked".into()).is_retryable());
    assert!(!LicenseError::Expired.is_retryable());
}

#[test]
fn display_messages() {
    assert_eq!(
        LicenseError::InvalidTransition {
            from: CodeStatus::Revoked,
            action: "suspend",
        }
        .to_string(),
        "cannot suspend a code in status REVOKED"
    );
    assert_eq!(
        LicenseError::ActivationLimitReached { max: 3 }.to_string(),
        "activation limit reached (max 3)"
    );
}

#[test]
fn file_rejections_convert() {
    let err: LicenseError = FileRejection::Expired.into();
    assert!(matches!(err, LicenseError::LicenseFile(FileRejection::Expired)));
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(err.to_string(), "License has expired");
}

#[test]
fn crypto_errors_are_transparent() {
    let err: LicenseError = CryptoError::KeyMaterial("missing".into()).into();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert_eq!(err.to_string(), "key material unavailable: missing");
}

#[test]
fn kind_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&ErrorKind::ConcurrencyConflict).unwrap(),
        "\"concurrency_conflict\""
    );
}
