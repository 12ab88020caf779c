mod common;

use chrono::Duration;
use common::{batch, batch_codes, code, code_for, now};
use keysmith_crypto::{KeyMaterial, LicenseEncryptionManager};
use keysmith_license::{
    ActivationAction, ActivationLog, ActivationRequest, ActivationResult, ActivationService,
    AuditTrail, CodeStatus, CodeStore, DeviceInfo, IssueRequest, LicenseError, LicensingConfig,
    StoreConfig, TracingAbuseSink,
};
use keysmith_store::{MIGRATIONS, SqliteCodeStore, schema_version};
use rusqlite::Connection;
use keysmith_types::ProductId;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;

fn store() -> SqliteCodeStore {
    SqliteCodeStore::open_in_memory().unwrap()
}

// ── Insert & lookup ──────────────────────────────────────────────

#[test]
fn insert_and_lookup() {
    let store = store();
    let code = code();
    store.insert(&code).unwrap();

    assert_eq!(store.get(&code.id()).unwrap(), Some(code.clone()));
    assert_eq!(store.find_by_hash(code.code_hash()).unwrap(), Some(code));
    assert_eq!(store.find_by_hash("missing").unwrap(), None);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn duplicate_hash_is_rejected() {
    let store = store();
    let code = code();
    store.insert(&code).unwrap();
    assert!(matches!(store.insert(&code), Err(LicenseError::DuplicateCode)));
}

#[test]
fn batch_insert_is_all_or_nothing() {
    let store = store();
    let existing = code();
    store.insert(&existing).unwrap();

    let batch = vec![code(), code(), existing];
    assert!(matches!(
        store.insert_batch(&batch),
        Err(LicenseError::DuplicateCode)
    ));
    assert_eq!(store.count().unwrap(), 1);

    store.insert_batch(&[code(), code()]).unwrap();
    assert_eq!(store.count().unwrap(), 3);
}

// ── Transitions ──────────────────────────────────────────────────

#[test]
fn transition_persists_and_bumps_version() {
    let store = store();
    let code = code();
    store.insert(&code).unwrap();

    let transition = store
        .transition(&code.id(), |c, audit| {
            audit.push(c.activate(&DeviceInfo::new("F1"), None, now())?);
            Ok(c.activation_count())
        })
        .unwrap();
    assert_eq!(transition.result.unwrap(), 1);
    assert_eq!(transition.audit.len(), 1);

    let stored = store.get(&code.id()).unwrap().unwrap();
    assert_eq!(stored.status(), CodeStatus::Activated);
    assert_eq!(stored.version(), 1);
    assert_eq!(stored.device().unwrap().fingerprint, "F1");
}

#[test]
fn failed_transition_keeps_entity_but_logs() {
    let store = store();
    let code = code();
    store.insert(&code).unwrap();

    let transition = store
        .transition(&code.id(), |c, audit| {
            let err = LicenseError::DeviceMismatch;
            audit.push(
                ActivationLog::new(
                    c.id(),
                    ActivationAction::Activate,
                    None,
                    Some("10.0.0.1"),
                    now(),
                )
                .failed(&err),
            );
            c.suspend("should not stick", now())?;
            Err::<(), _>(err)
        })
        .unwrap();
    assert!(matches!(transition.result, Err(LicenseError::DeviceMismatch)));

    assert_eq!(store.get(&code.id()).unwrap(), Some(code.clone()));
    let logs = store.activation_logs(&code.id()).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert_eq!(logs[0].ip_address.as_deref(), Some("10.0.0.1"));
}

#[test]
fn unchanged_transition_keeps_version() {
    let store = store();
    let code = code();
    store.insert(&code).unwrap();
    store
        .transition(&code.id(), |c, _| Ok(c.status()))
        .unwrap()
        .result
        .unwrap();
    assert_eq!(store.get(&code.id()).unwrap().unwrap().version(), 0);
}

#[test]
fn transition_on_missing_code() {
    let store = store();
    let result = store.transition(&keysmith_types::CodeId::new(), |_, _| Ok(()));
    assert!(matches!(result, Err(LicenseError::CodeNotFound)));
}

// ── Audit ────────────────────────────────────────────────────────

#[test]
fn audit_rows_keep_insertion_order() {
    let store = store();
    let code = code();
    store.insert(&code).unwrap();

    let mut audit = AuditTrail::new();
    for action in [
        ActivationAction::Validate,
        ActivationAction::Activate,
        ActivationAction::Deactivate,
    ] {
        audit.push(ActivationLog::new(code.id(), action, None, None, now()));
    }
    store.append_audit(&audit).unwrap();
    store.append_audit(&AuditTrail::new()).unwrap();

    let actions: Vec<_> = store
        .activation_logs(&code.id())
        .unwrap()
        .into_iter()
        .map(|l| l.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            ActivationAction::Validate,
            ActivationAction::Activate,
            ActivationAction::Deactivate
        ]
    );
    assert!(store.activation_logs(&common::code().id()).unwrap().is_empty());
}

#[test]
fn revocation_rows() {
    let store = store();
    let code = code();
    store.insert(&code).unwrap();
    store
        .transition(&code.id(), |c, audit| {
            audit.push(c.revoke(None, "refund", now())?);
            Ok(())
        })
        .unwrap()
        .result
        .unwrap();

    let logs = store.revocation_logs(&code.id()).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].reason, "refund");
    assert_eq!(
        store.get(&code.id()).unwrap().unwrap().status(),
        CodeStatus::Revoked
    );
}

// ── Queries ──────────────────────────────────────────────────────

#[test]
fn overdue_skips_terminal_codes() {
    let store = store();
    let product = ProductId::new();
    let soon = code_for(product, 1);
    let later = code_for(product, 90);
    let mut revoked = code_for(product, 1);
    revoked.revoke(None, "test", now()).unwrap();
    store.insert_batch(&[soon.clone(), later, revoked]).unwrap();

    assert!(store.overdue(now()).unwrap().is_empty());
    assert_eq!(
        store.overdue(now() + Duration::days(2)).unwrap(),
        vec![soon.id()]
    );
}

#[test]
fn list_codes_filters() {
    let store = store();
    let product = ProductId::new();
    let mut suspended = code_for(product, 10);
    suspended.suspend("review", now()).unwrap();
    store
        .insert_batch(&[code_for(product, 10), suspended.clone(), code()])
        .unwrap();

    assert_eq!(store.list_codes(None, None).unwrap().len(), 3);
    assert_eq!(store.list_codes(Some(&product), None).unwrap().len(), 2);
    assert_eq!(
        store
            .list_codes(Some(&product), Some(CodeStatus::Suspended))
            .unwrap(),
        vec![suspended]
    );
    assert!(store
        .list_codes(None, Some(CodeStatus::Revoked))
        .unwrap()
        .is_empty());
}

// ── Batches ──────────────────────────────────────────────────────

#[test]
fn code_batch_is_stored_with_its_codes() {
    let store = store();
    let product = ProductId::new();
    let launch = batch(product, "launch", 3);
    let codes = batch_codes(&launch);
    store.insert_code_batch(&launch, &codes).unwrap();
    store.insert(&code_for(product, 10)).unwrap();

    assert_eq!(store.get_batch(&launch.id).unwrap(), Some(launch.clone()));
    let mut expected = codes.clone();
    expected.sort_by_key(|c| c.id());
    assert_eq!(store.batch_codes(&launch.id).unwrap(), expected);
    assert_eq!(store.count().unwrap(), 4);
}

#[test]
fn batch_rows_roll_back_with_duplicate_codes() {
    let store = store();
    let existing = code();
    store.insert(&existing).unwrap();

    let doomed = batch(existing.product_id(), "doomed", 1);
    let mut codes = batch_codes(&doomed);
    codes.push(existing);
    assert!(matches!(
        store.insert_code_batch(&doomed, &codes),
        Err(LicenseError::DuplicateCode)
    ));
    assert_eq!(store.get_batch(&doomed.id).unwrap(), None);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn list_batches_filters_by_product() {
    let store = store();
    let product = ProductId::new();
    let first = batch(product, "first", 1);
    let second = batch(product, "second", 2);
    let other = batch(ProductId::new(), "other", 1);
    for b in [&first, &second, &other] {
        store.insert_code_batch(b, &batch_codes(b)).unwrap();
    }

    let names: Vec<String> = store
        .list_batches(Some(&product))
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"first".to_string()));
    assert!(names.contains(&"second".to_string()));
    assert_eq!(store.list_batches(None).unwrap().len(), 3);
}

// ── Schema ───────────────────────────────────────────────────────

#[test]
fn new_database_is_at_latest_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("codes.db");
    SqliteCodeStore::open(&path, std::time::Duration::from_secs(1)).unwrap();

    let conn = Connection::open(&path).unwrap();
    let latest = MIGRATIONS.last().unwrap().version;
    assert_eq!(schema_version(&conn).unwrap(), latest);
}

#[test]
fn unversioned_database_is_upgraded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.db");
    {
        // Layout written before the schema carried a version
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE activation_codes (
                id TEXT PRIMARY KEY,
                code_hash TEXT NOT NULL UNIQUE,
                product_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL
            );",
        )
        .unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    let store = SqliteCodeStore::open(&path, std::time::Duration::from_secs(1)).unwrap();
    let upgraded = batch(ProductId::new(), "after upgrade", 1);
    store
        .insert_code_batch(&upgraded, &batch_codes(&upgraded))
        .unwrap();
    assert_eq!(store.batch_codes(&upgraded.id).unwrap().len(), 1);
}

// ── Files ────────────────────────────────────────────────────────

#[test]
fn data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        database_path: dir.path().join("codes.db"),
        ..StoreConfig::default()
    };
    let code = code();
    {
        let store = SqliteCodeStore::from_config(&config).unwrap();
        store.insert(&code).unwrap();
    }
    let reopened = SqliteCodeStore::from_config(&config).unwrap();
    assert_eq!(reopened.get(&code.id()).unwrap(), Some(code));
}

#[test]
fn two_processes_share_the_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let config = LicensingConfig::default();
    let manager = Arc::new(LicenseEncryptionManager::new(
        KeyMaterial::generate(),
        "keysmith",
    ));

    // Two store handles stand in for two server processes
    let services: Vec<_> = (0..2)
        .map(|_| {
            let store = SqliteCodeStore::open(&path, std::time::Duration::from_secs(5)).unwrap();
            ActivationService::new(
                Arc::new(store),
                &config,
                manager.clone(),
                Arc::new(TracingAbuseSink),
            )
            .unwrap()
        })
        .collect();

    let mut request = IssueRequest::new(ProductId::new(), 1);
    request.max_activations = Some(3);
    let code = services[0].issue_codes(&request, now()).unwrap().remove(0);

    let successes = thread::scope(|s| {
        let handles: Vec<_> = (0..12)
            .map(|i| {
                let service = &services[i % 2];
                let req = ActivationRequest {
                    code: code.human_code().to_string(),
                    device: DeviceInfo::new("F1"),
                    ip_address: None,
                    user_id: None,
                };
                s.spawn(move || {
                    matches!(
                        service.activate(&req, now()).unwrap(),
                        ActivationResult::Activated(_)
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(successes, 3);
    let stored = services[1].store().get(&code.id()).unwrap().unwrap();
    assert_eq!(stored.activation_count(), 3);
    assert_eq!(stored.version(), 3);
    assert_eq!(services[1].store().activation_logs(&code.id()).unwrap().len(), 12);
}
