use keysmith_types::{CodeId, LogId, ProductId, UserId};
use std::collections::HashSet;
use std::str::FromStr;

// ── CodeId ────────────────────────────────────────────────────────

#[test]
fn code_id_new_is_unique() {
    let a = CodeId::new();
    let b = CodeId::new();
    assert_ne!(a, b);
}

#[test]
fn code_id_is_time_ordered() {
    let first = CodeId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = CodeId::new();
    assert!(first < second);
    assert_eq!(first.as_uuid().get_version_num(), 7);
}

#[test]
fn code_id_display_and_parse() {
    let id = CodeId::new();
    let parsed = CodeId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn code_id_from_str_invalid() {
    assert!(CodeId::from_str("garbage").is_err());
    assert!(CodeId::parse("not-a-uuid").is_err());
}

#[test]
fn code_id_serializes_transparently() {
    let id = CodeId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let parsed: CodeId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn code_id_hash_and_eq() {
    let id = CodeId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

// ── LogId ─────────────────────────────────────────────────────────

#[test]
fn log_id_default_is_unique() {
    assert_ne!(LogId::default(), LogId::default());
}

// ── ProductId / UserId ────────────────────────────────────────────

#[test]
fn product_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::new_v4();
    let id = ProductId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
    assert_eq!(id.to_string(), uuid.to_string());
}

#[test]
fn product_id_is_random() {
    assert_eq!(ProductId::new().as_uuid().get_version_num(), 4);
}

#[test]
fn user_id_debug_names_type() {
    let id = UserId::new();
    assert!(format!("{id:?}").contains("UserId"));
}
