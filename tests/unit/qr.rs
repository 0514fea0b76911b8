use wa_gateway::qr::QrStore;

#[test]
fn test_store_and_fetch_code() {
    let store = QrStore::new();
    store.set("user1", "data:image/png;base64,iVBORw0KGgo=".to_string());
    assert_eq!(
        store.get("user1").as_deref(),
        Some("data:image/png;base64,iVBORw0KGgo=")
    );
}

#[test]
fn test_missing_user_has_no_code() {
    let store = QrStore::new();
    assert!(store.get("user1").is_none());
}

#[test]
fn test_codes_are_per_user() {
    let store = QrStore::new();
    store.set("user1", "qr-1".to_string());
    store.set("user2", "qr-2".to_string());
    assert_eq!(store.get("user1").as_deref(), Some("qr-1"));
    assert_eq!(store.get("user2").as_deref(), Some("qr-2"));
}

#[test]
fn test_regenerated_code_replaces_previous() {
    let store = QrStore::new();
    store.set("user1", "first-scan".to_string());
    store.set("user1", "second-scan".to_string());
    assert_eq!(store.get("user1").as_deref(), Some("second-scan"));
}

#[test]
fn test_remove_is_idempotent() {
    let store = QrStore::new();
    store.set("user1", "qr".to_string());
    store.remove("user1");
    store.remove("user1");
    assert!(!store.contains("user1"));
}

#[test]
fn test_clear_empties_store() {
    let store = QrStore::new();
    store.set("user1", "a".to_string());
    store.set("user2", "b".to_string());
    store.clear();
    assert!(store.get("user1").is_none());
    assert!(store.get("user2").is_none());
}
