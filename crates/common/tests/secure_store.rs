//! Integration tests for the encrypted key/value store

use common::crypto::{AtRestCipher, IvPolicy};
use common::storage::SecureStore;
use serde_json::{json, Value};
use tempfile::TempDir;

const KEY: &str = "0123456789abcdef0123456789abcdef";

fn setup() -> (SecureStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = SecureStore::open(dir.path().join("store.json"), KEY, IvPolicy::Random).unwrap();
    (store, dir)
}

#[test]
fn test_set_get_remove() {
    let (store, _dir) = setup();

    store.set_item("token", "abc").unwrap();
    assert_eq!(store.get_item("token").unwrap().as_deref(), Some("abc"));

    store.set_item("token", "def").unwrap();
    assert_eq!(store.get_item("token").unwrap().as_deref(), Some("def"));

    store.remove_item("token").unwrap();
    assert_eq!(store.get_item("token").unwrap(), None);
}

#[test]
fn test_multi_operations() {
    let (store, _dir) = setup();

    store
        .multi_set([("a", "1"), ("b", "2"), ("c", "3")])
        .unwrap();
    assert_eq!(store.get_all_keys().unwrap(), vec!["a", "b", "c"]);

    let values = store.multi_get(["a", "missing", "c"]).unwrap();
    assert_eq!(
        values,
        vec![
            ("a".to_string(), Some("1".to_string())),
            ("missing".to_string(), None),
            ("c".to_string(), Some("3".to_string())),
        ]
    );

    store.multi_remove(["a", "c"]).unwrap();
    assert_eq!(store.get_all_keys().unwrap(), vec!["b"]);

    store.clear().unwrap();
    assert!(store.get_all_keys().unwrap().is_empty());
}

#[test]
fn test_merge_item() {
    let (store, _dir) = setup();

    store
        .set_item("profile", r#"{"name":"ada","prefs":{"theme":"dark","lang":"en"}}"#)
        .unwrap();
    store
        .merge_item("profile", r#"{"prefs":{"lang":"fr"},"age":36}"#)
        .unwrap();

    let merged: Value = serde_json::from_str(&store.get_item("profile").unwrap().unwrap()).unwrap();
    assert_eq!(
        merged,
        json!({ "name": "ada", "age": 36, "prefs": { "theme": "dark", "lang": "fr" } })
    );
}

#[test]
fn test_merge_into_missing_or_plain_value() {
    let (store, _dir) = setup();

    store.merge_item("fresh", r#"{"a":1}"#).unwrap();
    store.set_item("plain", "not json").unwrap();
    store
        .multi_merge([("plain", r#"{"b":2}"#), ("fresh", r#"{"c":3}"#)])
        .unwrap();

    let fresh: Value = serde_json::from_str(&store.get_item("fresh").unwrap().unwrap()).unwrap();
    let plain: Value = serde_json::from_str(&store.get_item("plain").unwrap().unwrap()).unwrap();
    assert_eq!(fresh, json!({ "a": 1, "c": 3 }));
    assert_eq!(plain, json!({ "b": 2 }));
}

#[test]
fn test_reopen_with_same_key() {
    let (store, dir) = setup();
    store.set_item("persisted", "yes").unwrap();
    drop(store);

    let reopened =
        SecureStore::open(dir.path().join("store.json"), KEY, IvPolicy::Zero).unwrap();
    assert_eq!(reopened.get_item("persisted").unwrap().as_deref(), Some("yes"));
}

#[test]
fn test_foreign_entries_are_skipped_when_listing() {
    let (store, dir) = setup();
    store.set_item("mine", "1").unwrap();

    // An entry written under a different key
    let other = SecureStore::open(
        dir.path().join("store.json"),
        "fedcba9876543210fedcba9876543210",
        IvPolicy::Random,
    )
    .unwrap();
    other.set_item("theirs", "2").unwrap();

    assert_eq!(store.get_all_keys().unwrap(), vec!["mine"]);
}

#[test]
fn test_entry_names_are_deterministic() {
    let (store, _dir) = setup();
    store.set_item("lookup", "v").unwrap();

    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    let expected = AtRestCipher::new(KEY)
        .unwrap()
        .encrypt("lookup", IvPolicy::Zero)
        .unwrap();

    assert!(raw.get(&expected).is_some());
}

#[test]
fn test_invalid_key_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(SecureStore::open(dir.path().join("s.json"), "short", IvPolicy::Random).is_err());
}
