// Integration tests for the versioned store and folder policies

mod helpers;

use std::sync::Arc;

use helpers::TestStore;
use papl::store::{OpenCause, Page, StoreError, VersionedStore};
use papl::FolderPolicy;
use serde_json::json;

fn exercise(store: &VersionedStore) {
    store.save("policies/a", "package a", "1").expect("Failed to save");
    assert_eq!(store.get("policies/a").unwrap(), "package a");
    assert_eq!(
        store.value_with_version("policies/a").unwrap(),
        ("package a".to_string(), "1".to_string())
    );

    // Unconditional overwrite, even with an older version tag
    store.save("policies/a", "package a2", "0").unwrap();
    assert_eq!(store.version("policies/a").unwrap(), "0");
    assert_eq!(store.get("policies/a").unwrap(), "package a2");

    assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
    assert!(matches!(store.value_with_version("nope"), Err(StoreError::NotFound(_))));
}

fn exercise_stamps(store: &VersionedStore) {
    for (key, stamp) in [("d", 400), ("a", 100), ("c", 300), ("b", 200), ("e", 500)] {
        store.save_stamped(key, "v", "1", stamp).unwrap();
    }
    assert_eq!(store.stamp("c").unwrap(), 300);

    // Both bounds are inclusive
    assert_eq!(store.keys_since(300).unwrap(), vec!["c", "d", "e"]);
    assert_eq!(store.keys_until(300).unwrap(), vec!["a", "b", "c"]);
    assert!(store.keys_since(501).unwrap().is_empty());

    // Pages are zero-based and ordered by key
    assert_eq!(store.keys_since_page(0, Page::new(0, 2)).unwrap(), vec!["a", "b"]);
    assert_eq!(store.keys_since_page(0, Page::new(2, 2)).unwrap(), vec!["e"]);
    assert_eq!(store.keys_until_page(400, Page::new(1, 3)).unwrap(), vec!["d"]);
    assert!(store.keys_until_page(400, Page::new(5, 3)).unwrap().is_empty());

    // Re-saving moves the stamp
    store.save_stamped("a", "v2", "2", 450).unwrap();
    assert_eq!(store.keys_since(400).unwrap(), vec!["a", "d", "e"]);

    assert_eq!(store.evict_until(200).unwrap(), 1);
    assert_eq!(store.keys().unwrap(), vec!["a", "c", "d", "e"]);
    assert_eq!(store.evict_since(450).unwrap(), 2);
    assert_eq!(store.keys().unwrap(), vec!["c", "d"]);
    assert_eq!(store.evict_since(1000).unwrap(), 0);
}

#[test]
fn test_memory_store_contract() {
    let store = VersionedStore::open("memory", "").unwrap();
    exercise(&store);
    store.close().unwrap();
}

#[test]
fn test_stamp_listing_and_eviction() {
    exercise_stamps(&VersionedStore::memory());
    let test_store = TestStore::new();
    exercise_stamps(test_store.store());
}

#[test]
fn test_stamps_survive_reopen() {
    let test_store = TestStore::new();
    test_store.store().save_stamped("k", "v", "1", 1_700_000_000).unwrap();
    let test_store = test_store.reopen();
    assert_eq!(test_store.store().stamp("k").unwrap(), 1_700_000_000);
    assert_eq!(test_store.store().keys_until(1_700_000_000).unwrap(), vec!["k"]);
}

#[test]
fn test_file_store_contract() {
    let test_store = TestStore::new();
    exercise(test_store.store());
}

#[test]
fn test_file_store_survives_reopen() {
    let test_store = TestStore::new();
    test_store.store().save("k1", "v1", "7").unwrap();
    test_store.store().save("k2", "v2", "8").unwrap();
    assert!(test_store.store().delete("k2").unwrap());

    let test_store = test_store.reopen();
    assert_eq!(
        test_store.store().value_with_version("k1").unwrap(),
        ("v1".to_string(), "7".to_string())
    );
    assert_eq!(test_store.store().keys().unwrap(), vec!["k1"]);
}

#[test]
fn test_closed_file_store_rejects_operations() {
    let test_store = TestStore::new();
    let store = test_store.store();
    store.save("k", "v", "1").unwrap();
    store.close().unwrap();

    assert!(matches!(store.get("k"), Err(StoreError::Closed)));
    assert!(matches!(store.save("k", "v", "2"), Err(StoreError::Closed)));
    assert!(matches!(store.delete("k"), Err(StoreError::Closed)));
}

#[test]
fn test_unknown_store_kind() {
    assert!(matches!(
        VersionedStore::open("s3", "/tmp/x"),
        Err(StoreError::Open {
            cause: OpenCause::UnknownKind(_),
            ..
        })
    ));
}

#[test]
fn test_file_store_at_unusable_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("plain-file");
    std::fs::write(&file, "x").unwrap();

    let target = file.join("store.db");
    match VersionedStore::open("file", &target) {
        Err(StoreError::Open { path, cause }) => {
            assert_eq!(path, target.display().to_string());
            assert!(matches!(cause, OpenCause::CreateDir { .. }));
        }
        other => panic!("expected open error, got {other:?}"),
    }

    assert!(matches!(
        VersionedStore::open("file", dir.path()),
        Err(StoreError::Open {
            cause: OpenCause::Sqlite(_),
            ..
        })
    ));
}

#[test]
fn test_folder_policy_on_file_store() {
    let test_store = TestStore::new();
    let path = {
        let store = test_store.store();
        store.save("docs/", "package policy\ndefault allow := false\nallow if input.level > 2", "1").unwrap();
        store.save("docs/public/readme.md", "package policy\nallow := true", "1").unwrap();
        store.keys().unwrap()
    };
    assert_eq!(path, vec!["docs/", "docs/public/readme.md"]);

    let test_store = test_store.reopen();
    let store = Arc::new(VersionedStore::open("memory", "").unwrap());
    for key in test_store.store().keys().unwrap() {
        let (value, version) = test_store.store().value_with_version(&key).unwrap();
        store.save(&key, &value, &version).unwrap();
    }
    let folders = FolderPolicy::new(store);

    let readme = folders
        .fold_eval("data.policy.allow", "docs/public/readme.md", r#"{"level": 0}"#, "")
        .unwrap()
        .unwrap();
    assert_eq!(readme.first_value(), Some(&json!(true)));

    let secret = folders
        .fold_eval("data.policy.allow", "docs/secret/plan.md", r#"{"level": 3}"#, "")
        .unwrap()
        .unwrap();
    assert_eq!(secret.first_value(), Some(&json!(true)));

    assert!(folders
        .fold_eval("data.policy.allow", "other/file.txt", "{}", "")
        .unwrap()
        .is_none());
}
