use voltwatch_compute::{ModelHandle, ModelKey, ModelStore};
use voltwatch_core::StorageConfig;
use voltwatch_storage::LocalModelStore;

use crate::helpers::{make_model, test_model_dir};

#[test]
fn test_save_load_round_trip() {
    let dir = test_model_dir();
    let store = LocalModelStore::new(&dir).unwrap();
    let model = make_model("total", "Ankara", 1500.0, 12.0);

    let handle = store.save(&model).unwrap();
    assert!(dir.join("total").join("Ankara.model.zst").is_file());

    let loaded = store.load(&handle).unwrap();
    assert_eq!(loaded, model);
    assert_eq!(loaded.model.predict_row(&[6.5]), 1500.0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_list_is_sorted_by_key() {
    let dir = test_model_dir();
    let store = LocalModelStore::new(&dir).unwrap();
    store.save(&make_model("total", "Izmir", 1.0, 0.0)).unwrap();
    store.save(&make_model("mesken", "Şanlıurfa", 1.0, 0.0)).unwrap();
    store.save(&make_model("total", "Adana", 1.0, 0.0)).unwrap();

    let keys: Vec<ModelKey> = store.list().unwrap().into_iter().map(|h| h.key).collect();
    assert_eq!(
        keys,
        vec![
            ModelKey::new("mesken", "Şanlıurfa"),
            ModelKey::new("total", "Adana"),
            ModelKey::new("total", "Izmir"),
        ]
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_save_overwrites_same_key() {
    let dir = test_model_dir();
    let store = LocalModelStore::new(&dir).unwrap();
    store.save(&make_model("total", "Bursa", 1.0, 0.0)).unwrap();
    let handle = store.save(&make_model("total", "Bursa", 2.0, 0.0)).unwrap();

    assert_eq!(store.list().unwrap().len(), 1);
    assert_eq!(store.load(&handle).unwrap().model.predict_row(&[6.5]), 2.0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_sanitized_collision_is_rejected() {
    let dir = test_model_dir();
    let store = LocalModelStore::new(&dir).unwrap();
    store.save(&make_model("total", "a/b", 1.0, 0.0)).unwrap();
    let err = store.save(&make_model("total", "a_b", 1.0, 0.0)).unwrap_err();
    assert!(err.to_string().contains("same file"), "{err}");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_remove() {
    let dir = test_model_dir();
    let store = LocalModelStore::new(&dir).unwrap();
    let handle = store.save(&make_model("total", "Konya", 1.0, 0.0)).unwrap();

    assert!(store.remove(&handle).unwrap());
    assert!(!store.remove(&handle).unwrap());
    assert!(store.list().unwrap().is_empty());
    assert!(store.load(&handle).is_err());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_load_by_key_without_location() {
    let dir = test_model_dir();
    let store = LocalModelStore::new(&dir).unwrap();
    store.save(&make_model("sanayi", "Kocaeli", 5.0, 0.0)).unwrap();

    let handle = ModelHandle {
        key: ModelKey::new("sanayi", "Kocaeli"),
        location: String::new(),
    };
    assert_eq!(store.load(&handle).unwrap().key.entity, "Kocaeli");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_registry_from_config_dir() {
    let dir = test_model_dir();
    let config = StorageConfig {
        model_dir: dir.join("models"),
        ..StorageConfig::default()
    };
    let store = LocalModelStore::from_config(&config).unwrap();
    store
        .save_all(&[make_model("total", "Ankara", 1.0, 0.0), make_model("total", "Bursa", 2.0, 0.0)])
        .unwrap();

    // garbage next to the models is ignored
    std::fs::write(dir.join("models").join("total").join("notes.txt"), b"x").unwrap();
    std::fs::write(dir.join("models").join("total").join("broken.model.zst"), b"not zstd").unwrap();

    let registry = store.load_registry().unwrap();
    assert_eq!(registry.entities("total"), vec!["Ankara".to_string(), "Bursa".to_string()]);

    std::fs::remove_dir_all(&dir).ok();
}
