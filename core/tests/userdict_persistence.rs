// core/tests/userdict_persistence.rs
//
// Integration tests for learned words surviving engine restarts.
//
// Tests cover:
// - persist() through MemoryStore and RedbStore
// - enable_user_dict() off/on cycles
// - Stored JSON layout under the input-tool key

use std::rc::Rc;

use libtranslit_core::{
    Config, Engine, MemoryStore, ModelBuilder, ModelData, PersistenceStore, PersonalDict,
    RedbStore, SyllableSegmenter,
};

fn model() -> ModelData {
    let mut b = ModelBuilder::new();
    b.add("ka", "क", -1.0);
    b.add("ka", "का", -1.4);
    b.add("la", "ल", -1.0);
    b.add("kala", "कल", -0.6);
    b.add("kala", "काला", -0.9);
    b.build().expect("build model")
}

fn engine_with(store: Rc<dyn PersistenceStore>) -> Engine<SyllableSegmenter> {
    let config = Config {
        input_tool: "hi".into(),
        ..Config::default()
    };
    let mut engine = Engine::new(config, SyllableSegmenter::new(&["ka", "la"]), Some(store));
    engine.set_model(model()).expect("attach model");
    engine
}

fn top_two(engine: &mut Engine<SyllableSegmenter>) -> Vec<String> {
    engine
        .decode("kala", 2)
        .expect("response")
        .candidates
        .into_iter()
        .map(|c| c.text)
        .collect()
}

#[test]
fn learned_word_survives_restart_with_memory_store() {
    let store = MemoryStore::new();
    {
        let mut engine = engine_with(Rc::new(store.clone()));
        engine.add_user_commits("kala", "कला");
        engine.persist().expect("persist");
    }
    assert_eq!(store.len(), 1);
    let raw = store.get_item("hi_user_dictionary").expect("stored value");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(parsed["kala"]["कला"], 1);

    let mut engine = engine_with(Rc::new(store));
    assert_eq!(top_two(&mut engine), vec!["कल", "कला"]);
}

#[test]
fn unpersisted_commits_are_lost() {
    let store = MemoryStore::new();
    {
        let mut engine = engine_with(Rc::new(store.clone()));
        engine.add_user_commits("kala", "कला");
    }
    assert!(store.is_empty());
    let mut engine = engine_with(Rc::new(store));
    assert_eq!(top_two(&mut engine), vec!["कल", "काला"]);
}

#[test]
fn disabling_persists_and_reenabling_reloads() {
    let store = MemoryStore::new();
    let mut engine = engine_with(Rc::new(store.clone()));
    engine.add_user_commits("kala", "कला");

    engine.enable_user_dict(false);
    assert!(engine.user_dict().is_none());
    assert!(!engine.config().user_dict_enabled);
    assert_eq!(top_two(&mut engine), vec!["कल", "काला"]);
    assert!(!store.is_empty());

    engine.enable_user_dict(true);
    assert_eq!(engine.user_dict().map(PersonalDict::permanent_len), Some(1));
    assert_eq!(top_two(&mut engine), vec!["कल", "कला"]);
}

#[test]
fn redb_store_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("user").join("dict.redb");
    {
        let store = RedbStore::new(&path).expect("open store");
        let mut engine = engine_with(Rc::new(store));
        engine.add_user_commits("kala", "कला");
        engine.add_user_commits("kala", "कला");
        engine.add_user_commits("ka", "का");
        engine.persist().expect("persist");
    }

    let store = RedbStore::new(&path).expect("reopen store");
    assert_eq!(store.keys().expect("keys"), vec!["hi_user_dictionary"]);
    let mut engine = engine_with(Rc::new(store));
    assert_eq!(top_two(&mut engine), vec!["कल", "कला"]);
    let dict = engine.user_dict().expect("enabled");
    assert_eq!(dict.counts("kala", "कला"), (0, 2));
    assert_eq!(dict.lookup("ka").as_deref(), Some("का"));
}

#[test]
fn permanent_cap_holds_across_persist() {
    let store = MemoryStore::new();
    let config = Config {
        input_tool: "cap".into(),
        max_permanent_size: 3,
        max_latest_entries: 2,
        ..Config::default()
    };
    let shared: Rc<dyn PersistenceStore> = Rc::new(store.clone());
    let mut dict = PersonalDict::new(&config, Some(Rc::clone(&shared)));
    for (i, word) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
        for _ in 0..=i {
            dict.record("src", word);
        }
    }
    dict.persist().expect("persist");
    assert!(dict.permanent_len() <= 3);

    let reloaded = PersonalDict::new(&config, Some(shared));
    assert_eq!(reloaded.permanent_len(), dict.permanent_len());
    assert_eq!(reloaded.lookup("src").as_deref(), Some("f"));
}
