// core/tests/engine_decode.rs
//
// Integration tests for Engine::decode.
//
// Tests cover:
// - Readiness guard and rejected inputs
// - Ranking of full words, segmentations and prefix completions
// - Learned overrides at index 1
// - All-initials input and fuzzy pair updates
// - Custom segmenters through the TokenSegmenter trait

use std::rc::Rc;

use libtranslit_core::{
    Config, Engine, JsonModelSource, ModelBuilder, ModelData, PersistenceStore, SyllableSegmenter,
    TokenPath, TokenSegmenter,
};

fn model() -> ModelData {
    let mut b = ModelBuilder::new();
    b.add("na", "न", -1.0);
    b.add("na", "ना", -1.5);
    b.add("ma", "म", -1.0);
    b.add("ma", "मा", -1.2);
    b.add("nama", "नमा", -0.5);
    b.add("nm", "नमः", -1.0);
    b.add("nya", "ञा", -0.8);
    b.build().expect("build model")
}

fn segmenter() -> SyllableSegmenter {
    SyllableSegmenter::new(&["na", "ma", "nya"]).with_initials(&["n", "m", "k"])
}

fn engine() -> Engine<SyllableSegmenter> {
    let mut engine = Engine::new(Config::default(), segmenter(), None);
    engine.set_model(model()).expect("attach model");
    engine
}

fn texts(engine: &mut Engine<SyllableSegmenter>, source: &str, n: usize) -> Vec<String> {
    engine
        .decode(source, n)
        .map(|r| r.candidates.into_iter().map(|c| c.text).collect())
        .unwrap_or_default()
}

#[test]
fn not_ready_without_model() {
    let mut engine = Engine::new(Config::default(), segmenter(), None);
    assert!(!engine.is_ready());
    assert!(engine.decode("nama", 5).is_none());
}

#[test]
fn rejects_empty_and_unsegmentable_input() {
    let mut engine = engine();
    assert!(engine.decode("", 5).is_none());
    assert!(engine.decode("   ", 5).is_none());
    assert!(engine.decode("nama", 0).is_none());
    assert!(engine.decode("xyz", 5).is_none());
}

#[test]
fn default_beam_keeps_only_the_best_segmentation() {
    let mut engine = engine();
    let response = engine.decode("nama", 5).expect("response");
    assert_eq!(response.tokens, vec!["na", "ma"]);

    let got: Vec<(&str, usize)> = response
        .candidates
        .iter()
        .map(|c| (c.text.as_str(), c.range))
        .collect();
    assert_eq!(got, vec![("नमा", 2), ("न", 1), ("ना", 1)]);
    // Prefix completions keep their plain log-probability.
    assert!((response.candidates[1].score - -1.0).abs() < 1e-9);
}

#[test]
fn wider_beam_ranks_splits_after_completions() {
    let config = Config {
        search_beam: 3,
        ..Config::default()
    };
    let mut engine = Engine::new(config, segmenter(), None);
    engine.set_model(model()).expect("attach model");
    let response = engine.decode("nama", 5).expect("response");

    let got: Vec<(&str, usize)> = response
        .candidates
        .iter()
        .map(|c| (c.text.as_str(), c.range))
        .collect();
    assert_eq!(
        got,
        vec![("नमा", 2), ("न", 1), ("ना", 1), ("नम", 2), ("नाम", 2)]
    );
    for pair in response.candidates.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    // Split word: न (-1) + म (-1) + one segment penalty (-3).
    let split = &response.candidates[3];
    assert!((split.score - -5.0).abs() < 1e-9);
}

#[test]
fn duplicate_completion_does_not_cost_a_slot() {
    let mut b = ModelBuilder::new();
    b.add("na", "A", -1.0);
    b.add("ma", "B", -1.0);
    b.add("nama", "A", -0.5);
    let config = Config {
        search_beam: 3,
        ..Config::default()
    };
    let mut engine = Engine::new(config, segmenter(), None);
    engine.set_model(b.build().expect("build model")).expect("attach model");
    assert_eq!(texts(&mut engine, "nama", 2), vec!["A", "AB"]);
    assert_eq!(texts(&mut engine, "nama", 3), vec!["A", "AB"]);
}

#[test]
fn results_are_bounded_and_unique() {
    let mut engine = engine();
    for n in 1..=6 {
        let got = texts(&mut engine, "nama", n);
        assert!(got.len() <= n);
        let mut dedup = got.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), got.len());
    }
}

#[test]
fn original_tokens_keep_typed_case() {
    let mut engine = engine();
    let response = engine.decode("NaMa", 3).expect("response");
    assert_eq!(response.tokens, vec!["Na", "Ma"]);
    assert_eq!(response.candidates[0].text, "नमा");
}

#[test]
fn learned_override_goes_to_second_slot() {
    let mut engine = engine();
    engine.add_user_commits("nama", "नाम");
    assert_eq!(texts(&mut engine, "nama", 5), vec!["नमा", "नाम", "न", "ना"]);
    // Not in the truncated list: inserted, list stays bounded.
    assert_eq!(texts(&mut engine, "nama", 3), vec!["नमा", "नाम", "न"]);
}

#[test]
fn learned_top_candidate_is_left_alone() {
    let mut engine = engine();
    engine.add_user_commits("nama", "नमा");
    assert_eq!(texts(&mut engine, "nama", 3), vec!["नमा", "न", "ना"]);
}

#[test]
fn disabled_user_dict_ignores_commits() {
    let config = Config {
        user_dict_enabled: false,
        ..Config::default()
    };
    let mut engine = Engine::new(config, segmenter(), None);
    engine.set_model(model()).expect("attach model");
    engine.add_user_commits("nama", "नाम");
    assert!(engine.user_dict().is_none());
    assert_eq!(texts(&mut engine, "nama", 3), vec!["नमा", "न", "ना"]);
}

#[test]
fn all_initials_input() {
    let mut engine = engine();
    assert_eq!(texts(&mut engine, "nm", 3), vec!["नमः"]);
}

#[test]
fn fuzzy_pairs_widen_the_lattice() {
    let mut engine = engine();
    assert!(!texts(&mut engine, "na", 5).contains(&"ञा".to_string()));

    engine.update_fuzzy_pairs(&["na=nya:0.5".to_string()]);
    let got = texts(&mut engine, "na", 5);
    assert_eq!(got[0], "ञा");
    assert!(got.contains(&"न".to_string()));
    assert_eq!(engine.config().fuzzy, vec!["na=nya:0.5"]);
}

#[test]
fn fuzzy_rules_from_config_apply_at_construction() {
    let config = Config {
        fuzzy: vec!["na=nya".to_string()],
        ..Config::default()
    };
    let mut engine = Engine::new(config, segmenter(), None);
    engine.set_model(model()).expect("attach model");
    assert!(texts(&mut engine, "na", 5).contains(&"ञा".to_string()));
}

#[test]
fn clear_resets_last_response() {
    let mut engine = engine();
    engine.decode("nama", 3).expect("response");
    assert!(engine.last_response().is_some());
    let (_, misses) = engine.cache_stats();
    assert!(misses > 0);

    engine.clear();
    assert!(engine.last_response().is_none());
    assert_eq!(texts(&mut engine, "nama", 3)[0], "नमा");
}

#[test]
fn load_model_from_json_bytes() {
    let json = model().to_json_string().expect("serialize");
    let mut engine = Engine::new(Config::default(), segmenter(), None);
    engine
        .load_model(&JsonModelSource::from_bytes(json.into_bytes()))
        .expect("load");
    assert!(engine.is_ready());
    assert_eq!(texts(&mut engine, "nama", 1), vec!["नमा"]);
}

#[test]
fn failed_load_leaves_engine_not_ready() {
    let mut engine = engine();
    assert!(engine.is_ready());
    let result = engine.load_model(&JsonModelSource::from_bytes(b"not json".to_vec()));
    assert!(result.is_err());
    assert!(!engine.is_ready());
    assert!(engine.decode("nama", 3).is_none());
}

/// Treats the whole source as a single token.
struct WholeWord;

impl TokenSegmenter for WholeWord {
    fn get_best_tokens(&self, source: &str) -> Option<TokenPath> {
        Some(TokenPath {
            source: source.to_string(),
            tokens: vec![source.to_lowercase()],
            spans: vec![0..source.chars().count()],
        })
    }

    fn get_normalized_tokens(&self, tokens: &[String]) -> Vec<Vec<String>> {
        tokens.iter().map(|t| vec![t.clone()]).collect()
    }

    fn is_all_initials(&self, _tokens: &[String]) -> bool {
        false
    }

    fn get_original_tokens(&self, path: &TokenPath) -> Vec<String> {
        vec![path.source.clone()]
    }

    fn update_fuzzy_pairs(&mut self, _pairs: &[String]) {}

    fn clear(&mut self) {}
}

#[test]
fn custom_segmenter_through_trait() {
    let store: Option<Rc<dyn PersistenceStore>> = None;
    let mut engine = Engine::new(Config::default(), WholeWord, store);
    engine.set_model(model()).expect("attach model");
    let response = engine.decode("Nama", 3).expect("response");
    assert_eq!(response.tokens, vec!["Nama"]);
    assert_eq!(response.candidates.len(), 1);
    assert_eq!(response.candidates[0].text, "नमा");
    assert_eq!(response.candidates[0].range, 1);
}
