// core/src/engine.rs
//
// Decoding orchestrator: segmenter + transliteration search + personal
// dictionary behind one public surface.

use std::rc::Rc;

use anyhow::Result;

use crate::search::Transliterator;
use crate::segmenter::TokenSegmenter;
use crate::userdict::{PersistenceStore, PersonalDict};
use crate::{utils, Candidate, Codec, Config, ModelData, ModelSource, Response};

/// Transliteration engine generic over the token segmenter.
///
/// The engine is not ready until a model is attached with [`Engine::load_model`]
/// or [`Engine::set_model`]; until then `decode` returns `None`.
pub struct Engine<S> {
    config: Config,
    segmenter: S,
    search: Option<Transliterator>,
    user_dict: Option<PersonalDict>,
    store: Option<Rc<dyn PersistenceStore>>,
    last_response: Option<Response>,
}

impl<S: TokenSegmenter> Engine<S> {
    /// Create an engine without a model.
    ///
    /// `store` backs the personal dictionary; `None` keeps learned words in
    /// memory only.
    pub fn new(config: Config, mut segmenter: S, store: Option<Rc<dyn PersistenceStore>>) -> Self {
        if !config.fuzzy.is_empty() {
            segmenter.update_fuzzy_pairs(&config.fuzzy);
        }
        let user_dict = config
            .user_dict_enabled
            .then(|| PersonalDict::new(&config, store.clone()));
        Self {
            config,
            segmenter,
            search: None,
            user_dict,
            store,
            last_response: None,
        }
    }

    /// Whether a model is attached.
    pub fn is_ready(&self) -> bool {
        self.search.is_some()
    }

    /// Load and attach a model. A failed load leaves the engine not ready.
    pub fn load_model(&mut self, source: &dyn ModelSource) -> Result<()> {
        let result = source.load_model_data().and_then(|data| self.set_model(data));
        if let Err(e) = &result {
            tracing::warn!("model load failed: {:#}", e);
            self.search = None;
        }
        result
    }

    /// Attach an already loaded model, replacing any previous one.
    pub fn set_model(&mut self, data: ModelData) -> Result<()> {
        let codec = Codec::new(data)?;
        tracing::info!(sources = codec.num_sources(), "model attached");
        self.search = Some(Transliterator::new(codec, &self.config));
        self.last_response = None;
        Ok(())
    }

    /// Decode one source word into at most `results_num` unique candidates.
    pub fn decode(&mut self, source_word: &str, results_num: usize) -> Option<Response> {
        let source = utils::normalize(source_word);
        let search = self.search.as_mut()?;
        if source.is_empty() || results_num == 0 {
            return None;
        }

        let path = self.segmenter.get_best_tokens(&source)?;
        let lattice = self.segmenter.get_normalized_tokens(&path.tokens);
        let all_initials = self.segmenter.is_all_initials(&path.tokens);

        let mut candidates: Vec<Candidate> =
            search.transliterate(&lattice, results_num, all_initials);

        if let Some(learned) = self.user_dict.as_ref().and_then(|d| d.lookup(&source)) {
            promote_learned(&mut candidates, learned, path.len(), results_num);
        }

        tracing::debug!(
            source = %source,
            tokens = path.len(),
            candidates = candidates.len(),
            "decoded"
        );
        let response = Response {
            tokens: self.segmenter.get_original_tokens(&path),
            candidates,
        };
        self.last_response = Some(response.clone());
        Some(response)
    }

    /// Record that the user committed `target` for `source`.
    pub fn add_user_commits(&mut self, source: &str, target: &str) {
        let source = utils::normalize(source);
        let target = utils::normalize(target);
        if source.is_empty() || target.is_empty() {
            return;
        }
        match self.user_dict.as_mut() {
            Some(dict) => dict.record(&source, &target),
            None => tracing::debug!("user dictionary disabled, commit ignored"),
        }
    }

    /// Write learned words to the persistence store.
    pub fn persist(&mut self) -> Result<()> {
        let Some(dict) = self.user_dict.as_mut() else {
            return Ok(());
        };
        dict.persist().map_err(|e| {
            tracing::warn!("persisting user dictionary failed: {:#}", e);
            e
        })
    }

    /// Reset composition state: search caches, segmenter caches and the last
    /// response.
    pub fn clear(&mut self) {
        if let Some(search) = self.search.as_mut() {
            search.clear();
        }
        self.segmenter.clear();
        self.last_response = None;
    }

    /// Replace the segmenter's fuzzy rules. Cached lattices are dropped.
    pub fn update_fuzzy_pairs(&mut self, pairs: &[String]) {
        self.config.fuzzy = pairs.to_vec();
        self.segmenter.update_fuzzy_pairs(pairs);
        if let Some(search) = self.search.as_mut() {
            search.clear();
        }
    }

    /// Turn learning on or off. Turning it off persists and drops the
    /// dictionary; turning it on reloads from the store.
    pub fn enable_user_dict(&mut self, enabled: bool) {
        self.config.user_dict_enabled = enabled;
        match (enabled, self.user_dict.is_some()) {
            (true, false) => {
                self.user_dict = Some(PersonalDict::new(&self.config, self.store.clone()));
            }
            (false, true) => {
                if let Err(e) = self.persist() {
                    tracing::warn!("dropping user dictionary without saving: {:#}", e);
                }
                self.user_dict = None;
            }
            _ => {}
        }
    }

    pub fn user_dict(&self) -> Option<&PersonalDict> {
        self.user_dict.as_ref()
    }

    pub fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn segmenter(&self) -> &S {
        &self.segmenter
    }

    /// `(hits, misses)` of the search memo, `(0, 0)` before a model is attached.
    pub fn cache_stats(&self) -> (usize, usize) {
        self.search
            .as_ref()
            .map(Transliterator::cache_stats)
            .unwrap_or_default()
    }
}

/// Move the learned target to index 1, or index 0 on an empty list.
///
/// Nothing changes when it is already the top candidate. A target the search
/// did not produce takes the top candidate's score and covers every token.
fn promote_learned(candidates: &mut Vec<Candidate>, learned: String, tokens: usize, limit: usize) {
    if candidates.first().is_some_and(|c| c.text == learned) {
        return;
    }
    let promoted = match candidates.iter().position(|c| c.text == learned) {
        Some(idx) => candidates.remove(idx),
        None => {
            let score = candidates.first().map(|c| c.score).unwrap_or(0.0);
            Candidate::new(learned, score, tokens)
        }
    };
    let at = candidates.len().min(1);
    candidates.insert(at, promoted);
    candidates.truncate(limit);
}
