//! Token segmentation: raw keystrokes to a phonetic token lattice.
//!
//! [`TokenSegmenter`] is the boundary the [`crate::Engine`] drives.
//! [`SyllableSegmenter`] is the bundled implementation: a longest-match DP
//! over a token inventory, with fuzzy alternatives per token.

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::ops::Range;

use ahash::AHashSet;
use lru::LruCache;

use crate::fuzzy::FuzzyMap;
use crate::trie::TrieNode;

/// Best segmentation of one source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPath {
    /// Source as typed, after normalization.
    pub source: String,
    /// Canonical (lowercase) token per segment.
    pub tokens: Vec<String>,
    /// Character span of each token within `source`.
    pub spans: Vec<Range<usize>>,
}

impl TokenPath {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Turns source words into token lattices.
pub trait TokenSegmenter {
    /// Best token path for `source`, or `None` if it cannot be segmented.
    fn get_best_tokens(&self, source: &str) -> Option<TokenPath>;

    /// Per-position alternatives; the first entry of each position is the
    /// token itself.
    fn get_normalized_tokens(&self, tokens: &[String]) -> Vec<Vec<String>>;

    /// Whether every token is a bare initial (abbreviated typing).
    fn is_all_initials(&self, tokens: &[String]) -> bool;

    /// Source substrings as typed, one per token of `path`.
    fn get_original_tokens(&self, path: &TokenPath) -> Vec<String>;

    /// Replace the fuzzy equivalence rules.
    fn update_fuzzy_pairs(&mut self, pairs: &[String]);

    /// Drop any cached segmentation state.
    fn clear(&mut self);
}

/// Longest-match segmenter over a fixed token inventory.
///
/// An apostrophe in the source forces a token boundary and is not emitted.
#[derive(Debug)]
pub struct SyllableSegmenter {
    trie: TrieNode,
    initials: AHashSet<String>,
    fuzzy: FuzzyMap,
    cache: RefCell<LruCache<String, Option<TokenPath>>>,
}

const SEPARATOR: char = '\'';

/// Segmented sources remembered between calls.
pub const DEFAULT_SEGMENT_CACHE_SIZE: usize = 256;

impl Default for SyllableSegmenter {
    fn default() -> Self {
        Self {
            trie: TrieNode::default(),
            initials: AHashSet::new(),
            fuzzy: FuzzyMap::default(),
            cache: RefCell::new(LruCache::new(cache_capacity(DEFAULT_SEGMENT_CACHE_SIZE))),
        }
    }
}

fn cache_capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

impl SyllableSegmenter {
    pub fn new<S: AsRef<str>>(syllables: &[S]) -> Self {
        let mut seg = Self::default();
        for s in syllables {
            seg.insert_syllable(s.as_ref());
        }
        seg
    }

    /// Declare the tokens that count as initials. They are also added to the
    /// inventory so abbreviated input can be segmented.
    pub fn with_initials<S: AsRef<str>>(mut self, initials: &[S]) -> Self {
        for i in initials {
            let key = i.as_ref().trim().to_lowercase();
            if !key.is_empty() {
                self.trie.insert(&key);
                self.initials.insert(key);
            }
        }
        self
    }

    /// Bound the number of remembered segmentations (at least one).
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache = RefCell::new(LruCache::new(cache_capacity(size)));
        self
    }

    pub fn with_fuzzy_rules<S: AsRef<str>>(mut self, rules: &[S]) -> Self {
        self.fuzzy = FuzzyMap::from_rules(rules);
        self
    }

    pub fn insert_syllable(&mut self, syllable: &str) {
        let key = syllable.trim().to_lowercase();
        if !key.is_empty() {
            self.trie.insert(&key);
            self.cache.get_mut().clear();
        }
    }

    pub fn contains_syllable(&self, syllable: &str) -> bool {
        self.trie.contains_word(&syllable.to_lowercase())
    }

    fn segment(&self, source: &str) -> Option<TokenPath> {
        let lowered: Vec<char> = source.chars().flat_map(char::to_lowercase).collect();
        // Lowercasing must not shift character offsets.
        if lowered.len() != source.chars().count() {
            return None;
        }
        let n = lowered.len();

        // best_keys[pos]: fewest tokens covering lowered[pos..]; next[pos]: end
        // of the chosen token (equal to pos + 1 with no token for a separator).
        let mut best_keys = vec![usize::MAX; n + 1];
        let mut next: Vec<Option<(usize, bool)>> = vec![None; n + 1];
        best_keys[n] = 0;

        for pos in (0..n).rev() {
            if lowered[pos] == SEPARATOR {
                if best_keys[pos + 1] != usize::MAX {
                    best_keys[pos] = best_keys[pos + 1];
                    next[pos] = Some((pos + 1, false));
                }
                continue;
            }
            // Shortest first; `<=` lets a longer match win ties.
            for end in self.trie.walk_prefixes(&lowered, pos) {
                if best_keys[end] == usize::MAX {
                    continue;
                }
                let keys = best_keys[end] + 1;
                if keys <= best_keys[pos] {
                    best_keys[pos] = keys;
                    next[pos] = Some((end, true));
                }
            }
        }

        if best_keys[0] == usize::MAX || best_keys[0] == 0 {
            return None;
        }

        let mut path = TokenPath {
            source: source.to_string(),
            tokens: Vec::with_capacity(best_keys[0]),
            spans: Vec::with_capacity(best_keys[0]),
        };
        let mut cur = 0;
        while cur < n {
            let (end, emit) = next[cur]?;
            if emit {
                path.tokens.push(lowered[cur..end].iter().collect());
                path.spans.push(cur..end);
            }
            cur = end;
        }
        Some(path)
    }
}

impl TokenSegmenter for SyllableSegmenter {
    fn get_best_tokens(&self, source: &str) -> Option<TokenPath> {
        if let Some(hit) = self.cache.borrow_mut().get(source) {
            return hit.clone();
        }
        let path = self.segment(source);
        tracing::trace!(source, tokens = ?path.as_ref().map(|p| &p.tokens), "segmented");
        self.cache
            .borrow_mut()
            .put(source.to_string(), path.clone());
        path
    }

    fn get_normalized_tokens(&self, tokens: &[String]) -> Vec<Vec<String>> {
        tokens
            .iter()
            .map(|token| {
                let mut alts = self.fuzzy.alternatives(token);
                // Keep the token itself, drop equivalents outside the inventory.
                let mut first = true;
                alts.retain(|alt| std::mem::take(&mut first) || self.trie.contains_word(alt));
                alts
            })
            .collect()
    }

    fn is_all_initials(&self, tokens: &[String]) -> bool {
        !tokens.is_empty() && tokens.iter().all(|t| self.initials.contains(t))
    }

    fn get_original_tokens(&self, path: &TokenPath) -> Vec<String> {
        let chars: Vec<char> = path.source.chars().collect();
        path.spans
            .iter()
            .map(|span| chars[span.clone()].iter().collect())
            .collect()
    }

    fn update_fuzzy_pairs(&mut self, pairs: &[String]) {
        self.fuzzy = FuzzyMap::from_rules(pairs);
        tracing::debug!(rules = pairs.len(), "updated fuzzy pairs");
    }

    fn clear(&mut self) {
        self.cache.get_mut().clear();
    }
}
