//! Memoized segmentation search over a token lattice.
//!
//! A lattice is a slice of positions, each holding the surface alternatives
//! of one token (first alternative = the typed form). `search` scores every
//! way of splitting the lattice into dictionary segments; `prefix_search`
//! collects words that cover only the leading tokens. Both memoize their
//! sub-results for the life of a composition; `clear` must be called when the
//! composition is reset or the cursor moves.

use std::num::NonZeroUsize;
use std::rc::Rc;

use ahash::AHashSet;
use lru::LruCache;

use crate::candidate::Candidate;
use crate::codec::{Codec, Target};
use crate::heap::Heap;
use crate::Config;

/// Structural memo key: the first alternative of every position plus the
/// initials flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SearchKey {
    tokens: Vec<String>,
    all_initials: bool,
}

impl SearchKey {
    fn new(tokens: &[Vec<String>], all_initials: bool) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|alts| alts.first().cloned().unwrap_or_default())
                .collect(),
            all_initials,
        }
    }
}

/// A word covering the first `range` tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixMatch {
    pub range: usize,
    pub target: String,
}

/// Segmentation search engine bound to one model.
pub struct Transliterator {
    codec: Codec,
    multi_segment_factor: f64,
    beam: usize,
    max_token_length: usize,
    cache: LruCache<SearchKey, Rc<Heap<String>>>,
    prefix_cache: LruCache<SearchKey, Heap<PrefixMatch>>,
    prefix_bound: usize,
    cache_hits: usize,
    cache_misses: usize,
}

impl Transliterator {
    pub fn new(mut codec: Codec, config: &Config) -> Self {
        codec.set_max_sequence_size(config.max_sequence_size);
        let capacity = NonZeroUsize::new(config.max_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            codec,
            multi_segment_factor: config.multi_segment_factor,
            beam: config.search_beam.max(1),
            max_token_length: config.max_token_length,
            cache: LruCache::new(capacity),
            prefix_cache: LruCache::new(capacity),
            prefix_bound: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Best segmentations of the whole lattice, at most `search_beam` of them.
    ///
    /// Keys are log-probabilities; the heap root is the weakest survivor.
    pub fn search(&mut self, tokens: &[Vec<String>], all_initials: bool) -> Rc<Heap<String>> {
        if tokens.is_empty() || tokens.len() > self.max_token_length {
            return Rc::new(Heap::new());
        }

        let key = SearchKey::new(tokens, all_initials);
        if let Some(hit) = self.cache.get(&key) {
            self.cache_hits += 1;
            return Rc::clone(hit);
        }
        self.cache_misses += 1;

        let beam = self.beam;
        let mut results: Heap<String> = Heap::with_capacity(beam + 1);
        for Target { segment, prob } in self.codec.target_mappings(tokens, all_initials) {
            push_best(&mut results, prob, segment, beam);
        }

        for split in (1..tokens.len()).rev() {
            let suffix = self.search(&tokens[split..], all_initials);
            let Some((suffix_score, suffix_word)) = best_entry(&suffix) else {
                continue;
            };
            let prefix = self.search(&tokens[..split], all_initials);
            for (prefix_score, prefix_word) in prefix.iter() {
                let score = prefix_score + suffix_score + self.multi_segment_factor;
                let word = format!("{}{}", prefix_word, suffix_word);
                push_best(&mut results, score, word, beam);
            }
        }

        let results = Rc::new(results);
        self.cache.put(key, Rc::clone(&results));
        results
    }

    /// Words covering strict prefixes of the lattice, at most `results_num`.
    ///
    /// Each prefix length is resolved once per composition; a longer lattice
    /// extends the deepest cached prefix.
    pub fn prefix_search(
        &mut self,
        tokens: &[Vec<String>],
        results_num: usize,
        all_initials: bool,
    ) -> Heap<PrefixMatch> {
        if results_num != self.prefix_bound {
            self.prefix_cache.clear();
            self.prefix_bound = results_num;
        }
        if tokens.len() < 2 || tokens.len() > self.max_token_length || results_num == 0 {
            return Heap::new();
        }

        // Deepest cached prefix length and its heap.
        let mut start = 1;
        let mut acc: Heap<PrefixMatch> = Heap::with_capacity(results_num + 1);
        for len in (1..tokens.len()).rev() {
            let key = SearchKey::new(&tokens[..len], all_initials);
            if let Some(cached) = self.prefix_cache.get(&key) {
                acc = cached.clone();
                start = len + 1;
                break;
            }
        }

        for len in start..tokens.len() {
            let prefix = &tokens[..len];
            for Target { segment, prob } in self.codec.target_mappings(prefix, all_initials) {
                acc.push_bounded(
                    prob,
                    PrefixMatch {
                        range: len,
                        target: segment,
                    },
                    results_num,
                );
            }
            self.prefix_cache
                .put(SearchKey::new(prefix, all_initials), acc.clone());
        }
        acc
    }

    /// Merge full-length results and prefix completions, best first, keeping
    /// at most `results_num` distinct texts.
    ///
    /// The globally weakest root is popped until both heaps are empty, filling
    /// the output from the back; on equal keys the prefix heap yields first so
    /// full-length words stay ahead. A text seen earlier in the ranked list
    /// drops its later occurrences.
    pub fn rank_and_merge(
        &self,
        token_count: usize,
        results_num: usize,
        mut full: Heap<String>,
        mut prefix: Heap<PrefixMatch>,
    ) -> Vec<Candidate> {
        let mut reversed = Vec::with_capacity(full.count() + prefix.count());
        loop {
            let take_prefix = match (full.peek_key(), prefix.peek_key()) {
                (None, None) => break,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some(f), Some(p)) => p <= f,
            };
            if take_prefix {
                if let Some((score, m)) = prefix.remove_entry() {
                    reversed.push(Candidate::new(m.target, score, m.range));
                }
            } else if let Some((score, word)) = full.remove_entry() {
                reversed.push(Candidate::new(word, score, token_count));
            }
        }
        let mut seen = AHashSet::with_capacity(reversed.len());
        reversed
            .into_iter()
            .rev()
            .filter(|c| seen.insert(c.text.clone()))
            .take(results_num)
            .collect()
    }

    /// Full pipeline for one lattice: direct mappings of the whole lattice,
    /// best segmentations, and prefix completions.
    pub fn transliterate(
        &mut self,
        tokens: &[Vec<String>],
        results_num: usize,
        all_initials: bool,
    ) -> Vec<Candidate> {
        let _span = tracing::debug_span!("transliterate", tokens = tokens.len()).entered();
        if tokens.is_empty() || results_num == 0 || tokens.len() > self.max_token_length {
            return Vec::new();
        }

        let mut full: Heap<String> = Heap::with_capacity(results_num + 1);
        for Target { segment, prob } in self.codec.target_mappings(tokens, all_initials) {
            push_best(&mut full, prob, segment, results_num);
        }
        let segmented = self.search(tokens, all_initials);
        for (score, word) in segmented.iter() {
            push_best(&mut full, score, word.clone(), results_num);
        }

        let prefix = self.prefix_search(tokens, results_num, all_initials);
        tracing::debug!(
            full = full.count(),
            prefix = prefix.count(),
            "transliteration candidates"
        );
        self.rank_and_merge(tokens.len(), results_num, full, prefix)
    }

    /// Drop all memoized sub-results.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.prefix_cache.clear();
        tracing::debug!("cleared search caches");
    }

    /// `(hits, misses)` of the segmentation cache.
    pub fn cache_stats(&self) -> (usize, usize) {
        (self.cache_hits, self.cache_misses)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Keep the best score per word and at most `bound` words.
fn push_best(heap: &mut Heap<String>, score: f64, word: String, bound: usize) {
    heap.increase(score, word);
    heap.prune(bound);
}

/// Highest-scoring entry. Sub-lattice heaps hold at most `search_beam`
/// entries, so a scan is enough.
fn best_entry(heap: &Heap<String>) -> Option<(f64, &String)> {
    heap.iter()
        .fold(None, |best: Option<(f64, &String)>, (k, v)| match best {
            Some((bk, _)) if bk >= k => best,
            _ => Some((k, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;

    fn lattice(tokens: &[&str]) -> Vec<Vec<String>> {
        tokens.iter().map(|t| vec![t.to_string()]).collect()
    }

    fn config(beam: usize) -> Config {
        Config {
            search_beam: beam,
            multi_segment_factor: -3.0,
            ..Config::default()
        }
    }

    fn transliterator(beam: usize) -> Transliterator {
        let mut b = ModelBuilder::new();
        b.add("ni", "你", -1.0);
        b.add("ni", "泥", -2.0);
        b.add("hao", "好", -1.5);
        b.add("hao", "号", -2.5);
        b.add("nihao", "你好", -2.0);
        b.add("ma", "吗", -1.0);
        b.add("ma", "妈", -1.8);
        let codec = Codec::new(b.build().expect("build")).expect("codec");
        Transliterator::new(codec, &config(beam))
    }

    fn sorted_words(heap: &Heap<String>) -> Vec<(String, f64)> {
        let mut v: Vec<(String, f64)> = heap.iter().map(|(k, w)| (w.clone(), k)).collect();
        v.sort_by(|a, b| b.1.total_cmp(&a.1));
        v
    }

    #[test]
    fn direct_match_beats_split() {
        let mut t = transliterator(3);
        let heap = t.search(&lattice(&["ni", "hao"]), false);
        let words = sorted_words(&heap);
        assert_eq!(words[0].0, "你好");
        assert!((words[0].1 - -2.0).abs() < 1e-9);
    }

    #[test]
    fn split_score_adds_penalty_once() {
        let mut t = transliterator(3);
        let heap = t.search(&lattice(&["ni", "hao", "ma"]), false);
        let words = sorted_words(&heap);
        // 你好 (-2.0) + 吗 (-1.0) + penalty (-3.0)
        let (word, score) = &words[0];
        assert_eq!(word, "你好吗");
        assert!((score - -6.0).abs() < 1e-9, "score {}", score);

        // 你 + 好 + 吗 would be -1 - 1.5 - 1 - 6 = -9.5; it must not beat -6.
        assert!(words.iter().all(|(_, s)| *s <= -6.0 + 1e-9));
    }

    #[test]
    fn two_way_split_score_is_exact() {
        let mut t = transliterator(3);
        let heap = t.search(&lattice(&["ma", "ni"]), false);
        let words = sorted_words(&heap);
        assert_eq!(words[0].0, "吗你");
        assert!((words[0].1 - (-1.0 + -1.0 + -3.0)).abs() < 1e-9);
    }

    #[test]
    fn results_never_exceed_beam() {
        for beam in 1..4 {
            let mut t = transliterator(beam);
            let tokens = lattice(&["ni", "hao", "ma", "ni", "hao"]);
            let heap = t.search(&tokens, false);
            assert!(heap.count() <= beam);
            for end in 1..=tokens.len() {
                assert!(t.search(&tokens[..end], false).count() <= beam);
            }
        }
    }

    #[test]
    fn overlong_lattice_is_rejected() {
        let mut t = transliterator(3);
        let tokens = lattice(&["ma"; 17]);
        assert!(t.search(&tokens, false).is_empty());
        assert!(t.transliterate(&tokens, 5, false).is_empty());
    }

    #[test]
    fn search_is_memoized_until_cleared() {
        let mut t = transliterator(3);
        let tokens = lattice(&["ni", "hao", "ma"]);
        t.search(&tokens, false);
        let (_, misses) = t.cache_stats();
        t.search(&tokens, false);
        let (hits, misses_after) = t.cache_stats();
        assert_eq!(misses, misses_after);
        assert!(hits >= 1);

        t.clear();
        assert_eq!(t.cache_len(), 0);
        t.search(&tokens, false);
        assert!(t.cache_stats().1 > misses_after);
    }

    #[test]
    fn prefix_search_covers_leading_tokens() {
        let mut t = transliterator(3);
        let heap = t.prefix_search(&lattice(&["ni", "hao", "ma"]), 5, false);
        let mut found: Vec<(usize, String)> = heap
            .iter()
            .map(|(_, m)| (m.range, m.target.clone()))
            .collect();
        found.sort();
        assert!(found.contains(&(1, "你".to_string())));
        assert!(found.contains(&(2, "你好".to_string())));
        assert!(found.iter().all(|(r, _)| *r < 3));
        assert!(heap.count() <= 5);
    }

    #[test]
    fn prefix_completion_keeps_plain_probability() {
        let mut t = transliterator(3);
        let heap = t.prefix_search(&lattice(&["ni", "hao"]), 5, false);
        let mut found: Vec<(String, f64)> =
            heap.iter().map(|(k, m)| (m.target.clone(), k)).collect();
        found.sort_by(|a, b| b.1.total_cmp(&a.1));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, "你");
        assert!((found[0].1 - -1.0).abs() < 1e-9);
        assert!((found[1].1 - -2.0).abs() < 1e-9);
    }

    #[test]
    fn prefix_cache_is_bounded() {
        let config = Config {
            max_cache_size: 2,
            ..config(1)
        };
        let mut b = ModelBuilder::new();
        b.add("ma", "吗", -1.0);
        let codec = Codec::new(b.build().expect("build")).expect("codec");
        let mut t = Transliterator::new(codec, &config);
        t.prefix_search(&lattice(&["ma"; 6]), 3, false);
        assert!(t.prefix_cache.len() <= 2);
    }

    #[test]
    fn prefix_search_extends_cached_prefix() {
        let mut t = transliterator(3);
        let short = t.prefix_search(&lattice(&["ni", "hao"]), 4, false);
        let long = t.prefix_search(&lattice(&["ni", "hao", "ma"]), 4, false);
        assert!(long.count() >= short.count());
        assert!(long.iter().any(|(_, m)| m.target == "你好"));
    }

    #[test]
    fn rank_and_merge_is_best_first_and_bounded() {
        let t = transliterator(3);
        let mut full = Heap::new();
        full.insert(-1.0, "a".to_string());
        full.insert(-4.0, "b".to_string());
        let mut prefix = Heap::new();
        prefix.insert(
            -2.0,
            PrefixMatch {
                range: 1,
                target: "p".into(),
            },
        );
        prefix.insert(
            -1.0,
            PrefixMatch {
                range: 1,
                target: "q".into(),
            },
        );
        let merged = t.rank_and_merge(2, 3, full, prefix);
        let texts: Vec<&str> = merged.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "q", "p"]);
        assert_eq!(merged[0].range, 2);
        assert_eq!(merged[1].range, 1);
    }

    #[test]
    fn rank_and_merge_skips_duplicate_texts() {
        let t = transliterator(3);
        let mut full = Heap::new();
        full.insert(-0.5, "A".to_string());
        full.insert(-5.0, "AB".to_string());
        let mut prefix = Heap::new();
        prefix.insert(
            -1.0,
            PrefixMatch {
                range: 1,
                target: "A".into(),
            },
        );
        let merged = t.rank_and_merge(2, 2, full, prefix);
        let texts: Vec<&str> = merged.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "AB"]);
        assert_eq!(merged[0].range, 2);
        assert!((merged[0].score - -0.5).abs() < 1e-9);
    }

    #[test]
    fn transliterate_orders_by_score_with_full_words_winning_ties() {
        let mut t = transliterator(3);
        let out = t.transliterate(&lattice(&["ni", "hao"]), 4, false);
        let got: Vec<(&str, usize)> = out.iter().map(|c| (c.text.as_str(), c.range)).collect();
        // 你 (-1) is a prefix completion; 你好 (-2) ties with 泥 (-2) and wins.
        assert_eq!(got, vec![("你", 1), ("你好", 2), ("泥", 1), ("泥好", 2)]);
        for pair in out.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
