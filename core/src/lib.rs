//! libtranslit-core
//!
//! Offline phonetic transliteration: typed Latin input is segmented into
//! phonetic tokens, looked up in a compact bit-packed dictionary, searched for
//! the best segmentations, and ranked together with words learned from the
//! user's own commits.
//!
//! Public API:
//! - `Engine` - Decoding orchestrator (segment, search, personalize)
//! - `Transliterator` - Memoized segmentation search over a token lattice
//! - `Codec` - Bit-packed dictionary encoding and lookup
//! - `ModelData` / `ModelBuilder` - Serializable model and its builder
//! - `PersonalDict` - Two-tier learned overrides with bounded storage
//! - `Heap` - Bounded priority queue used for top-K accumulation
//! - `Config` - Configuration and tuning knobs
use serde::{Deserialize, Serialize};

pub mod heap;
pub use heap::{Heap, HeapNode};

pub mod codec;
pub use codec::{BitCode, Codec, EncodedSegment, SegmentRange, Target, TargetTrie};

pub mod model;
pub use model::{BincodeModelSource, JsonModelSource, ModelBuilder, ModelData, ModelSource};

pub mod search;
pub use search::{PrefixMatch, Transliterator};

pub mod trie;
pub use trie::TrieNode;

pub mod fuzzy;
pub use fuzzy::FuzzyMap;

pub mod segmenter;
pub use segmenter::{SyllableSegmenter, TokenPath, TokenSegmenter};

pub mod userdict;
pub use userdict::{MemoryStore, PersistenceStore, PersonalDict, RedbStore};

pub mod candidate;
pub use candidate::{Candidate, Response};

pub mod engine;
pub use engine::Engine;

/// Engine configuration.
///
/// Every field has a default, so a TOML file only needs to list the knobs it
/// changes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of the input tool; namespaces the persisted user dictionary.
    pub input_tool: String,

    // Search
    /// Log-probability added once per extra segment when a word is split.
    pub multi_segment_factor: f64,
    /// Beam width: best segmentations kept per sub-lattice (1-best by default).
    pub search_beam: usize,
    /// Longest token lattice the search will accept.
    pub max_token_length: usize,
    /// Cap on concrete sequences tried when expanding alternatives.
    pub max_sequence_size: usize,
    /// Maximum number of memoized sub-lattice results.
    pub max_cache_size: usize,

    // Personal dictionary
    /// Whether commits are learned and consulted.
    pub user_dict_enabled: bool,
    /// Weight of a recent commit relative to a permanent one.
    pub latest_factor: u32,
    /// Recent (source, target) pairs kept before folding into the permanent tier.
    pub max_latest_entries: usize,
    /// Hard cap on permanent (source, target) pairs.
    pub max_permanent_size: usize,

    /// Fuzzy equivalence rules for the syllable segmenter (e.g. "sh=s:0.8").
    pub fuzzy: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_tool: "translit".to_string(),
            multi_segment_factor: -3.0,
            search_beam: 1,
            max_token_length: 16,
            max_sequence_size: codec::DEFAULT_MAX_SEQUENCE_SIZE,
            max_cache_size: 1000,
            user_dict_enabled: true,
            latest_factor: 5,
            max_latest_entries: 100,
            max_permanent_size: 1000,
            fuzzy: vec![],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Storage key of the persisted user dictionary.
    ///
    /// # Example
    /// ```
    /// # use libtranslit_core::Config;
    /// let config = Config { input_tool: "hi-t-i0-und".into(), ..Config::default() };
    /// assert_eq!(config.user_dict_key(), "hi-t-i0-und_user_dictionary");
    /// ```
    pub fn user_dict_key(&self) -> String {
        format!("{}_user_dictionary", self.input_tool)
    }
}

/// Utility helpers.
pub mod utils {
    /// Normalize input strings (NFC) and trim whitespace.
    pub fn normalize(s: &str) -> String {
        use unicode_normalization::UnicodeNormalization;
        s.nfc().collect::<String>().trim().to_string()
    }
}
