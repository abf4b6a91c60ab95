//! Packed model data, model sources and the model builder.
//!
//! `ModelData` is the decoded form of the distributed dictionary blob: a
//! sorted table of packed source segments, each pointing at a run of packed
//! target words and quantized log-probabilities. Hosts hand it to the engine
//! through a [`ModelSource`]; JSON and bincode sources are provided.
//!
//! `ModelBuilder` produces a valid `ModelData` from plain
//! `(source, target, log_prob)` entries, assigning Huffman codes to both
//! alphabets.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::{pack, BitCode, EncodedSegment, TargetTrie, MAX_BUFFER_BITS};
use crate::heap::Heap;

/// Default quantization scale for target probabilities.
pub const DEFAULT_PROB_SCALE: f64 = 1000.0;

/// Arrays of a packed transliteration model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    /// Packed source sequences, ascending by the segment comparator.
    pub source_segments: Vec<EncodedSegment>,
    /// `target_positions[i]` is the first target index of source `i`.
    pub target_positions: Vec<u32>,
    /// Packed target words.
    pub target_segments: Vec<EncodedSegment>,
    /// Quantized log-probabilities, parallel to `target_segments`.
    pub target_probs: Vec<i32>,
    /// Source character -> prefix code.
    pub source_map: BTreeMap<String, BitCode>,
    /// Target decoding trie.
    pub target_map: TargetTrie,
    /// Scale dividing `target_probs` back into natural-log probabilities.
    pub default_prob: f64,
}

impl ModelData {
    /// Check table shape and ordering. Engines refuse models that fail this.
    pub fn validate(&self) -> Result<()> {
        if !(self.default_prob.is_finite() && self.default_prob > 0.0) {
            bail!("default_prob must be positive, got {}", self.default_prob);
        }
        if self.target_positions.len() != self.source_segments.len() {
            bail!(
                "target_positions has {} entries for {} source segments",
                self.target_positions.len(),
                self.source_segments.len()
            );
        }
        if self.target_probs.len() != self.target_segments.len() {
            bail!(
                "target_probs has {} entries for {} target segments",
                self.target_probs.len(),
                self.target_segments.len()
            );
        }
        if let Some(pos) = self
            .source_segments
            .windows(2)
            .position(|w| w[0] >= w[1])
        {
            bail!("source_segments not strictly ascending at index {}", pos + 1);
        }
        let num_targets = self.target_segments.len() as u64;
        let mut prev = 0u32;
        for (i, &p) in self.target_positions.iter().enumerate() {
            if p < prev || p as u64 > num_targets {
                bail!("target_positions[{}] = {} out of order or range", i, p);
            }
            prev = p;
        }
        for (key, code) in &self.source_map {
            if key.chars().count() != 1 {
                bail!("source_map key {:?} is not a single character", key);
            }
            if code.is_empty() || code.len() >= MAX_BUFFER_BITS {
                bail!("source_map code for {:?} has invalid length {}", key, code.len());
            }
        }
        Ok(())
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("parse JSON model")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize JSON model")
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("deserialize bincode model")
    }

    pub fn to_bincode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("serialize bincode model")
    }

    /// Write the model as bincode to `path`.
    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        bincode::serialize_into(BufWriter::new(f), self)
            .with_context(|| format!("write bincode model {}", path.display()))
    }

    /// Write the model as JSON to `path`.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(f), self)
            .with_context(|| format!("write JSON model {}", path.display()))
    }
}

/// Supplies model arrays to the engine.
pub trait ModelSource {
    fn load_model_data(&self) -> Result<ModelData>;
}

impl ModelSource for ModelData {
    fn load_model_data(&self) -> Result<ModelData> {
        Ok(self.clone())
    }
}

enum Origin {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl Origin {
    fn read(&self) -> Result<Vec<u8>> {
        match self {
            Origin::Path(path) => {
                let mut f =
                    File::open(path).with_context(|| format!("open model {}", path.display()))?;
                let mut buf = Vec::new();
                BufReader::new(&mut f)
                    .read_to_end(&mut buf)
                    .with_context(|| format!("read model {}", path.display()))?;
                Ok(buf)
            }
            Origin::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Model stored as JSON (numbers or arrays for segments, nested arrays for
/// the target trie).
pub struct JsonModelSource {
    origin: Origin,
}

impl JsonModelSource {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            origin: Origin::Path(path.as_ref().to_path_buf()),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            origin: Origin::Bytes(bytes),
        }
    }
}

impl ModelSource for JsonModelSource {
    fn load_model_data(&self) -> Result<ModelData> {
        ModelData::from_json_slice(&self.origin.read()?)
    }
}

/// Model stored as bincode.
pub struct BincodeModelSource {
    origin: Origin,
}

impl BincodeModelSource {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            origin: Origin::Path(path.as_ref().to_path_buf()),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            origin: Origin::Bytes(bytes),
        }
    }
}

impl ModelSource for BincodeModelSource {
    fn load_model_data(&self) -> Result<ModelData> {
        ModelData::from_bincode_slice(&self.origin.read()?)
    }
}

/// Builds a packed model from plain dictionary entries.
///
/// # Example
/// ```
/// use libtranslit_core::ModelBuilder;
///
/// let mut builder = ModelBuilder::new();
/// builder.add("ni", "你", -1.0);
/// builder.add("hao", "好", -1.5);
/// let model = builder.build().unwrap();
/// assert_eq!(model.source_segments.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    entries: BTreeMap<String, BTreeMap<String, f64>>,
    default_prob: f64,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            default_prob: DEFAULT_PROB_SCALE,
        }
    }

    /// Quantization scale; probabilities are stored as `round(log_p * scale)`.
    pub fn with_default_prob(mut self, scale: f64) -> Self {
        self.default_prob = scale;
        self
    }

    /// Add an entry. Repeated pairs keep the higher log-probability.
    pub fn add(&mut self, source: &str, target: &str, log_prob: f64) {
        if source.is_empty() || target.is_empty() || !log_prob.is_finite() {
            return;
        }
        let slot = self
            .entries
            .entry(source.to_string())
            .or_default()
            .entry(target.to_string())
            .or_insert(f64::NEG_INFINITY);
        if log_prob > *slot {
            *slot = log_prob;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(&self) -> Result<ModelData> {
        if self.entries.is_empty() {
            bail!("cannot build a model without entries");
        }

        let mut source_freq: BTreeMap<String, u64> = BTreeMap::new();
        let mut target_freq: BTreeMap<String, u64> = BTreeMap::new();
        for (source, targets) in &self.entries {
            for ch in source.chars() {
                *source_freq.entry(ch.to_string()).or_default() += 1;
            }
            for target in targets.keys() {
                for ch in target.chars() {
                    *target_freq.entry(ch.to_string()).or_default() += 1;
                }
            }
        }

        let source_map = huffman_trie(&source_freq)?.codes();
        let target_map = huffman_trie(&target_freq)?;
        let target_codes = target_map.codes();

        let lookup_source = |ch: char| source_map.get(ch.encode_utf8(&mut [0u8; 4]) as &str).copied();
        let lookup_target = |ch: char| target_codes.get(ch.encode_utf8(&mut [0u8; 4]) as &str).copied();

        let mut rows: Vec<(EncodedSegment, Vec<(EncodedSegment, i32)>)> =
            Vec::with_capacity(self.entries.len());
        for (source, targets) in &self.entries {
            let encoded = pack(source.chars(), lookup_source)
                .ok_or_else(|| anyhow!("source {:?} exceeds code limits", source))?;
            let mut ranked: Vec<(&String, f64)> =
                targets.iter().map(|(t, p)| (t, *p)).collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            let mut packed = Vec::with_capacity(ranked.len());
            for (target, log_prob) in ranked {
                let segment = pack(target.chars(), lookup_target)
                    .ok_or_else(|| anyhow!("target {:?} exceeds code limits", target))?;
                let quantized = (log_prob * self.default_prob)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                packed.push((segment, quantized));
            }
            rows.push((encoded, packed));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut model = ModelData {
            source_segments: Vec::with_capacity(rows.len()),
            target_positions: Vec::with_capacity(rows.len()),
            target_segments: Vec::new(),
            target_probs: Vec::new(),
            source_map,
            target_map,
            default_prob: self.default_prob,
        };
        for (encoded, targets) in rows {
            model.source_segments.push(encoded);
            model.target_positions.push(model.target_segments.len() as u32);
            for (segment, prob) in targets {
                model.target_segments.push(segment);
                model.target_probs.push(prob);
            }
        }
        model.validate()?;
        tracing::debug!(
            sources = model.source_segments.len(),
            targets = model.target_segments.len(),
            "built transliteration model"
        );
        Ok(model)
    }
}

/// Huffman trie over symbol frequencies. A lone symbol gets a one-bit code.
fn huffman_trie(freqs: &BTreeMap<String, u64>) -> Result<TargetTrie> {
    let mut heap: Heap<TargetTrie> = Heap::with_capacity(freqs.len());
    for (symbol, freq) in freqs {
        heap.insert(*freq as f64, TargetTrie::Leaf(symbol.clone()));
    }
    if heap.count() == 1 {
        if let Some(TargetTrie::Leaf(symbol)) = heap.remove() {
            return Ok(TargetTrie::branch(
                TargetTrie::Leaf(symbol.clone()),
                TargetTrie::Leaf(symbol),
            ));
        }
    }
    loop {
        let Some((k0, zero)) = heap.remove_entry() else {
            bail!("empty alphabet");
        };
        let Some((k1, one)) = heap.remove_entry() else {
            return Ok(zero);
        };
        heap.insert(k0 + k1, TargetTrie::branch(zero, one));
    }
}
