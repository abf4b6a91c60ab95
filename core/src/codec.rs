//! Bit-packed dictionary codec.
//!
//! The model stores every source token sequence and every target word as one
//! or more 63-bit packed buffers. Source characters are packed with the
//! prefix codes of a [`SourceMap`]; target words are unpacked by walking a
//! binary [`TargetTrie`] one bit at a time.
//!
//! Buffer layout (shared by the model builder and [`Codec::encode`]):
//! - characters are packed in input order, so the least-significant bits
//!   hold the first character;
//! - a buffer is flushed once `size + code_len >= 63`, with a terminator bit
//!   set at position `size` ("no more bits above this one");
//! - multi-buffer segments list the most-significant buffer first.
//!
//! Decoding walks the buffers least-significant first, and each buffer from
//! the LSB until only the terminator is left.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashMap;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::ModelData;

/// Highest bit position a buffer may use, terminator included.
pub const MAX_BUFFER_BITS: u32 = 63;

/// Default guard against combinatorial expansion in [`Codec::target_mappings`].
pub const DEFAULT_MAX_SEQUENCE_SIZE: usize = 64;

/// Prefix code of one source character: `bits` holds `len` bits, LSB first.
///
/// Serialized as a two-element array `[bits, len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitCode(pub u64, pub u32);

impl BitCode {
    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn len(&self) -> u32 {
        self.1
    }

    pub fn is_empty(&self) -> bool {
        self.1 == 0
    }
}

/// Character → prefix code table used to pack source sequences.
pub type SourceMap = AHashMap<char, BitCode>;

/// One or more packed buffers, most-significant first.
///
/// Ordering compares the buffer count first and the buffers lexicographically
/// second; the model's source table is sorted with this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedSegment(pub Vec<u64>);

impl EncodedSegment {
    pub fn single(buffer: u64) -> Self {
        EncodedSegment(vec![buffer])
    }

    pub fn buffers(&self) -> &[u64] {
        &self.0
    }
}

impl Ord for EncodedSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for EncodedSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// JSON models write single-buffer segments as a bare number and longer ones
// as an array; binary formats always carry the vector.
#[derive(Deserialize)]
#[serde(untagged)]
enum SegmentRepr {
    One(u64),
    Many(Vec<u64>),
}

impl Serialize for EncodedSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [one] if serializer.is_human_readable() => serializer.serialize_u64(*one),
            _ => self.0.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for EncodedSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            match SegmentRepr::deserialize(deserializer)? {
                SegmentRepr::One(n) => Ok(EncodedSegment(vec![n])),
                SegmentRepr::Many(v) => Ok(EncodedSegment(v)),
            }
        } else {
            Vec::<u64>::deserialize(deserializer).map(EncodedSegment)
        }
    }
}

/// Binary decoding trie. Bit 0 selects the first child, bit 1 the second.
///
/// In JSON the trie is nested two-element arrays with string leaves, e.g.
/// `["a", ["b", "c"]]`.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetTrie {
    Leaf(String),
    Branch(Box<TargetTrie>, Box<TargetTrie>),
}

impl TargetTrie {
    pub fn branch(zero: TargetTrie, one: TargetTrie) -> Self {
        TargetTrie::Branch(Box::new(zero), Box::new(one))
    }

    /// Prefix codes of every leaf, keyed by leaf text. The first step from the
    /// root is the least-significant bit.
    pub fn codes(&self) -> BTreeMap<String, BitCode> {
        let mut out = BTreeMap::new();
        let mut stack = vec![(self, 0u64, 0u32)];
        while let Some((node, bits, depth)) = stack.pop() {
            match node {
                TargetTrie::Leaf(text) => {
                    out.entry(text.clone()).or_insert(BitCode(bits, depth));
                }
                TargetTrie::Branch(zero, one) => {
                    stack.push((one, bits | (1u64 << depth), depth + 1));
                    stack.push((zero, bits, depth + 1));
                }
            }
        }
        out
    }
}

#[derive(Deserialize)]
#[serde(rename = "TargetTrie")]
enum TaggedTrie {
    Leaf(String),
    Branch(Box<TargetTrie>, Box<TargetTrie>),
}

#[derive(Serialize)]
#[serde(rename = "TargetTrie")]
enum TaggedTrieRef<'a> {
    Leaf(&'a str),
    Branch(&'a TargetTrie, &'a TargetTrie),
}

impl Serialize for TargetTrie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            match self {
                TargetTrie::Leaf(text) => serializer.serialize_str(text),
                TargetTrie::Branch(zero, one) => (zero, one).serialize(serializer),
            }
        } else {
            match self {
                TargetTrie::Leaf(text) => TaggedTrieRef::Leaf(text).serialize(serializer),
                TargetTrie::Branch(zero, one) => {
                    TaggedTrieRef::Branch(zero, one).serialize(serializer)
                }
            }
        }
    }
}

struct NestedTrieVisitor;

impl<'de> Visitor<'de> for NestedTrieVisitor {
    type Value = TargetTrie;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a leaf string or a two-element array")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<TargetTrie, E> {
        Ok(TargetTrie::Leaf(v.to_string()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TargetTrie, A::Error> {
        let zero: TargetTrie = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let one: TargetTrie = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(3, &self));
        }
        Ok(TargetTrie::branch(zero, one))
    }
}

impl<'de> Deserialize<'de> for TargetTrie {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(NestedTrieVisitor)
        } else {
            Ok(match TaggedTrie::deserialize(deserializer)? {
                TaggedTrie::Leaf(text) => TargetTrie::Leaf(text),
                TaggedTrie::Branch(zero, one) => TargetTrie::Branch(zero, one),
            })
        }
    }
}

/// Inclusive index range into the target arrays. `{0, -1}` is the empty
/// range returned on a lookup miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub start: i64,
    pub end: i64,
}

impl SegmentRange {
    pub const EMPTY: SegmentRange = SegmentRange { start: 0, end: -1 };

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    /// Target indices covered by this range.
    pub fn indices(&self) -> std::ops::Range<usize> {
        if self.is_empty() {
            0..0
        } else {
            self.start as usize..self.end as usize + 1
        }
    }
}

/// A decoded target word with its normalized log-probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub segment: String,
    pub prob: f64,
}

/// Pack `chars` with `lookup` into 63-bit-safe buffers.
///
/// Returns `None` when the input is empty or a character has no usable code.
pub fn pack<I, F>(chars: I, lookup: F) -> Option<EncodedSegment>
where
    I: IntoIterator<Item = char>,
    F: Fn(char) -> Option<BitCode>,
{
    let mut buffers = Vec::new();
    let mut current = 0u64;
    let mut size = 0u32;
    let mut packed_any = false;

    for ch in chars {
        let code = lookup(ch)?;
        if code.is_empty() || code.len() >= MAX_BUFFER_BITS {
            return None;
        }
        if size + code.len() >= MAX_BUFFER_BITS {
            buffers.push(current | (1u64 << size));
            current = 0;
            size = 0;
        }
        let mask = (1u64 << code.len()) - 1;
        current |= (code.bits() & mask) << size;
        size += code.len();
        packed_any = true;
    }

    if !packed_any {
        return None;
    }
    buffers.push(current | (1u64 << size));
    buffers.reverse();
    Some(EncodedSegment(buffers))
}

/// Decoder over a loaded model's segment tables.
#[derive(Debug, Clone)]
pub struct Codec {
    source_map: SourceMap,
    target_map: TargetTrie,
    source_segments: Vec<EncodedSegment>,
    target_positions: Vec<u32>,
    target_segments: Vec<EncodedSegment>,
    target_probs: Vec<i32>,
    default_prob: f64,
    max_sequence_size: usize,
}

impl Codec {
    /// Take ownership of a model's arrays. The model is validated first.
    pub fn new(model: ModelData) -> anyhow::Result<Self> {
        model.validate()?;
        let source_map = model
            .source_map
            .iter()
            .filter_map(|(key, code)| {
                let mut chars = key.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Some((ch, *code)),
                    _ => None,
                }
            })
            .collect();

        Ok(Self {
            source_map,
            target_map: model.target_map,
            source_segments: model.source_segments,
            target_positions: model.target_positions,
            target_segments: model.target_segments,
            target_probs: model.target_probs,
            default_prob: model.default_prob,
            max_sequence_size: DEFAULT_MAX_SEQUENCE_SIZE,
        })
    }

    pub fn set_max_sequence_size(&mut self, size: usize) {
        self.max_sequence_size = size.max(1);
    }

    pub fn default_prob(&self) -> f64 {
        self.default_prob
    }

    /// Number of distinct source segments in the model.
    pub fn num_sources(&self) -> usize {
        self.source_segments.len()
    }

    /// Pack a token sequence with the source map.
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Option<EncodedSegment> {
        let chars = tokens.iter().flat_map(|t| t.as_ref().chars());
        pack(chars, |ch| self.source_map.get(&ch).copied())
    }

    /// Unpack a segment with the target trie.
    pub fn decode(&self, segment: &EncodedSegment) -> String {
        let mut out = String::new();
        for buffer in segment.buffers().iter().rev() {
            self.decode_buffer(*buffer, &mut out);
        }
        out
    }

    fn decode_buffer(&self, mut num: u64, out: &mut String) {
        let root = &self.target_map;
        let mut node = root;

        while num > 1 {
            let bit = num & 1;
            num >>= 1;
            if let TargetTrie::Branch(zero, one) = node {
                node = if bit == 0 { zero } else { one };
            }
            if let TargetTrie::Leaf(text) = node {
                out.push_str(text);
                node = root;
            }
        }
    }

    /// Resolve a concrete token sequence to its target range.
    pub fn lookup_range<S: AsRef<str>>(&self, tokens: &[S]) -> SegmentRange {
        let Some(encoded) = self.encode(tokens) else {
            return SegmentRange::EMPTY;
        };
        match self.source_segments.binary_search(&encoded) {
            Ok(idx) => {
                let start = self.target_positions[idx] as i64;
                let end = self
                    .target_positions
                    .get(idx + 1)
                    .map(|p| *p as i64)
                    .unwrap_or(self.target_segments.len() as i64);
                SegmentRange {
                    start,
                    end: end - 1,
                }
            }
            Err(_) => SegmentRange::EMPTY,
        }
    }

    /// Decoded targets of a concrete token sequence.
    pub fn targets_for<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<Target> {
        let range = self.lookup_range(tokens);
        self.decode_range(range)
    }

    fn decode_range(&self, range: SegmentRange) -> Vec<Target> {
        range
            .indices()
            .map(|i| Target {
                segment: self.decode(&self.target_segments[i]),
                prob: self.target_probs[i] as f64 / self.default_prob,
            })
            .collect()
    }

    /// Expand per-position alternatives and collect every matching target.
    ///
    /// The first-alternative path is always tried first. When the number of
    /// concrete sequences would exceed the sequence-size guard only that
    /// path is tried. With `all_initials`, a hit on the first path ends the
    /// expansion.
    pub fn target_mappings(&self, tokens: &[Vec<String>], all_initials: bool) -> Vec<Target> {
        if tokens.is_empty() || tokens.iter().any(|alts| alts.is_empty()) {
            return Vec::new();
        }

        let combinations = tokens
            .iter()
            .try_fold(1usize, |acc, alts| acc.checked_mul(alts.len()));
        let expand = matches!(combinations, Some(n) if n <= self.max_sequence_size);

        let mut out = Vec::new();
        let mut choice = vec![0usize; tokens.len()];
        let mut sequence: Vec<&str> = Vec::with_capacity(tokens.len());
        let mut first = true;

        loop {
            sequence.clear();
            sequence.extend(tokens.iter().zip(&choice).map(|(alts, &i)| alts[i].as_str()));
            let range = self.lookup_range(&sequence);
            let hit = !range.is_empty();
            out.extend(self.decode_range(range));

            if !expand || (first && all_initials && hit) {
                break;
            }
            first = false;

            // Odometer step, last position fastest.
            let mut pos = tokens.len();
            loop {
                if pos == 0 {
                    return out;
                }
                pos -= 1;
                choice[pos] += 1;
                if choice[pos] < tokens[pos].len() {
                    break;
                }
                choice[pos] = 0;
            }
        }
        out
    }
}
