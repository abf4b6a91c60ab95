//! Decoder output types.

use serde::{Deserialize, Serialize};

/// A single transliteration candidate.
///
/// `score` is a natural-log probability (higher is better). `range` is the
/// number of leading tokens the candidate covers; prefix completions cover
/// fewer tokens than the full input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub score: f64,
    pub range: usize,
}

impl Candidate {
    pub fn new<T: Into<String>>(text: T, score: f64, range: usize) -> Self {
        Candidate {
            text: text.into(),
            score,
            range,
        }
    }
}

/// Result of one `Engine::decode` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Source tokens as typed, one per segment of the best token path.
    pub tokens: Vec<String>,
    /// Ranked candidates, best first, unique by text.
    pub candidates: Vec<Candidate>,
}

impl Response {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Text of the top candidate.
    pub fn best(&self) -> Option<&str> {
        self.candidates.first().map(|c| c.text.as_str())
    }

    pub fn texts(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.text.as_str()).collect()
    }
}
