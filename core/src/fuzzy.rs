//! Fuzzy equivalences between phonetic tokens.
use ahash::AHashMap;

/// Symmetric token equivalences with per-rule penalties.
///
/// Rules are textual pairs `"a=b"` or `"a=b:penalty"`; a lower penalty ranks
/// the alternative earlier. Both directions are registered.
#[derive(Debug, Clone, Default)]
pub struct FuzzyMap {
    map: AHashMap<String, Vec<(String, f32)>>,
}

const DEFAULT_PENALTY: f32 = 1.0;

impl FuzzyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from rule strings, skipping malformed entries.
    ///
    /// ```
    /// use libtranslit_core::FuzzyMap;
    ///
    /// let fm = FuzzyMap::from_rules(&["sh=s:0.5".to_string(), "v=w".to_string()]);
    /// assert_eq!(fm.alternatives("s"), vec!["s", "sh"]);
    /// assert_eq!(fm.is_equivalent("w", "v"), Some(1.0));
    /// ```
    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Self {
        let mut fm = FuzzyMap::new();
        for rule in rules {
            let rule = rule.as_ref();
            let (pair, penalty) = match rule.split_once(':') {
                Some((pair, p)) => (pair, p.trim().parse::<f32>().unwrap_or(DEFAULT_PENALTY)),
                None => (rule, DEFAULT_PENALTY),
            };
            match pair.split_once('=') {
                Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
                    fm.add_rule(a.trim(), b.trim(), penalty);
                }
                _ => tracing::debug!(rule, "skipping malformed fuzzy rule"),
            }
        }
        fm
    }

    /// Register `a` and `b` as equivalent in both directions.
    pub fn add_rule(&mut self, a: &str, b: &str, penalty: f32) {
        if a == b {
            return;
        }
        self.insert_directed(a, b, penalty);
        self.insert_directed(b, a, penalty);
    }

    fn insert_directed(&mut self, from: &str, to: &str, penalty: f32) {
        let alts = self.map.entry(from.to_string()).or_default();
        match alts.iter_mut().find(|(alt, _)| alt == to) {
            Some(existing) => existing.1 = existing.1.min(penalty),
            None => alts.push((to.to_string(), penalty)),
        }
        alts.sort_by(|x, y| x.1.total_cmp(&y.1));
    }

    /// `token` followed by its equivalents, cheapest first.
    pub fn alternatives(&self, token: &str) -> Vec<String> {
        let mut out = vec![token.to_string()];
        if let Some(alts) = self.map.get(token) {
            out.extend(alts.iter().map(|(alt, _)| alt.clone()));
        }
        out
    }

    /// Penalty linking `a` to `b`; `Some(0.0)` when they are identical.
    pub fn is_equivalent(&self, a: &str, b: &str) -> Option<f32> {
        if a == b {
            return Some(0.0);
        }
        self.map
            .get(a)?
            .iter()
            .find(|(alt, _)| alt == b)
            .map(|(_, p)| *p)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
