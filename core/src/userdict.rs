//! Personal dictionary: learns which target a user commits for a source.
//!
//! Responsibilities implemented here:
//! - `PersonalDict`: two-tier counts (`latest` for recent activity,
//!   `permanent` for the persisted history) with recency-weighted lookup and a
//!   hard cap on the permanent tier.
//! - `PersistenceStore`: the string key/value boundary the dictionary writes
//!   through, with an in-memory backend and a `redb` backend.
//!
//! The stored value is a JSON object `{ source: { target: count } }` under the
//! key `<input_tool>_user_dictionary`.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use redb::ReadableTable;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::heap::Heap;
use crate::Config;

/// String key/value storage used for user data.
pub trait PersistenceStore {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process store. Clones share the same contents.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<AHashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl PersistenceStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.inner.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Redb-backed store: one table of string keys to string values.
pub struct RedbStore {
    db: redb::Database,
    path: PathBuf,
}

impl RedbStore {
    const TABLE_DEF: redb::TableDefinition<'static, &'static str, &'static str> =
        redb::TableDefinition::new("user_data");

    /// Create or open a database at `path`, creating parent directories.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        let db = redb::Database::create(path)
            .with_context(|| format!("open user store {}", path.display()))?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(Self::TABLE_DEF) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(Self::TABLE_DEF) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for item in table.iter()? {
            let (k, _) = item?;
            out.push(k.value().to_string());
        }
        Ok(out)
    }
}

impl PersistenceStore for RedbStore {
    fn get_item(&self, key: &str) -> Option<String> {
        match self.read(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "user store read failed");
                None
            }
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(Self::TABLE_DEF)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }
}

/// Targets of one source with their counts, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
struct TargetCounts(Vec<(String, u32)>);

impl TargetCounts {
    fn get(&self, target: &str) -> u32 {
        self.0
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Add `by` to `target`; returns true if the target was new.
    fn add(&mut self, target: &str, by: u32) -> bool {
        match self.0.iter_mut().find(|(t, _)| t == target) {
            Some((_, count)) => {
                *count = count.saturating_add(by);
                false
            }
            None => {
                self.0.push((target.to_string(), by));
                true
            }
        }
    }
}

impl Serialize for TargetCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (target, count) in &self.0 {
            map.serialize_entry(target, count)?;
        }
        map.end()
    }
}

struct TargetCountsVisitor;

impl<'de> Visitor<'de> for TargetCountsVisitor {
    type Value = TargetCounts;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of target to count")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TargetCounts, A::Error> {
        let mut out = TargetCounts::default();
        while let Some((target, count)) = access.next_entry::<String, u32>()? {
            if count > 0 {
                out.add(&target, count);
            }
        }
        Ok(out)
    }
}

impl<'de> Deserialize<'de> for TargetCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TargetCountsVisitor)
    }
}

/// source -> targets, with a running pair count.
#[derive(Debug, Clone, Default)]
struct CountMap {
    sources: AHashMap<String, TargetCounts>,
    pairs: usize,
}

impl CountMap {
    fn add(&mut self, source: &str, target: &str, by: u32) {
        let targets = self.sources.entry(source.to_string()).or_default();
        if targets.add(target, by) {
            self.pairs += 1;
        }
    }

    fn get(&self, source: &str, target: &str) -> u32 {
        self.sources.get(source).map(|t| t.get(target)).unwrap_or(0)
    }

    fn clear(&mut self) {
        self.sources.clear();
        self.pairs = 0;
    }

    fn from_wire(wire: BTreeMap<String, TargetCounts>) -> Self {
        let mut map = CountMap::default();
        for (source, targets) in wire {
            if targets.0.is_empty() {
                continue;
            }
            map.pairs += targets.0.len();
            map.sources.insert(source, targets);
        }
        map
    }

    fn to_wire(&self) -> BTreeMap<&str, &TargetCounts> {
        self.sources.iter().map(|(s, t)| (s.as_str(), t)).collect()
    }
}

/// Per-user adaptive dictionary.
pub struct PersonalDict {
    latest: CountMap,
    permanent: CountMap,
    store: Option<Rc<dyn PersistenceStore>>,
    key: String,
    latest_factor: u32,
    max_latest_entries: usize,
    max_permanent_size: usize,
}

impl fmt::Debug for PersonalDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalDict")
            .field("key", &self.key)
            .field("latest_pairs", &self.latest.pairs)
            .field("permanent_pairs", &self.permanent.pairs)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl PersonalDict {
    /// Create a dictionary and load any previously persisted permanent map.
    ///
    /// Without a store the dictionary still learns, but only in memory.
    pub fn new(config: &Config, store: Option<Rc<dyn PersistenceStore>>) -> Self {
        let mut dict = Self {
            latest: CountMap::default(),
            permanent: CountMap::default(),
            store,
            key: config.user_dict_key(),
            latest_factor: config.latest_factor,
            max_latest_entries: config.max_latest_entries,
            max_permanent_size: config.max_permanent_size,
        };
        dict.load();
        dict
    }

    fn load(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        let Some(raw) = store.get_item(&self.key) else {
            return;
        };
        match serde_json::from_str::<BTreeMap<String, TargetCounts>>(&raw) {
            Ok(wire) => {
                self.permanent = CountMap::from_wire(wire);
                tracing::debug!(
                    key = %self.key,
                    pairs = self.permanent.pairs,
                    "loaded user dictionary"
                );
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "ignoring malformed user dictionary");
            }
        }
    }

    /// Record one commit of `target` for `source`.
    pub fn record(&mut self, source: &str, target: &str) {
        if source.is_empty() || target.is_empty() {
            return;
        }
        self.latest.add(source, target, 1);
        if self.latest.pairs > self.max_latest_entries {
            self.merge_and_evict();
        }
    }

    /// Preferred target for `source`, if any has been recorded.
    ///
    /// Score is `latest_factor * latest + permanent`; on equal scores the
    /// target seen first wins (latest tier before permanent tier).
    pub fn lookup(&self, source: &str) -> Option<String> {
        let mut best: Option<(&str, u64)> = None;
        let tiers = [self.latest.sources.get(source), self.permanent.sources.get(source)];
        for targets in tiers.into_iter().flatten() {
            for (target, _) in &targets.0 {
                let score = self.score(source, target);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((target.as_str(), score));
                }
            }
        }
        best.map(|(t, _)| t.to_string())
    }

    fn score(&self, source: &str, target: &str) -> u64 {
        self.latest_factor as u64 * self.latest.get(source, target) as u64
            + self.permanent.get(source, target) as u64
    }

    /// `(latest, permanent)` counts of a pair.
    pub fn counts(&self, source: &str, target: &str) -> (u32, u32) {
        (
            self.latest.get(source, target),
            self.permanent.get(source, target),
        )
    }

    /// Fold recent activity into the permanent tier, enforce the cap and
    /// write the permanent tier to the store.
    pub fn persist(&mut self) -> Result<()> {
        self.merge_and_evict();
        let Some(store) = &self.store else {
            return Ok(());
        };
        let value = self.permanent_json()?;
        store
            .set_item(&self.key, &value)
            .with_context(|| format!("persist user dictionary {}", self.key))?;
        tracing::debug!(key = %self.key, pairs = self.permanent.pairs, "persisted user dictionary");
        Ok(())
    }

    /// The permanent tier in its stored JSON form.
    pub fn permanent_json(&self) -> Result<String> {
        serde_json::to_string(&self.permanent.to_wire()).context("serialize user dictionary")
    }

    fn merge_and_evict(&mut self) {
        for (source, targets) in self.latest.sources.drain() {
            for (target, count) in targets.0 {
                self.permanent.add(&source, &target, count);
            }
        }
        self.latest.pairs = 0;

        let total = self.permanent.pairs;
        let cap = self.max_permanent_size;
        if total <= cap {
            return;
        }

        // Sorted by source so equal counts are kept the same way on every run.
        let mut sources: Vec<(&String, &TargetCounts)> = self.permanent.sources.iter().collect();
        sources.sort_unstable_by(|a, b| a.0.cmp(b.0));
        let mut kept: Heap<(&str, &str)> = Heap::with_capacity(cap + 1);
        for (source, targets) in sources {
            for (target, count) in &targets.0 {
                kept.push_bounded(*count as f64, (source.as_str(), target.as_str()), cap);
            }
        }
        let threshold = kept.peek_key().unwrap_or(f64::INFINITY);
        // Pairs at the threshold survive only if the heap kept them.
        let at_threshold: AHashSet<(String, String)> = kept
            .iter()
            .filter(|(k, _)| *k == threshold)
            .map(|(_, (s, t))| (s.to_string(), t.to_string()))
            .collect();
        drop(kept);

        let mut removed = 0usize;
        self.permanent.sources.retain(|source, targets| {
            targets.0.retain(|(target, count)| {
                let c = *count as f64;
                let keep = c > threshold
                    || (c == threshold
                        && at_threshold.contains(&(source.clone(), target.clone())));
                if !keep {
                    removed += 1;
                }
                keep
            });
            !targets.0.is_empty()
        });
        self.permanent.pairs -= removed;
        tracing::debug!(removed, threshold, remaining = self.permanent.pairs, "evicted user entries");
    }

    pub fn latest_len(&self) -> usize {
        self.latest.pairs
    }

    pub fn permanent_len(&self) -> usize {
        self.permanent.pairs
    }

    /// Distinct pairs across both tiers.
    pub fn len(&self) -> usize {
        let mut n = self.permanent.pairs;
        for (source, targets) in &self.latest.sources {
            n += targets
                .0
                .iter()
                .filter(|(t, _)| self.permanent.get(source, t) == 0)
                .count();
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.latest.pairs == 0 && self.permanent.pairs == 0
    }

    /// Forget everything in memory. The store is untouched until `persist`.
    pub fn clear(&mut self) {
        self.latest.clear();
        self.permanent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_latest: usize, max_permanent: usize) -> Config {
        Config {
            input_tool: "test".into(),
            max_latest_entries: max_latest,
            max_permanent_size: max_permanent,
            ..Config::default()
        }
    }

    fn with_store(cfg: &Config, store: &MemoryStore) -> PersonalDict {
        PersonalDict::new(cfg, Some(Rc::new(store.clone())))
    }

    #[test]
    fn record_then_lookup() {
        let mut dict = PersonalDict::new(&config(100, 100), None);
        assert_eq!(dict.lookup("ni"), None);
        for _ in 0..3 {
            dict.record("ni", "你");
        }
        assert_eq!(dict.lookup("ni").as_deref(), Some("你"));
        assert_eq!(dict.counts("ni", "你"), (3, 0));
    }

    #[test]
    fn survives_persist_and_reload() {
        let cfg = config(100, 100);
        let store = MemoryStore::new();
        let mut dict = with_store(&cfg, &store);
        for _ in 0..3 {
            dict.record("ni", "你");
        }
        dict.persist().expect("persist");
        assert_eq!(dict.latest_len(), 0);

        let reloaded = with_store(&cfg, &store);
        assert_eq!(reloaded.lookup("ni").as_deref(), Some("你"));
        assert_eq!(reloaded.counts("ni", "你"), (0, 3));
        assert!(store.get_item("test_user_dictionary").is_some());
    }

    #[test]
    fn recent_commits_outweigh_old_ones() {
        let cfg = config(100, 100);
        let store = MemoryStore::new();
        let mut dict = with_store(&cfg, &store);
        for _ in 0..4 {
            dict.record("ma", "吗");
        }
        dict.persist().expect("persist");
        dict.record("ma", "妈");
        // latest_factor (5) * 1 > 4
        assert_eq!(dict.lookup("ma").as_deref(), Some("妈"));
    }

    #[test]
    fn ties_prefer_latest_tier_then_first_seen() {
        let mut cfg = config(100, 100);
        cfg.latest_factor = 1;
        let mut dict = PersonalDict::new(&cfg, None);
        dict.record("a", "x");
        dict.persist().expect("persist");
        dict.record("a", "y");
        assert_eq!(dict.lookup("a").as_deref(), Some("y"));

        let mut dict = PersonalDict::new(&cfg, None);
        dict.record("b", "first");
        dict.record("b", "second");
        assert_eq!(dict.lookup("b").as_deref(), Some("first"));
    }

    #[test]
    fn latest_overflow_merges_synchronously() {
        let mut dict = PersonalDict::new(&config(2, 100), None);
        dict.record("a", "1");
        dict.record("b", "2");
        assert_eq!(dict.latest_len(), 2);
        dict.record("c", "3");
        assert_eq!(dict.latest_len(), 0);
        assert_eq!(dict.permanent_len(), 3);
        assert_eq!(dict.lookup("c").as_deref(), Some("3"));
    }

    #[test]
    fn eviction_respects_cap_and_drops_rare_pairs() {
        let cfg = config(1000, 3);
        let mut dict = PersonalDict::new(&cfg, None);
        for (source, target, times) in [
            ("a", "1", 5),
            ("b", "2", 4),
            ("c", "3", 3),
            ("d", "4", 1),
            ("e", "5", 1),
        ] {
            for _ in 0..times {
                dict.record(source, target);
            }
        }
        dict.persist().expect("persist");
        assert_eq!(dict.permanent_len(), 3);
        assert_eq!(dict.lookup("a").as_deref(), Some("1"));
        assert_eq!(dict.lookup("c").as_deref(), Some("3"));
        assert_eq!(dict.lookup("d"), None);
        assert_eq!(dict.lookup("e"), None);
    }

    #[test]
    fn eviction_cap_holds_with_equal_counts() {
        let cfg = config(1000, 10);
        let mut dict = PersonalDict::new(&cfg, None);
        for i in 0..25 {
            dict.record(&format!("s{}", i), "t");
        }
        dict.persist().expect("persist");
        assert_eq!(dict.permanent_len(), 10);
        assert!(dict.len() <= 10);
    }

    #[test]
    fn tied_eviction_is_repeatable() {
        let cfg = config(1000, 5);
        let run = || {
            let mut dict = PersonalDict::new(&cfg, None);
            for i in 0..12 {
                dict.record(&format!("s{:02}", i), "t");
            }
            dict.persist().expect("persist");
            dict.permanent_json().expect("json")
        };
        let first = run();
        for _ in 0..10 {
            assert_eq!(run(), first);
        }
        let kept: BTreeMap<String, BTreeMap<String, u32>> =
            serde_json::from_str(&first).expect("parse");
        assert_eq!(kept.len(), 5);
    }

    #[test]
    fn malformed_store_value_starts_empty() {
        let cfg = config(100, 100);
        let store = MemoryStore::new();
        store
            .set_item(&cfg.user_dict_key(), "{not json")
            .expect("set");
        let dict = with_store(&cfg, &store);
        assert!(dict.is_empty());
    }

    #[test]
    fn stored_json_has_nested_shape() {
        let cfg = config(100, 100);
        let mut dict = PersonalDict::new(&cfg, None);
        dict.record("ni", "你");
        dict.record("ni", "你");
        dict.record("hao", "好");
        dict.persist().expect("persist");
        let value: serde_json::Value =
            serde_json::from_str(&dict.permanent_json().expect("json")).expect("parse");
        assert_eq!(value["ni"]["你"], 2);
        assert_eq!(value["hao"]["好"], 1);
    }

    #[test]
    fn redb_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RedbStore::new(dir.path().join("user.redb")).expect("open");
        assert_eq!(store.get_item("missing"), None);
        store.set_item("k", "v1").expect("set");
        store.set_item("k", "v2").expect("set");
        assert_eq!(store.get_item("k").as_deref(), Some("v2"));
        assert_eq!(store.keys().expect("keys"), vec!["k".to_string()]);
    }
}
