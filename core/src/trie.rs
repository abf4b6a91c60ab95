/// Prefix trie over token inventories.
use ahash::AHashMap;

/// Character trie holding the set of valid phonetic tokens.
///
/// Used by [`crate::SyllableSegmenter`] to find every token that can start at
/// a given input position.
///
/// # Example
/// ```
/// use libtranslit_core::trie::TrieNode;
///
/// let trie: TrieNode = ["ka", "kha", "k"].into_iter().collect();
/// assert!(trie.contains_word("kha"));
/// assert!(!trie.contains_word("kh"));
///
/// let input: Vec<char> = "khana".chars().collect();
/// assert_eq!(trie.walk_prefixes(&input, 0), vec![1, 3]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TrieNode {
    children: AHashMap<char, TrieNode>,
    terminal: bool,
}

impl TrieNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a token. Empty tokens are ignored.
    pub fn insert(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        let mut node = self;
        for ch in token.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.terminal = true;
    }

    fn descend(&self, prefix: &str) -> Option<&TrieNode> {
        let mut node = self;
        for ch in prefix.chars() {
            node = node.children.get(&ch)?;
        }
        Some(node)
    }

    /// Whether `word` was inserted as a complete token.
    pub fn contains_word(&self, word: &str) -> bool {
        self.descend(word).is_some_and(|n| n.terminal)
    }

    /// Whether some inserted token starts with `prefix`.
    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.descend(prefix).is_some()
    }

    /// Exclusive end indices of every token matching `input` from `start`,
    /// shortest first.
    pub fn walk_prefixes(&self, input: &[char], start: usize) -> Vec<usize> {
        let mut ends = Vec::new();
        let mut node = self;
        for (offset, ch) in input.iter().enumerate().skip(start) {
            match node.children.get(ch) {
                Some(child) => {
                    node = child;
                    if node.terminal {
                        ends.push(offset + 1);
                    }
                }
                None => break,
            }
        }
        ends
    }

    /// Number of tokens stored below this node.
    pub fn len(&self) -> usize {
        self.children.values().map(TrieNode::len).sum::<usize>() + usize::from(self.terminal)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && !self.terminal
    }
}

impl<S: AsRef<str>> FromIterator<S> for TrieNode {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut trie = TrieNode::new();
        for token in iter {
            trie.insert(token.as_ref());
        }
        trie
    }
}
