//! Field-dispatch trie
//!
//! Maps known lowercase ASCII strings to registered callback slots; used by
//! the HTTP layer to route parsed header field names. 26-ary (a-z), node 0
//! is the root, sibling arrays are allocated lazily, and insertion is
//! append-only: a path, once inserted, is never removed and existing slots
//! are never invalidated.
//!
//! Generic over the slot type `C`, so callers choose their own callback
//! signature.

use fnet_core::{NetError, NetResult};

const FANOUT: usize = 26;

pub struct CbTrie<C> {
    /// Child index arrays; entry 0 means "no child".
    next: Vec<[u32; FANOUT]>,
    /// Slot per node, filled on terminal nodes.
    slots: Vec<Option<C>>,
    /// Highest allocated node id.
    count: u32,
}

impl<C> CbTrie<C> {
    pub fn new() -> Self {
        Self {
            next: vec![[0; FANOUT]],
            slots: vec![None],
            count: 0,
        }
    }

    /// Insert `key` and bind `cb` to its terminal node.
    ///
    /// The whole key is validated before any mutation: a byte outside
    /// `a-z` returns [`NetError::InvalidTrieKey`] and leaves the trie
    /// untouched. Re-inserting a key replaces its slot.
    pub fn insert(&mut self, key: &[u8], cb: C) -> NetResult<()> {
        if let Some(&bad) = key.iter().find(|b| !b.is_ascii_lowercase()) {
            return Err(NetError::InvalidTrieKey(bad));
        }
        let mut p = 0usize;
        for &b in key {
            let c = (b - b'a') as usize;
            if self.next[p][c] == 0 {
                self.count += 1;
                self.next[p][c] = self.count;
                self.next.push([0; FANOUT]);
                self.slots.push(None);
            }
            p = self.next[p][c] as usize;
        }
        self.slots[p] = Some(cb);
        Ok(())
    }

    /// Walk `key` read-only; `Some` iff the full key matches an inserted
    /// path with a bound slot. Bytes outside `a-z` are simply an absent
    /// path, never an error.
    pub fn lookup(&self, key: &[u8]) -> Option<&C> {
        self.slots[self.walk(key)?].as_ref()
    }

    /// Mutable variant of [`CbTrie::lookup`].
    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut C> {
        let p = self.walk(key)?;
        self.slots[p].as_mut()
    }

    /// Number of allocated nodes (excluding the root).
    pub fn node_count(&self) -> usize {
        self.count as usize
    }

    fn walk(&self, key: &[u8]) -> Option<usize> {
        let mut p = 0usize;
        for &b in key {
            if !b.is_ascii_lowercase() {
                return None;
            }
            let nxt = self.next[p][(b - b'a') as usize];
            if nxt == 0 {
                return None;
            }
            p = nxt as usize;
        }
        Some(p)
    }
}

impl<C> Default for CbTrie<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_iff_inserted() {
        let mut trie: CbTrie<u32> = CbTrie::new();
        trie.insert(b"contentlength", 1).unwrap();
        trie.insert(b"host", 2).unwrap();
        trie.insert(b"connection", 3).unwrap();

        assert_eq!(trie.lookup(b"contentlength"), Some(&1));
        assert_eq!(trie.lookup(b"host"), Some(&2));
        assert_eq!(trie.lookup(b"connection"), Some(&3));

        // Prefixes, extensions and neighbours of inserted keys miss.
        assert_eq!(trie.lookup(b"content"), None);
        assert_eq!(trie.lookup(b"hosts"), None);
        assert_eq!(trie.lookup(b"cookie"), None);
        assert_eq!(trie.lookup(b""), None);
    }

    #[test]
    fn test_shared_prefix_keys() {
        let mut trie: CbTrie<&str> = CbTrie::new();
        trie.insert(b"con", "short").unwrap();
        trie.insert(b"connection", "long").unwrap();
        assert_eq!(trie.lookup(b"con"), Some(&"short"));
        assert_eq!(trie.lookup(b"connection"), Some(&"long"));
        assert_eq!(trie.lookup(b"conn"), None);
    }

    #[test]
    fn test_reinsert_replaces_slot() {
        let mut trie: CbTrie<u32> = CbTrie::new();
        trie.insert(b"host", 1).unwrap();
        trie.insert(b"host", 9).unwrap();
        assert_eq!(trie.lookup(b"host"), Some(&9));
    }

    #[test]
    fn test_invalid_key_rejected_before_mutation() {
        let mut trie: CbTrie<u32> = CbTrie::new();
        let nodes_before = trie.node_count();
        assert_eq!(
            trie.insert(b"content-length", 1),
            Err(NetError::InvalidTrieKey(b'-'))
        );
        assert_eq!(
            trie.insert(b"Host", 1),
            Err(NetError::InvalidTrieKey(b'H'))
        );
        assert_eq!(trie.node_count(), nodes_before);
    }

    #[test]
    fn test_invalid_lookup_is_none() {
        let mut trie: CbTrie<u32> = CbTrie::new();
        trie.insert(b"host", 1).unwrap();
        assert_eq!(trie.lookup(b"Host"), None);
        assert_eq!(trie.lookup(b"ho-st"), None);
    }

    #[test]
    fn test_lookup_mut() {
        let mut trie: CbTrie<u32> = CbTrie::new();
        trie.insert(b"counter", 0).unwrap();
        *trie.lookup_mut(b"counter").unwrap() += 1;
        assert_eq!(trie.lookup(b"counter"), Some(&1));
    }
}
