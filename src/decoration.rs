// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Error;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Bidirectional index from user keys to byte addresses.
///
/// Keys are unique per garland; addresses are stored canonically as byte
/// offsets and drift with edits the same way cursors do. The spatial side
/// is an ordered map from offset to key set, which makes range and line
/// queries a bounded walk.
#[derive(Debug, Default)]
pub(crate) struct DecorationIndex {
    by_key: FxHashMap<String, u64>,
    by_pos: BTreeMap<u64, BTreeSet<String>>,
}

impl DecorationIndex {
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Upserts one key. `None` removes it. Returns the prior address.
    pub fn set(&mut self, key: &str, address: Option<u64>) -> Option<u64> {
        let prior = self.by_key.get(key).copied();

        if let Some(prior) = prior {
            self.unlink(key, prior);
            self.by_key.remove(key);
        }

        if let Some(address) = address {
            self.by_key.insert(key.into(), address);
            self.by_pos.entry(address).or_default().insert(key.into());
        }

        prior
    }

    pub fn position(&self, key: &str) -> crate::Result<u64> {
        self.by_key
            .get(key)
            .copied()
            .ok_or_else(|| Error::DecorationNotFound(key.into()))
    }

    /// Decorations with `lo <= address < hi`, ascending by address.
    pub fn in_range(&self, lo: u64, hi: u64) -> Vec<(String, u64)> {
        let mut out = Vec::new();

        for (&pos, keys) in self.by_pos.range(lo..hi) {
            out.extend(keys.iter().map(|key| (key.clone(), pos)));
        }

        out
    }

    /// Shifts decorations through an insertion of `len` bytes at `at`.
    /// Same direction as cursors: `before` parks entries sitting at `at`.
    pub fn translate_insert(&mut self, at: u64, len: u64, before: bool) {
        let bound = if before { at + 1 } else { at };
        let tail = self.by_pos.split_off(&bound);

        for (pos, keys) in tail {
            for key in &keys {
                self.by_key.insert(key.clone(), pos + len);
            }
            self.by_pos.insert(pos + len, keys);
        }
    }

    /// Shifts decorations through a deletion of `[at, at + len)`.
    ///
    /// Entries in `(at, at + len]` collapse onto `at`, same direction as
    /// cursors. Their pre-edit `(key, address)` pairs are returned so an
    /// undo can restore them exactly.
    pub fn translate_delete(&mut self, at: u64, len: u64) -> Vec<(String, u64)> {
        let mut saved = Vec::new();
        let tail = self.by_pos.split_off(&(at + 1));

        for (pos, keys) in tail {
            if pos <= at + len {
                for key in keys {
                    self.by_key.insert(key.clone(), at);
                    self.by_pos.entry(at).or_default().insert(key.clone());
                    saved.push((key, pos));
                }
            } else {
                for key in &keys {
                    self.by_key.insert(key.clone(), pos - len);
                }
                self.by_pos.insert(pos - len, keys);
            }
        }

        saved
    }

    /// Re-establishes entries captured by [`DecorationIndex::translate_delete`].
    pub fn restore(&mut self, saved: &[(String, u64)]) {
        for (key, address) in saved {
            self.set(key, Some(*address));
        }
    }

    fn unlink(&mut self, key: &str, pos: u64) {
        if let Some(keys) = self.by_pos.get_mut(&pos) {
            keys.remove(key);

            if keys.is_empty() {
                self.by_pos.remove(&pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_query() {
        let mut index = DecorationIndex::default();

        assert_eq!(None, index.set("m", Some(100)));
        assert_eq!(100, index.position("m").unwrap());

        assert_eq!(Some(100), index.set("m", Some(42)));
        assert_eq!(42, index.position("m").unwrap());

        assert_eq!(Some(42), index.set("m", None));
        assert!(matches!(
            index.position("m"),
            Err(Error::DecorationNotFound(_))
        ));
    }

    #[test]
    fn range_query_is_ascending() {
        let mut index = DecorationIndex::default();
        index.set("c", Some(30));
        index.set("a", Some(10));
        index.set("b", Some(20));
        assert_eq!(3, index.len());

        let hits = index.in_range(10, 30);
        assert_eq!(
            vec![("a".to_string(), 10), ("b".to_string(), 20)],
            hits
        );
    }

    #[test]
    fn insert_drift() {
        let mut index = DecorationIndex::default();
        index.set("m", Some(100));

        index.translate_insert(50, 5, false);
        assert_eq!(105, index.position("m").unwrap());

        // at the insertion point itself
        index.set("p", Some(60));
        index.translate_insert(60, 4, false);
        assert_eq!(64, index.position("p").unwrap());

        index.set("q", Some(70));
        index.translate_insert(70, 4, true);
        assert_eq!(70, index.position("q").unwrap());
    }

    #[test]
    fn delete_clamps_interior() {
        let mut index = DecorationIndex::default();
        index.set("m", Some(105));

        let saved = index.translate_delete(90, 20);
        assert_eq!(90, index.position("m").unwrap());
        assert_eq!(vec![("m".to_string(), 105)], saved);

        // undo restores the exact address
        index.translate_insert(90, 20, true);
        index.restore(&saved);
        assert_eq!(105, index.position("m").unwrap());
    }

    #[test]
    fn delete_keeps_entries_at_start() {
        let mut index = DecorationIndex::default();
        index.set("edge", Some(90));

        let saved = index.translate_delete(90, 20);
        assert_eq!(90, index.position("edge").unwrap());
        assert!(saved.is_empty());
    }
}
