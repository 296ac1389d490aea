// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::store::BlobId;
use rustc_hash::FxHashMap;

#[derive(Copy, Clone, Debug, Default)]
struct Links {
    prev: Option<BlobId>,
    next: Option<BlobId>,
}

/// Recency list over blob ids with O(1) touch, remove and pop.
///
/// `head` is the most recently used entry, `tail` the coldest. Links are
/// kept in a hash map keyed by blob id instead of heap nodes, so there is
/// no per-operation allocation once the map is warm.
#[derive(Debug, Default)]
pub struct LruList {
    links: FxHashMap<BlobId, Links>,
    head: Option<BlobId>,
    tail: Option<BlobId>,
}

impl LruList {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, id: BlobId) -> bool {
        self.links.contains_key(&id)
    }

    /// Marks `id` as most recently used, inserting it if absent.
    pub fn touch(&mut self, id: BlobId) {
        if self.links.contains_key(&id) {
            if self.head == Some(id) {
                return;
            }
            self.unlink(id);
        }
        self.push_front(id);
    }

    /// Removes `id` from the list, if present.
    pub fn remove(&mut self, id: BlobId) {
        if self.links.contains_key(&id) {
            self.unlink(id);
            self.links.remove(&id);
        }
    }

    /// Removes and returns the coldest entry.
    pub fn pop_coldest(&mut self) -> Option<BlobId> {
        let id = self.tail?;
        self.unlink(id);
        self.links.remove(&id);
        Some(id)
    }

    fn push_front(&mut self, id: BlobId) {
        let next = self.head;

        self.links.insert(id, Links { prev: None, next });

        if let Some(next) = next {
            if let Some(links) = self.links.get_mut(&next) {
                links.prev = Some(id);
            }
        }

        self.head = Some(id);

        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    fn unlink(&mut self, id: BlobId) {
        let Some(&Links { prev, next }) = self.links.get(&id) else {
            return;
        };

        match prev {
            Some(prev) => {
                if let Some(links) = self.links.get_mut(&prev) {
                    links.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next) => {
                if let Some(links) = self.links.get_mut(&next) {
                    links.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(links) = self.links.get_mut(&id) {
            *links = Links::default();
        }
    }
}
