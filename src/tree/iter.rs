// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::store::BlobStore;
use crate::tree::SegmentTree;
use crate::Slice;

/// In-order walk over the byte spans of leaves intersecting a byte range.
///
/// Each `next` descends from the root to the leaf holding the current
/// position, so a full walk is O(k log n) for k produced spans. Reads of
/// spilled blobs page in through the store.
pub struct SpanIter<'a> {
    tree: &'a SegmentTree,
    store: &'a BlobStore,
    pos: u64,
    end: u64,
}

impl<'a> SpanIter<'a> {
    pub(crate) fn new(tree: &'a SegmentTree, store: &'a BlobStore, range: std::ops::Range<u64>) -> Self {
        let end = range.end.min(tree.byte_count());
        let pos = range.start.min(end);

        Self {
            tree,
            store,
            pos,
            end,
        }
    }
}

impl Iterator for SpanIter<'_> {
    type Item = crate::Result<Slice>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }

        // `pos < end <= byte_count`, so the leaf exists
        let (leaf_start, seg) = self.tree.leaf_at(self.pos)?;

        let in_leaf = self.pos - leaf_start;
        let take = (leaf_start + seg.len).min(self.end) - self.pos;

        let span = self.store.read(seg.blob, seg.offset + in_leaf, take);
        self.pos += take;

        Some(span)
    }
}
