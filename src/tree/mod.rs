// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod iter;

use crate::segment::{Segment, Weight};
use crate::store::BlobStore;
use crate::unicode;
use crate::Error;
use iter::SpanIter;

/// Node of the balanced segment tree.
///
/// All data lives in leaves; inner nodes cache the summed aggregates and
/// their height. The AVL discipline (sibling height difference <= 1) is
/// restored by `rebalance` after every `concat`, so `split` + `concat`
/// and everything built from them stay O(log n).
#[derive(Debug)]
pub(crate) enum Node {
    Leaf(Segment),
    Inner {
        left: Box<Node>,
        right: Box<Node>,
        height: u8,
        weight: Weight,
    },
}

impl Node {
    fn weight(&self) -> Weight {
        match self {
            Self::Leaf(seg) => seg.weight(),
            Self::Inner { weight, .. } => *weight,
        }
    }

    fn height(&self) -> u8 {
        match self {
            Self::Leaf(_) => 1,
            Self::Inner { height, .. } => *height,
        }
    }

    fn inner(left: Box<Self>, right: Box<Self>) -> Box<Self> {
        let weight = left.weight() + right.weight();
        let height = left.height().max(right.height()) + 1;

        Box::new(Self::Inner {
            left,
            right,
            height,
            weight,
        })
    }

    fn into_children(self: Box<Self>) -> (Box<Self>, Box<Self>) {
        match *self {
            Self::Inner { left, right, .. } => (left, right),
            Self::Leaf(_) => unreachable!("leaf has no children"),
        }
    }
}

/// Joins two subtrees whose heights may differ by up to 2, using a single
/// or double rotation. Aggregates are recomputed bottom-up, so rotations
/// preserve them by construction.
fn rebalance(left: Box<Node>, right: Box<Node>) -> Box<Node> {
    if right.height() > left.height() + 1 {
        let (rl, rr) = right.into_children();

        if rl.height() > rr.height() {
            let (rll, rlr) = rl.into_children();
            Node::inner(Node::inner(left, rll), Node::inner(rlr, rr))
        } else {
            Node::inner(Node::inner(left, rl), rr)
        }
    } else if left.height() > right.height() + 1 {
        let (ll, lr) = left.into_children();

        if lr.height() > ll.height() {
            let (lrl, lrr) = lr.into_children();
            Node::inner(Node::inner(ll, lrl), Node::inner(lrr, right))
        } else {
            Node::inner(ll, Node::inner(lr, right))
        }
    } else {
        Node::inner(left, right)
    }
}

/// Concatenates two subtrees of arbitrary heights.
fn concat(left: Box<Node>, right: Box<Node>) -> Box<Node> {
    if left.height() >= right.height() + 2 {
        let (ll, lr) = left.into_children();
        let merged = concat(lr, right);
        rebalance(ll, merged)
    } else if right.height() >= left.height() + 2 {
        let (rl, rr) = right.into_children();
        let merged = concat(left, rl);
        rebalance(merged, rr)
    } else {
        Node::inner(left, right)
    }
}

fn concat_opt(left: Option<Box<Node>>, right: Option<Box<Node>>) -> Option<Box<Node>> {
    match (left, right) {
        (Some(left), Some(right)) => Some(concat(left, right)),
        (node, None) | (None, node) => node,
    }
}

/// Splits at a byte offset. Splitting inside a leaf rescans the two halves,
/// everything else is pure pointer surgery.
#[allow(clippy::type_complexity)]
fn split(
    node: Box<Node>,
    at: u64,
    store: &BlobStore,
) -> crate::Result<(Option<Box<Node>>, Option<Box<Node>>)> {
    match *node {
        Node::Leaf(seg) => {
            if at == 0 {
                Ok((None, Some(Box::new(Node::Leaf(seg)))))
            } else if at >= seg.len {
                Ok((Some(Box::new(Node::Leaf(seg))), None))
            } else {
                let bytes = store.read(seg.blob, seg.offset, seg.len)?;

                #[allow(clippy::indexing_slicing)]
                let (left, right) = bytes.split_at(at as usize);

                let left = Segment::scanned(seg.blob, seg.offset, left);
                let right = Segment::scanned(seg.blob, seg.offset + at, right);

                Ok((
                    Some(Box::new(Node::Leaf(left))),
                    Some(Box::new(Node::Leaf(right))),
                ))
            }
        }
        Node::Inner { left, right, .. } => {
            let left_bytes = left.weight().bytes;

            if at < left_bytes {
                let (a, b) = split(left, at, store)?;
                Ok((a, concat_opt(b, Some(right))))
            } else {
                let (a, b) = split(right, at - left_bytes, store)?;
                Ok((concat_opt(Some(left), a), b))
            }
        }
    }
}

fn pop_back(node: Box<Node>) -> (Option<Box<Node>>, Segment) {
    match *node {
        Node::Leaf(seg) => (None, seg),
        Node::Inner { left, right, .. } => {
            let (rest, seg) = pop_back(right);
            match rest {
                Some(rest) => (Some(concat(left, rest)), seg),
                None => (Some(left), seg),
            }
        }
    }
}

fn pop_front(node: Box<Node>) -> (Option<Box<Node>>, Segment) {
    match *node {
        Node::Leaf(seg) => (None, seg),
        Node::Inner { left, right, .. } => {
            let (rest, seg) = pop_front(left);
            match rest {
                Some(rest) => (Some(concat(rest, right)), seg),
                None => (Some(right), seg),
            }
        }
    }
}

fn last_segment(node: &Node) -> &Segment {
    match node {
        Node::Leaf(seg) => seg,
        Node::Inner { right, .. } => last_segment(right),
    }
}

fn first_segment(node: &Node) -> &Segment {
    match node {
        Node::Leaf(seg) => seg,
        Node::Inner { left, .. } => first_segment(left),
    }
}

fn collect(node: &Node, out: &mut Vec<Segment>) {
    match node {
        Node::Leaf(seg) => out.push(seg.clone()),
        Node::Inner { left, right, .. } => {
            collect(left, out);
            collect(right, out);
        }
    }
}

/// The balanced order-statistic tree over segments.
///
/// Keyed by the aggregate triple (byte, code point, line); any of the three
/// coordinate spaces resolves to a canonical byte offset by a single
/// root-to-leaf descent plus a bounded in-leaf scan.
#[derive(Debug, Default)]
pub struct SegmentTree {
    root: Option<Box<Node>>,
}

impl SegmentTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn weight(&self) -> Weight {
        self.root.as_ref().map(|n| n.weight()).unwrap_or_default()
    }

    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.weight().bytes
    }

    #[must_use]
    pub fn rune_count(&self) -> u64 {
        self.weight().runes
    }

    /// Number of LF bytes; the user-facing line count is derived from this
    /// at the query boundary.
    #[must_use]
    pub fn lf_count(&self) -> u64 {
        self.weight().lines
    }

    /// All segments, in order. Used to capture inverse payloads and by tests.
    #[must_use]
    pub fn segments(&self) -> Vec<Segment> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            collect(root, &mut out);
        }
        out
    }

    /// Iterator of byte spans intersecting `range`, by in-order walk of the
    /// leaves.
    #[must_use]
    pub fn spans<'a>(&'a self, store: &'a BlobStore, range: std::ops::Range<u64>) -> SpanIter<'a> {
        SpanIter::new(self, store, range)
    }

    /// Reads the single byte at `offset`.
    pub fn read_byte(&self, store: &BlobStore, offset: u64) -> crate::Result<u8> {
        let (leaf_start, seg) = self
            .leaf_at(offset)
            .ok_or(Error::InvalidArgument("byte offset out of bounds"))?;

        let data = store.read(seg.blob, seg.offset + (offset - leaf_start), 1)?;

        #[allow(clippy::indexing_slicing)]
        let byte = data[0];

        Ok(byte)
    }

    /// Leaf containing `offset`, together with the leaf's start offset.
    pub(crate) fn leaf_at(&self, offset: u64) -> Option<(u64, &Segment)> {
        let mut node = self.root.as_deref()?;

        if offset >= node.weight().bytes {
            return None;
        }

        let mut start = 0;

        loop {
            match node {
                Node::Leaf(seg) => return Some((start, seg)),
                Node::Inner { left, right, .. } => {
                    let left_bytes = left.weight().bytes;

                    if offset - start < left_bytes {
                        node = left;
                    } else {
                        start += left_bytes;
                        node = right;
                    }
                }
            }
        }
    }

    /// Inserts segments at a byte offset, joining seam leaves when the join
    /// is provably additive.
    pub fn insert(
        &mut self,
        store: &BlobStore,
        at: u64,
        segments: Vec<Segment>,
    ) -> crate::Result<()> {
        let mut segments: Vec<Segment> = segments.into_iter().filter(|s| s.len > 0).collect();

        if segments.is_empty() {
            return Ok(());
        }

        let (mut left, mut right) = match self.root.take() {
            Some(root) => split(root, at, store)?,
            None => (None, None),
        };

        // seam join towards the left neighbor
        if let Some(node) = left.take() {
            #[allow(clippy::expect_used)]
            let head = segments.first().expect("just checked non-empty");

            if last_segment(&node).can_join(head) {
                let (rest, mut seg) = pop_back(node);
                seg.join(head);
                segments[0] = seg;
                left = rest;
            } else {
                left = Some(node);
            }
        }

        // seam join towards the right neighbor
        if let Some(node) = right.take() {
            #[allow(clippy::expect_used)]
            let tail = segments.last().expect("just checked non-empty");

            if tail.can_join(first_segment(&node)) {
                let (rest, seg) = pop_front(node);

                #[allow(clippy::expect_used)]
                let tail = segments.last_mut().expect("just checked non-empty");
                tail.join(&seg);
                right = rest;
            } else {
                right = Some(node);
            }
        }

        let mut mid: Option<Box<Node>> = None;

        for seg in segments {
            let leaf = Box::new(Node::Leaf(seg));
            mid = Some(match mid {
                Some(node) => concat(node, leaf),
                None => leaf,
            });
        }

        self.root = concat_opt(concat_opt(left, mid), right);

        Ok(())
    }

    /// Deletes a byte range, returning the removed segments in order
    /// (the inverse payload). Leaves newly made adjacent are rejoined when
    /// the join is additive.
    pub fn delete_range(
        &mut self,
        store: &BlobStore,
        at: u64,
        len: u64,
    ) -> crate::Result<Vec<Segment>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let Some(root) = self.root.take() else {
            return Ok(Vec::new());
        };

        let (left, rest) = split(root, at, store)?;

        let (mid, mut right) = match rest {
            Some(rest) => split(rest, len, store)?,
            None => (None, None),
        };

        let mut removed = Vec::new();

        if let Some(mid) = &mid {
            collect(mid, &mut removed);
        }

        // rejoin the seam, e.g. when undoing an insert into the middle of
        // a leaf
        let mut left = left;

        let seam_joins = match (&left, &right) {
            (Some(l), Some(r)) => last_segment(l).can_join(first_segment(r)),
            _ => false,
        };

        if seam_joins {
            #[allow(clippy::expect_used)]
            let (l_rest, mut seg) = pop_back(left.take().expect("seam exists"));

            #[allow(clippy::expect_used)]
            let (r_rest, first) = pop_front(right.take().expect("seam exists"));

            seg.join(&first);

            left = concat_opt(l_rest, Some(Box::new(Node::Leaf(seg))));
            right = r_rest;
        }

        self.root = concat_opt(left, right);

        Ok(removed)
    }

    /// Code point index of the byte at `offset` (clamped to the end).
    pub fn byte_to_rune(&self, store: &BlobStore, offset: u64) -> crate::Result<u64> {
        let total = self.weight();

        if offset >= total.bytes {
            return Ok(total.runes);
        }

        #[allow(clippy::expect_used)]
        let (leaf_start, seg) = self.leaf_at(offset).expect("offset is in bounds");

        let runes_before_leaf = self.prefix_weight(leaf_start).runes;
        let bytes = store.read(seg.blob, seg.offset, seg.len)?;

        Ok(runes_before_leaf + unicode::runes_before(&bytes, (offset - leaf_start) as usize))
    }

    /// Byte offset of the `rune`-th code point (clamped to the end).
    pub fn rune_to_byte(&self, store: &BlobStore, rune: u64) -> crate::Result<u64> {
        let total = self.weight();

        if rune >= total.runes {
            return Ok(total.bytes);
        }

        let mut node = match self.root.as_deref() {
            Some(node) => node,
            None => return Ok(0),
        };

        let mut rune = rune;
        let mut start = 0;

        loop {
            match node {
                Node::Leaf(seg) => {
                    let bytes = store.read(seg.blob, seg.offset, seg.len)?;

                    let offset = unicode::rune_start(&bytes, rune)
                        .ok_or(Error::InvalidArgument("rune index out of leaf"))?;

                    return Ok(start + offset as u64);
                }
                Node::Inner { left, right, .. } => {
                    let left_weight = left.weight();

                    if rune < left_weight.runes {
                        node = left;
                    } else {
                        rune -= left_weight.runes;
                        start += left_weight.bytes;
                        node = right;
                    }
                }
            }
        }
    }

    /// Number of LF bytes strictly before `offset`.
    pub fn lfs_before(&self, store: &BlobStore, offset: u64) -> crate::Result<u64> {
        let total = self.weight();

        if offset >= total.bytes {
            return Ok(total.lines);
        }

        #[allow(clippy::expect_used)]
        let (leaf_start, seg) = self.leaf_at(offset).expect("offset is in bounds");

        let lines_before_leaf = self.prefix_weight(leaf_start).lines;
        let in_leaf = (offset - leaf_start) as usize;
        let bytes = store.read(seg.blob, seg.offset, in_leaf as u64)?;

        Ok(lines_before_leaf + bytes.iter().filter(|&&b| b == b'\n').count() as u64)
    }

    /// Byte offset just past the zero-based `nth` LF byte, i.e. the start
    /// of line `nth + 1`.
    pub fn offset_after_lf(&self, store: &BlobStore, nth: u64) -> crate::Result<u64> {
        let total = self.weight();

        if nth >= total.lines {
            return Ok(total.bytes);
        }

        let mut node = match self.root.as_deref() {
            Some(node) => node,
            None => return Ok(0),
        };

        let mut nth = nth;
        let mut start = 0;

        loop {
            match node {
                Node::Leaf(seg) => {
                    let bytes = store.read(seg.blob, seg.offset, seg.len)?;

                    let mut seen = 0;
                    for (idx, &byte) in bytes.iter().enumerate() {
                        if byte == b'\n' {
                            if seen == nth {
                                return Ok(start + idx as u64 + 1);
                            }
                            seen += 1;
                        }
                    }

                    return Err(Error::InvalidArgument("line index out of leaf"));
                }
                Node::Inner { left, right, .. } => {
                    let left_weight = left.weight();

                    if nth < left_weight.lines {
                        node = left;
                    } else {
                        nth -= left_weight.lines;
                        start += left_weight.bytes;
                        node = right;
                    }
                }
            }
        }
    }

    /// Aggregates of everything strictly before `offset`, where `offset`
    /// must be a leaf boundary.
    fn prefix_weight(&self, offset: u64) -> Weight {
        let mut acc = Weight::default();

        let Some(mut node) = self.root.as_deref() else {
            return acc;
        };

        let mut offset = offset;

        loop {
            match node {
                Node::Leaf(_) => {
                    debug_assert_eq!(0, offset, "offset is a leaf boundary");
                    return acc;
                }
                Node::Inner { left, right, .. } => {
                    let left_weight = left.weight();

                    if offset < left_weight.bytes {
                        node = left;
                    } else {
                        acc += left_weight;
                        offset -= left_weight.bytes;
                        node = right;
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_balanced(&self) {
        fn check(node: &Node) -> u8 {
            match node {
                Node::Leaf(_) => 1,
                Node::Inner {
                    left,
                    right,
                    height,
                    weight,
                } => {
                    let hl = check(left);
                    let hr = check(right);

                    assert!(hl.abs_diff(hr) <= 1, "unbalanced node");
                    assert_eq!(*height, hl.max(hr) + 1, "stale height");
                    assert_eq!(*weight, left.weight() + right.weight(), "stale weight");

                    *height
                }
            }
        }

        if let Some(root) = &self.root {
            check(root);
        }
    }
}
