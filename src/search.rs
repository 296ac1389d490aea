// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::store::BlobStore;
use crate::tree::SegmentTree;
use crate::Error;

/// Search direction
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SearchDirection {
    /// First match by byte offset
    #[default]
    Forward,

    /// Last match by byte offset
    Backward,
}

/// Options for [`crate::Garland::find`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FindOptions {
    /// Byte-wise comparison when set; otherwise ASCII letters are folded
    pub case_sensitive: bool,

    /// Scan direction
    pub direction: SearchDirection,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            direction: SearchDirection::Forward,
        }
    }
}

/// A match, as a byte range of the logical sequence
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Match {
    /// First byte of the match
    pub start: u64,

    /// One past the last byte of the match
    pub end: u64,
}

/// Chunk size for the backward scan
const BACKWARD_CHUNK: u64 = 64 * 1_024;

fn fold(byte: u8, case_sensitive: bool) -> u8 {
    if case_sensitive {
        byte
    } else {
        byte.to_ascii_lowercase()
    }
}

/// Matching is byte-wise on the UTF-8 form; a sliding carry of
/// `pattern.len() - 1` bytes covers matches straddling span boundaries.
pub(crate) fn find_forward(
    tree: &SegmentTree,
    store: &BlobStore,
    pattern: &[u8],
    case_sensitive: bool,
    all: bool,
) -> crate::Result<Vec<Match>> {
    if pattern.is_empty() {
        return Err(Error::InvalidArgument("empty search pattern"));
    }

    let pattern: Vec<u8> = pattern.iter().map(|&b| fold(b, case_sensitive)).collect();
    let plen = pattern.len();

    let mut out = Vec::new();
    let mut carry: Vec<u8> = Vec::new();
    let mut base = 0u64;
    let mut min_start = 0u64;

    for span in tree.spans(store, 0..tree.byte_count()) {
        let span = span?;

        let mut hay = std::mem::take(&mut carry);
        hay.extend(span.iter().map(|&b| fold(b, case_sensitive)));

        let mut idx = 0;
        while idx + plen <= hay.len() {
            #[allow(clippy::indexing_slicing)]
            let window = &hay[idx..idx + plen];

            if window == pattern.as_slice() {
                let start = base + idx as u64;

                // matches found again inside the carried tail are skipped;
                // non-overlap is enforced the same way
                if start >= min_start {
                    out.push(Match {
                        start,
                        end: start + plen as u64,
                    });

                    if !all {
                        return Ok(out);
                    }

                    min_start = start + plen as u64;
                }
            }

            idx += 1;
        }

        let keep = (plen - 1).min(hay.len());
        base += (hay.len() - keep) as u64;

        #[allow(clippy::indexing_slicing)]
        carry.extend_from_slice(&hay[hay.len() - keep..]);
    }

    Ok(out)
}

/// Scans fixed-size windows from the end; the first hit is the match with
/// the largest byte offset.
pub(crate) fn find_backward(
    tree: &SegmentTree,
    store: &BlobStore,
    pattern: &[u8],
    case_sensitive: bool,
) -> crate::Result<Option<Match>> {
    if pattern.is_empty() {
        return Err(Error::InvalidArgument("empty search pattern"));
    }

    let pattern: Vec<u8> = pattern.iter().map(|&b| fold(b, case_sensitive)).collect();
    let plen = pattern.len() as u64;
    let total = tree.byte_count();

    if total < plen {
        return Ok(None);
    }

    let mut end = total;

    loop {
        let start = end.saturating_sub(BACKWARD_CHUNK + plen - 1);

        let mut buf = Vec::with_capacity((end - start) as usize);
        for span in tree.spans(store, start..end) {
            buf.extend(span?.iter().map(|&b| fold(b, case_sensitive)));
        }

        if buf.len() as u64 >= plen {
            let last = buf.len() - pattern.len();

            for idx in (0..=last).rev() {
                #[allow(clippy::indexing_slicing)]
                let window = &buf[idx..idx + pattern.len()];

                if window == pattern.as_slice() {
                    let hit = start + idx as u64;

                    return Ok(Some(Match {
                        start: hit,
                        end: hit + plen,
                    }));
                }
            }
        }

        if start == 0 {
            return Ok(None);
        }

        // overlap the seam so straddling matches are seen
        end = start + plen - 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::Slice;
    use test_log::test;

    fn tree_of(store: &BlobStore, parts: &[&str]) -> SegmentTree {
        let mut tree = SegmentTree::new();

        for part in parts {
            let blob = store.add_resident(Slice::from(*part));
            let seg = Segment::scanned(blob, 0, part.as_bytes());
            let at = tree.byte_count();
            tree.insert(store, at, vec![seg]).unwrap();
        }

        tree
    }

    #[test]
    fn forward_first_match() -> crate::Result<()> {
        let store = BlobStore::new(None);
        let tree = tree_of(&store, &["abcabc", "abc"]);

        let hits = find_forward(&tree, &store, b"abc", true, false)?;
        assert_eq!(vec![Match { start: 0, end: 3 }], hits);

        Ok(())
    }

    #[test]
    fn match_straddles_span_boundary() -> crate::Result<()> {
        let store = BlobStore::new(None);
        let tree = tree_of(&store, &["hello wo", "rld"]);

        let hits = find_forward(&tree, &store, b"world", true, false)?;
        assert_eq!(vec![Match { start: 6, end: 11 }], hits);

        let hit = find_backward(&tree, &store, b"world", true)?;
        assert_eq!(Some(Match { start: 6, end: 11 }), hit);

        Ok(())
    }

    #[test]
    fn find_all_is_ascending_and_non_overlapping() -> crate::Result<()> {
        let store = BlobStore::new(None);
        let tree = tree_of(&store, &["aaaa", "aa"]);

        let hits = find_forward(&tree, &store, b"aa", true, true)?;
        assert_eq!(
            vec![
                Match { start: 0, end: 2 },
                Match { start: 2, end: 4 },
                Match { start: 4, end: 6 },
            ],
            hits
        );

        Ok(())
    }

    #[test]
    fn backward_finds_last() -> crate::Result<()> {
        let store = BlobStore::new(None);
        let tree = tree_of(&store, &["abc abc abc"]);

        let hit = find_backward(&tree, &store, b"abc", true)?;
        assert_eq!(Some(Match { start: 8, end: 11 }), hit);

        Ok(())
    }

    #[test]
    fn ascii_case_folding() -> crate::Result<()> {
        let store = BlobStore::new(None);
        let tree = tree_of(&store, &["Hello World"]);

        assert!(find_forward(&tree, &store, b"world", true, false)?.is_empty());

        let hits = find_forward(&tree, &store, b"WORLD", false, false)?;
        assert_eq!(vec![Match { start: 6, end: 11 }], hits);

        Ok(())
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let store = BlobStore::new(None);
        let tree = tree_of(&store, &["x"]);

        assert!(matches!(
            find_forward(&tree, &store, b"", true, false),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            find_backward(&tree, &store, b"", true),
            Err(Error::InvalidArgument(_))
        ));
    }
}
