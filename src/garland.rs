// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::cursor::{CursorId, CursorMap, CursorUnit};
use crate::decoration::DecorationIndex;
use crate::history::{
    EditInverse, ForkId, ForkInfo, RevisionGraph, RevisionId, RevisionInfo, SeekPlan,
};
use crate::memory::MemoryManager;
use crate::search::{self, FindOptions, Match, SearchDirection};
use crate::segment::{Segment, MAX_LEAF_BYTES};
use crate::store::BlobStore;
use crate::transaction::TransactionController;
use crate::tree::SegmentTree;
use crate::unicode::{self, LeafScan};
use crate::{AbsoluteAddress, AddressMode, Commit, Error, Progress, Slice};
use std::sync::atomic::{
    AtomicBool,
    Ordering::{Acquire, Release},
};
use std::sync::{Arc, Mutex, RwLock};

pub(crate) struct LoadState {
    pub complete: AtomicBool,
    pub failed: Mutex<Option<Error>>,
    pub handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl LoadState {
    fn new() -> Self {
        Self {
            complete: AtomicBool::new(false),
            failed: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }
}

/// Everything behind the garland's single write lock.
pub(crate) struct GarlandState {
    pub tree: SegmentTree,
    pub graph: RevisionGraph,
    pub cursors: CursorMap,
    pub decorations: DecorationIndex,
    pub txn: TransactionController,

    /// Append point of the streaming loader; drifts with edits like a
    /// cursor so loaded content stays contiguous
    pub load_tail: u64,
}

pub(crate) struct GarlandInner {
    pub(crate) store: Arc<BlobStore>,
    pub(crate) memory: Arc<MemoryManager>,
    pub(crate) state: RwLock<GarlandState>,
    pub(crate) load: LoadState,
    pub(crate) closed: AtomicBool,
}

/// One open document: a live segment tree, its revision graph, cursors and
/// decorations, plus a handle to the library's shared byte store.
///
/// Cheap to clone; all clones share state. Mutations serialize on a single
/// write lock, read-only queries take it shared.
#[derive(Clone)]
pub struct Garland(pub(crate) Arc<GarlandInner>);

/// Splits bulk data into scanned segments over one freshly ingested blob.
pub(crate) fn ingest(
    store: &BlobStore,
    memory: &MemoryManager,
    data: Slice,
    override_runes: Option<u64>,
) -> crate::Result<Vec<Segment>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    memory.reserve(data.len() as u64)?;

    if data.len() as u64 <= MAX_LEAF_BYTES {
        let scan = match override_runes {
            // the caller pre-computed the code point count; LF count and
            // the trailing partial are cheap to derive
            Some(runes) => LeafScan {
                runes,
                lines: data.iter().filter(|&&b| b == b'\n').count() as u64,
                trailing_partial: unicode::trailing_partial_len(&data),
            },
            None => unicode::scan(&data),
        };

        let len = data.len() as u64;
        let blob = store.add_resident(data);

        return Ok(vec![Segment::from_scan(blob, 0, len, scan)]);
    }

    let mut segments = Vec::new();
    let mut offset = 0u64;

    while offset < data.len() as u64 {
        let len = MAX_LEAF_BYTES.min(data.len() as u64 - offset);

        #[allow(clippy::indexing_slicing)]
        let chunk = &data[offset as usize..(offset + len) as usize];

        segments.push(Segment::scanned(0, offset, chunk));
        offset += len;
    }

    let blob = store.add_resident(data);

    for segment in &mut segments {
        segment.blob = blob;
    }

    Ok(segments)
}

impl GarlandState {
    fn new() -> Self {
        Self {
            tree: SegmentTree::new(),
            graph: RevisionGraph::new(),
            cursors: CursorMap::new(),
            decorations: DecorationIndex::default(),
            txn: TransactionController::default(),
            load_tail: 0,
        }
    }

    /// Converts any address mode to a canonical byte offset, clamping
    /// overflowing positions to the end.
    fn resolve(&self, store: &BlobStore, address: AbsoluteAddress) -> crate::Result<u64> {
        let total = self.tree.byte_count();

        match address {
            AbsoluteAddress::Byte(offset) => Ok(offset.min(total)),
            AbsoluteAddress::Rune(rune) => self.tree.rune_to_byte(store, rune),
            AbsoluteAddress::LineRune { line, column } => {
                let lf_count = self.tree.lf_count();

                if line > lf_count {
                    return Ok(total);
                }

                let start = if line == 0 {
                    0
                } else {
                    self.tree.offset_after_lf(store, line - 1)?
                };

                let end = if line < lf_count {
                    self.tree.offset_after_lf(store, line)? - 1
                } else {
                    total
                };

                let start_rune = self.tree.byte_to_rune(store, start)?;
                let end_rune = self.tree.byte_to_rune(store, end)?;
                let column = column.min(end_rune - start_rune);

                self.tree.rune_to_byte(store, start_rune + column)
            }
        }
    }

    fn address_of(
        &self,
        store: &BlobStore,
        offset: u64,
        mode: AddressMode,
    ) -> crate::Result<AbsoluteAddress> {
        match mode {
            AddressMode::Byte => Ok(AbsoluteAddress::Byte(offset)),
            AddressMode::Rune => Ok(AbsoluteAddress::Rune(self.tree.byte_to_rune(store, offset)?)),
            AddressMode::LineRune => {
                let line = self.tree.lfs_before(store, offset)?;

                let start = if line == 0 {
                    0
                } else {
                    self.tree.offset_after_lf(store, line - 1)?
                };

                let column =
                    self.tree.byte_to_rune(store, offset)? - self.tree.byte_to_rune(store, start)?;

                Ok(AbsoluteAddress::LineRune { line, column })
            }
        }
    }

    /// Inserts segments, shifting cursors, decorations and the load tail.
    /// `restore_*` re-establish state captured by the deletion this insert
    /// reverses.
    fn apply_insert_segments(
        &mut self,
        store: &BlobStore,
        at: u64,
        segments: Vec<Segment>,
        before: bool,
        restore_cursors: &[(CursorId, u64)],
        restore_decorations: &[(String, u64)],
    ) -> crate::Result<EditInverse> {
        let len: u64 = segments.iter().map(|s| s.len).sum();

        self.tree.insert(store, at, segments)?;

        if len > 0 {
            self.cursors.translate_insert(at, len, before);
            self.decorations.translate_insert(at, len, before);

            if self.load_tail > at || (self.load_tail == at && !before) {
                self.load_tail += len;
            }
        }

        self.cursors.restore(restore_cursors);
        self.decorations.restore(restore_decorations);

        Ok(EditInverse::Insert { at, len })
    }

    /// Deletes a byte range, capturing everything an undo needs.
    fn apply_delete(&mut self, store: &BlobStore, at: u64, len: u64) -> crate::Result<EditInverse> {
        let old = self.tree.delete_range(store, at, len)?;

        let (cursors, decorations) = if len > 0 {
            let cursors = self.cursors.translate_delete(at, len);
            let decorations = self.decorations.translate_delete(at, len);

            if self.load_tail > at + len {
                self.load_tail -= len;
            } else if self.load_tail > at {
                self.load_tail = at;
            }

            (cursors, decorations)
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(EditInverse::Delete {
            at,
            old,
            cursors,
            decorations,
        })
    }

    /// Replays one inverse operation against the live state, returning its
    /// own inverse (undo and redo toggle through here).
    fn replay(&mut self, store: &BlobStore, inverse: EditInverse) -> crate::Result<EditInverse> {
        match inverse {
            EditInverse::Insert { at, len } => self.apply_delete(store, at, len),

            EditInverse::Delete {
                at,
                old,
                cursors,
                decorations,
            } => self.apply_insert_segments(store, at, old, true, &cursors, &decorations),

            EditInverse::Overwrite {
                at,
                old,
                new_len,
                cursors,
                decorations,
            } => {
                let old_len: u64 = old.iter().map(|s| s.len).sum();

                let EditInverse::Delete {
                    old: removed,
                    cursors: saved_cursors,
                    decorations: saved_decorations,
                    ..
                } = self.apply_delete(store, at, new_len)?
                else {
                    unreachable!("delete produces a delete inverse");
                };

                self.apply_insert_segments(store, at, old, true, &cursors, &decorations)?;

                Ok(EditInverse::Overwrite {
                    at,
                    old: removed,
                    new_len: old_len,
                    cursors: saved_cursors,
                    decorations: saved_decorations,
                })
            }

            EditInverse::Decoration { key, prior } => {
                let current = self.decorations.set(&key, prior);
                Ok(EditInverse::Decoration { key, prior: current })
            }
        }
    }

    /// Replays a revision's payload in reverse, storing the collected
    /// inverses back (so the revision now holds the opposite direction).
    fn replay_revision(
        &mut self,
        store: &BlobStore,
        fork: ForkId,
        revision: RevisionId,
    ) -> crate::Result<()> {
        let payload = std::mem::take(&mut self.graph.revision_mut(fork, revision)?.payload);

        let mut inverse = Vec::with_capacity(payload.len());

        for op in payload.into_iter().rev() {
            inverse.push(self.replay(store, op)?);
        }

        self.graph.revision_mut(fork, revision)?.payload = inverse;

        Ok(())
    }

    fn execute(&mut self, store: &BlobStore, plan: SeekPlan) -> crate::Result<()> {
        for (fork, revision) in plan.revert {
            log::trace!("garland: reverting revision ({fork}, {revision})");
            self.replay_revision(store, fork, revision)?;
        }

        for (fork, revision) in plan.apply {
            log::trace!("garland: applying revision ({fork}, {revision})");
            self.replay_revision(store, fork, revision)?;
        }

        Ok(())
    }
}

impl Garland {
    pub(crate) fn new(store: Arc<BlobStore>, memory: Arc<MemoryManager>) -> Self {
        Self(Arc::new(GarlandInner {
            store,
            memory,
            state: RwLock::new(GarlandState::new()),
            load: LoadState::new(),
            closed: AtomicBool::new(false),
        }))
    }

    /// Surfaces closedness and parked background errors before any
    /// user-facing operation proceeds.
    fn surface(&self) -> crate::Result<()> {
        if self.0.closed.load(Acquire) {
            return Err(Error::Closed);
        }

        #[allow(clippy::expect_used)]
        if let Some(e) = self.0.load.failed.lock().expect("lock is poisoned").take() {
            return Err(e);
        }

        if let Some(e) = self.0.memory.take_background_error() {
            return Err(e);
        }

        Ok(())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, GarlandState> {
        #[allow(clippy::expect_used)]
        self.0.state.read().expect("lock is poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, GarlandState> {
        log::trace!("garland: acquiring write lock");

        #[allow(clippy::expect_used)]
        self.0.state.write().expect("lock is poisoned")
    }

    /// Runs `f` inside a transaction boundary and commits.
    ///
    /// Without an explicit transaction in progress, the edit gets an
    /// implicit depth-1 wrapper and seals its own revision. On any error
    /// the whole pending transaction is rolled back.
    fn edit_op(&self, f: impl FnOnce(&mut GarlandState) -> crate::Result<()>) -> crate::Result<Commit> {
        self.surface()?;

        let store = self.0.store.clone();
        let mut state = self.write_state();

        let implicit = !state.txn.in_progress();

        if implicit {
            state.txn.begin(None);
        }

        if let Err(e) = f(&mut state) {
            self.rollback_pending(&mut state, &store);
            return Err(e);
        }

        if implicit {
            #[allow(clippy::expect_used)]
            let (name, payload, summary) = state
                .txn
                .commit()?
                .expect("implicit transaction has depth 1");

            let commit = state.graph.record(name, payload, summary);
            state.cursors.bump_generation();

            Ok(commit)
        } else {
            Ok(state.graph.head())
        }
    }

    fn rollback_pending(&self, state: &mut GarlandState, store: &BlobStore) {
        let Ok(pending) = state.txn.take_rollback() else {
            return;
        };

        for inverse in pending.into_iter().rev() {
            if let Err(e) = state.replay(store, inverse) {
                log::warn!("garland: rollback replay failed: {e}");
                return;
            }
        }
    }

    // ---------- counts ----------

    /// Total byte count. `complete` is false while the loader still runs.
    pub fn byte_count(&self) -> crate::Result<Progress> {
        self.surface()?;

        let value = self.read_state().tree.byte_count();

        Ok(Progress {
            value,
            complete: self.0.load.complete.load(Acquire),
        })
    }

    /// Total code point count.
    pub fn rune_count(&self) -> crate::Result<Progress> {
        self.surface()?;

        let value = self.read_state().tree.rune_count();

        Ok(Progress {
            value,
            complete: self.0.load.complete.load(Acquire),
        })
    }

    /// Total line count: the number of LF bytes, plus one if the sequence
    /// is non-empty and does not end in LF.
    pub fn line_count(&self) -> crate::Result<Progress> {
        self.surface()?;

        let state = self.read_state();
        let bytes = state.tree.byte_count();

        let mut value = state.tree.lf_count();

        if bytes > 0 && state.tree.read_byte(&self.0.store, bytes - 1)? != b'\n' {
            value += 1;
        }

        Ok(Progress {
            value,
            complete: self.0.load.complete.load(Acquire),
        })
    }

    /// Reads an arbitrary byte range of the logical sequence.
    pub fn read_range(&self, lo: u64, hi: u64) -> crate::Result<Slice> {
        self.surface()?;

        let state = self.read_state();

        let mut out = Vec::new();
        for span in state.tree.spans(&self.0.store, lo..hi) {
            out.extend_from_slice(&span?);
        }

        Ok(Slice::from(out))
    }

    // ---------- cursors ----------

    /// Spawns a cursor at offset 0. Cursor 0 always exists.
    pub fn create_cursor(&self, unit: CursorUnit) -> crate::Result<CursorId> {
        self.surface()?;
        Ok(self.write_state().cursors.create(unit))
    }

    /// Removes a cursor; ids are never reused.
    pub fn remove_cursor(&self, cursor: CursorId) -> crate::Result<()> {
        self.surface()?;
        self.write_state().cursors.remove(cursor)
    }

    /// Canonical byte offset of a cursor.
    pub fn cursor_position(&self, cursor: CursorId) -> crate::Result<u64> {
        self.surface()?;
        Ok(self.read_state().cursors.get(cursor)?.offset)
    }

    /// Cursor position expressed in the requested coordinate space.
    pub fn cursor_address(
        &self,
        cursor: CursorId,
        mode: AddressMode,
    ) -> crate::Result<AbsoluteAddress> {
        self.surface()?;

        let state = self.read_state();
        let offset = state.cursors.get(cursor)?.offset;

        state.address_of(&self.0.store, offset, mode)
    }

    /// Seeks to an absolute address (any mode), clamping on overflow.
    /// Returns the canonical byte offset.
    pub fn seek(&self, cursor: CursorId, address: AbsoluteAddress) -> crate::Result<u64> {
        self.surface()?;

        let mut state = self.write_state();

        let offset = state.resolve(&self.0.store, address)?;
        state.cursors.set_offset(cursor, offset)?;

        Ok(offset)
    }

    /// Moves by a delta in the cursor's preferred unit.
    pub fn seek_relative(&self, cursor: CursorId, delta: i64) -> crate::Result<u64> {
        self.surface()?;

        let unit = self.read_state().cursors.get(cursor)?.unit;

        match unit {
            CursorUnit::Bytes => self.seek_relative_bytes(cursor, delta),
            CursorUnit::Runes => self.seek_relative_runes(cursor, delta),
        }
    }

    /// Generation of the revision the cursor was last translated against.
    pub fn cursor_generation(&self, cursor: CursorId) -> crate::Result<u64> {
        self.surface()?;
        Ok(self.read_state().cursors.get(cursor)?.generation)
    }

    /// Moves by a byte delta, clamping at 0 and the end.
    pub fn seek_relative_bytes(&self, cursor: CursorId, delta: i64) -> crate::Result<u64> {
        self.surface()?;

        let mut state = self.write_state();

        let total = state.tree.byte_count();
        let current = state.cursors.get(cursor)?.offset;

        let offset = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta.unsigned_abs()).min(total)
        };

        state.cursors.set_offset(cursor, offset)?;

        Ok(offset)
    }

    /// Moves by a code point delta, clamping at 0 and the end.
    pub fn seek_relative_runes(&self, cursor: CursorId, delta: i64) -> crate::Result<u64> {
        self.surface()?;

        let mut state = self.write_state();
        let store = &self.0.store;

        let current = state.cursors.get(cursor)?.offset;
        let rune = state.tree.byte_to_rune(store, current)?;

        let target = if delta < 0 {
            rune.saturating_sub(delta.unsigned_abs())
        } else {
            rune.saturating_add(delta.unsigned_abs())
        };

        let offset = state.tree.rune_to_byte(store, target)?;
        state.cursors.set_offset(cursor, offset)?;

        Ok(offset)
    }

    /// Reads up to `n` bytes at the cursor and advances it past them.
    pub fn read_bytes(&self, cursor: CursorId, n: u64) -> crate::Result<Slice> {
        self.surface()?;

        let mut state = self.write_state();

        let current = state.cursors.get(cursor)?.offset;
        let end = current.saturating_add(n).min(state.tree.byte_count());

        let mut out = Vec::with_capacity((end - current) as usize);
        for span in state.tree.spans(&self.0.store, current..end) {
            out.extend_from_slice(&span?);
        }

        state.cursors.set_offset(cursor, end)?;

        Ok(Slice::from(out))
    }

    /// Reads up to `n_runes` code points, substituting invalid sequences
    /// with U+FFFD. Clamps to whole code points at the end of data and
    /// leaves the cursor just past the last complete one.
    pub fn read_string(&self, cursor: CursorId, n_runes: u64) -> crate::Result<String> {
        self.surface()?;

        let mut state = self.write_state();

        let current = state.cursors.get(cursor)?.offset;

        // 4 bytes per scalar bound the look-ahead
        let end = current.saturating_add(n_runes.saturating_mul(4)).min(state.tree.byte_count());

        let mut buf = Vec::with_capacity((end - current) as usize);
        for span in state.tree.spans(&self.0.store, current..end) {
            buf.extend_from_slice(&span?);
        }

        let mut out = String::new();
        let (consumed, _) = unicode::decode_prefix(&buf, n_runes, &mut out);

        state.cursors.set_offset(cursor, current + consumed as u64)?;

        Ok(out)
    }

    /// Reads up to and including the terminating LF (or the end of data)
    /// and advances the cursor past what was read.
    pub fn read_line(&self, cursor: CursorId) -> crate::Result<String> {
        self.surface()?;

        let mut state = self.write_state();
        let store = &self.0.store;

        let current = state.cursors.get(cursor)?.offset;
        let lf_index = state.tree.lfs_before(store, current)?;

        let end = if lf_index < state.tree.lf_count() {
            // up to and including the terminating LF
            state.tree.offset_after_lf(store, lf_index)?
        } else {
            state.tree.byte_count()
        };

        let mut buf = Vec::with_capacity((end - current) as usize);
        for span in state.tree.spans(store, current..end) {
            buf.extend_from_slice(&span?);
        }

        state.cursors.set_offset(cursor, end)?;

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // ---------- edits ----------

    /// Inserts bytes at the cursor.
    ///
    /// `override_runes` supplies a caller-computed code point count for the
    /// data, skipping the scan. With `insert_before` the cursor (and any
    /// decoration parked at the same offset) stays in front of the new
    /// content instead of ending up behind it.
    pub fn insert_bytes(
        &self,
        cursor: CursorId,
        data: &[u8],
        override_runes: Option<u64>,
        insert_before: bool,
    ) -> crate::Result<Commit> {
        let store = self.0.store.clone();
        let memory = self.0.memory.clone();

        self.edit_op(|state| {
            let at = state.cursors.get(cursor)?.offset;
            let segments = ingest(&store, &memory, Slice::from(data), override_runes)?;
            let len: u64 = segments.iter().map(|s| s.len).sum();

            let inverse =
                state.apply_insert_segments(&store, at, segments, insert_before, &[], &[])?;
            state.txn.push(inverse, len, 0);

            Ok(())
        })
    }

    /// Inserts a string at the cursor.
    pub fn insert_str(
        &self,
        cursor: CursorId,
        data: &str,
        insert_before: bool,
    ) -> crate::Result<Commit> {
        self.insert_bytes(cursor, data.as_bytes(), None, insert_before)
    }

    /// Deletes `n` bytes forward from the cursor, or backward ending at it.
    pub fn delete_bytes(&self, cursor: CursorId, n: u64, backward: bool) -> crate::Result<Commit> {
        let store = self.0.store.clone();

        self.edit_op(|state| {
            let current = state.cursors.get(cursor)?.offset;
            let total = state.tree.byte_count();

            let (at, len) = if backward {
                let len = n.min(current);
                (current - len, len)
            } else {
                (current, n.min(total - current))
            };

            let inverse = state.apply_delete(&store, at, len)?;
            state.txn.push(inverse, 0, len);

            Ok(())
        })
    }

    /// Deletes `n` code points forward or backward from the cursor.
    pub fn delete_runes(&self, cursor: CursorId, n: u64, backward: bool) -> crate::Result<Commit> {
        let store = self.0.store.clone();

        self.edit_op(|state| {
            let current = state.cursors.get(cursor)?.offset;
            let rune = state.tree.byte_to_rune(&store, current)?;

            let (at, len) = if backward {
                let start = state.tree.rune_to_byte(&store, rune.saturating_sub(n))?;
                (start, current - start)
            } else {
                let end = state.tree.rune_to_byte(&store, rune.saturating_add(n))?;
                (current, end.max(current) - current)
            };

            let inverse = state.apply_delete(&store, at, len)?;
            state.txn.push(inverse, 0, len);

            Ok(())
        })
    }

    /// Backspace by bytes.
    pub fn back_delete_bytes(&self, cursor: CursorId, n: u64) -> crate::Result<Commit> {
        self.delete_bytes(cursor, n, true)
    }

    /// Backspace by code points.
    pub fn back_delete_runes(&self, cursor: CursorId, n: u64) -> crate::Result<Commit> {
        self.delete_runes(cursor, n, true)
    }

    /// Replaces `n` bytes at the cursor with `data` in one revision.
    pub fn overwrite_bytes(&self, cursor: CursorId, n: u64, data: &[u8]) -> crate::Result<Commit> {
        let store = self.0.store.clone();
        let memory = self.0.memory.clone();

        self.edit_op(|state| {
            let at = state.cursors.get(cursor)?.offset;
            let total = state.tree.byte_count();
            let n = n.min(total - at);

            let EditInverse::Delete {
                old,
                cursors,
                decorations,
                ..
            } = state.apply_delete(&store, at, n)?
            else {
                unreachable!("delete produces a delete inverse");
            };

            let segments = ingest(&store, &memory, Slice::from(data), None)?;
            let new_len: u64 = segments.iter().map(|s| s.len).sum();

            state.apply_insert_segments(&store, at, segments, false, &[], &[])?;

            state.txn.push(
                EditInverse::Overwrite {
                    at,
                    old,
                    new_len,
                    cursors,
                    decorations,
                },
                new_len,
                n,
            );

            Ok(())
        })
    }

    /// Deletes everything from the cursor to the end of data.
    pub fn truncate_to_eof(&self, cursor: CursorId) -> crate::Result<Commit> {
        let store = self.0.store.clone();

        self.edit_op(|state| {
            let current = state.cursors.get(cursor)?.offset;
            let len = state.tree.byte_count() - current;

            let inverse = state.apply_delete(&store, current, len)?;
            state.txn.push(inverse, 0, len);

            Ok(())
        })
    }

    // ---------- transactions ----------

    /// Opens (or nests into) a transaction.
    pub fn transaction_start(&self, name: Option<&str>) -> crate::Result<()> {
        self.surface()?;
        self.write_state().txn.begin(name);
        Ok(())
    }

    /// Closes one nesting level; the outermost commit seals the revision.
    pub fn transaction_commit(&self) -> crate::Result<Commit> {
        self.surface()?;

        let mut state = self.write_state();

        match state.txn.commit()? {
            None => Ok(state.graph.head()),
            Some((name, payload, summary)) => {
                let commit = state.graph.record(name, payload, summary);
                state.cursors.bump_generation();
                Ok(commit)
            }
        }
    }

    /// Aborts the whole transaction at any depth, restoring pre-transaction
    /// state.
    pub fn transaction_rollback(&self) -> crate::Result<Commit> {
        self.surface()?;

        let store = self.0.store.clone();
        let mut state = self.write_state();

        let pending = state.txn.take_rollback()?;

        for inverse in pending.into_iter().rev() {
            state.replay(&store, inverse)?;
        }

        Ok(state.graph.head())
    }

    // ---------- revisions ----------

    /// Current (fork, revision).
    pub fn head(&self) -> crate::Result<Commit> {
        self.surface()?;
        Ok(self.read_state().graph.head())
    }

    /// Moves HEAD to `revision` within the current fork by replaying
    /// inverse logs. Never creates a fork.
    pub fn undo_seek(&self, revision: RevisionId) -> crate::Result<Commit> {
        self.surface()?;

        let store = self.0.store.clone();
        let mut state = self.write_state();

        if state.txn.in_progress() {
            return Err(Error::InvalidArgument("seek inside an open transaction"));
        }

        let plan = state.graph.plan_undo_seek(revision)?;
        state.execute(&store, plan)?;

        let head = Commit {
            fork: state.graph.head().fork,
            revision,
        };
        state.graph.set_head(head);
        state.cursors.bump_generation();

        Ok(head)
    }

    /// Moves HEAD to the highest revision of `fork`, routing through the
    /// common ancestor.
    pub fn fork_seek(&self, fork: ForkId) -> crate::Result<Commit> {
        self.surface()?;

        let store = self.0.store.clone();
        let mut state = self.write_state();

        if state.txn.in_progress() {
            return Err(Error::InvalidArgument("seek inside an open transaction"));
        }

        let plan = state.graph.plan_fork_seek(fork)?;
        state.execute(&store, plan)?;

        let head = Commit {
            fork,
            revision: state.graph.fork_info(fork)?.head_revision,
        };
        state.graph.set_head(head);
        state.cursors.bump_generation();

        Ok(head)
    }

    /// Metadata of one fork.
    pub fn fork_info(&self, fork: ForkId) -> crate::Result<ForkInfo> {
        self.surface()?;
        self.read_state().graph.fork_info(fork)
    }

    /// All forks, in creation order.
    pub fn list_forks(&self) -> crate::Result<Vec<ForkInfo>> {
        self.surface()?;
        Ok(self.read_state().graph.list_forks())
    }

    /// Metadata of one revision on the current fork.
    pub fn revision_info(&self, revision: RevisionId) -> crate::Result<RevisionInfo> {
        self.surface()?;

        let state = self.read_state();
        let head = state.graph.head();

        state.graph.revision_info(head.fork, revision)
    }

    /// Metadata of revisions `lo..=hi` on the current fork.
    pub fn revision_range(
        &self,
        lo: RevisionId,
        hi: RevisionId,
    ) -> crate::Result<Vec<RevisionInfo>> {
        self.surface()?;

        let state = self.read_state();
        let head = state.graph.head();

        state.graph.revision_range(head.fork, lo, hi)
    }

    // ---------- decorations ----------

    /// Upserts many decorations atomically; a `None` address removes the
    /// key. Returns the commit carrying the change.
    pub fn decorate(&self, entries: &[(&str, Option<AbsoluteAddress>)]) -> crate::Result<Commit> {
        let store = self.0.store.clone();

        self.edit_op(|state| {
            for (key, address) in entries {
                let address = match address {
                    Some(address) => Some(state.resolve(&store, *address)?),
                    None => None,
                };

                let prior = state.decorations.set(key, address);

                state.txn.push(
                    EditInverse::Decoration {
                        key: (*key).to_string(),
                        prior,
                    },
                    0,
                    0,
                );
            }

            Ok(())
        })
    }

    /// Byte address of a decoration.
    pub fn decoration_position(&self, key: &str) -> crate::Result<u64> {
        self.surface()?;
        self.read_state().decorations.position(key)
    }

    /// Decorations with `lo <= address < hi`, ascending.
    pub fn decorations_in_byte_range(&self, lo: u64, hi: u64) -> crate::Result<Vec<(String, u64)>> {
        self.surface()?;
        Ok(self.read_state().decorations.in_range(lo, hi))
    }

    /// Decorations on the given line (including its terminating LF).
    pub fn decorations_on_line(&self, line: u64) -> crate::Result<Vec<(String, u64)>> {
        self.surface()?;

        let state = self.read_state();
        let store = &self.0.store;
        let lf_count = state.tree.lf_count();

        if line > lf_count {
            return Ok(Vec::new());
        }

        let start = if line == 0 {
            0
        } else {
            state.tree.offset_after_lf(store, line - 1)?
        };

        let end = if line < lf_count {
            state.tree.offset_after_lf(store, line)?
        } else {
            state.tree.byte_count() + 1
        };

        Ok(state.decorations.in_range(start, end))
    }

    // ---------- search ----------

    /// Finds the first (or, backward, the last) occurrence of `pattern`.
    pub fn find(&self, pattern: &[u8], options: FindOptions) -> crate::Result<Option<Match>> {
        self.surface()?;

        let state = self.read_state();
        let store = &self.0.store;

        match options.direction {
            SearchDirection::Forward => Ok(search::find_forward(
                &state.tree,
                store,
                pattern,
                options.case_sensitive,
                false,
            )?
            .into_iter()
            .next()),
            SearchDirection::Backward => {
                search::find_backward(&state.tree, store, pattern, options.case_sensitive)
            }
        }
    }

    /// All non-overlapping occurrences, in ascending byte order.
    pub fn find_all(&self, pattern: &[u8], options: FindOptions) -> crate::Result<Vec<Match>> {
        self.surface()?;

        let state = self.read_state();

        search::find_forward(
            &state.tree,
            &self.0.store,
            pattern,
            options.case_sensitive,
            true,
        )
    }

    // ---------- lifecycle ----------

    /// Closes the garland; in-flight and subsequent operations fail with
    /// `Closed`. The streaming loader, if still running, is joined.
    pub fn close(&self) {
        if self.0.closed.swap(true, Release) {
            return;
        }

        log::debug!("garland: closing");

        #[allow(clippy::expect_used)]
        let handle = self.0.load.handle.lock().expect("lock is poisoned").take();

        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Spills the old-bytes buffers of revisions far below their fork's
    /// head. Part of the cold-revision chill pass.
    pub(crate) fn chill_cold_revisions(&self, distance: u64) -> crate::Result<u64> {
        let blobs = {
            let state = self.read_state();
            state.graph.cold_payload_blobs(distance)
        };

        let mut freed = 0;

        for blob in blobs {
            freed += self.0.store.chill(blob)?;
        }

        Ok(freed)
    }
}
