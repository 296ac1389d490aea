// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Error;
use rustc_hash::FxHashMap;

/// Cursor handle, valid until the cursor is removed
pub type CursorId = u64;

/// Preferred unit for relative cursor motion
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CursorUnit {
    /// Move by bytes
    #[default]
    Bytes,

    /// Move by code points
    Runes,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Cursor {
    /// Canonical byte offset
    pub offset: u64,

    /// Preferred unit for relative motion
    pub unit: CursorUnit,

    /// Generation of the commit this cursor was last translated against
    pub generation: u64,
}

/// Owns all cursors of a garland and translates their offsets through
/// committed edits. Clients only ever hold [`CursorId`]s.
#[derive(Debug)]
pub(crate) struct CursorMap {
    cursors: FxHashMap<CursorId, Cursor>,
    next_id: CursorId,
    generation: u64,
}

impl CursorMap {
    /// Creates the map with the garland's default cursor (id 0) at offset 0.
    pub fn new() -> Self {
        let mut cursors = FxHashMap::default();

        cursors.insert(
            0,
            Cursor {
                offset: 0,
                unit: CursorUnit::Bytes,
                generation: 0,
            },
        );

        Self {
            cursors,
            next_id: 1,
            generation: 0,
        }
    }

    pub fn create(&mut self, unit: CursorUnit) -> CursorId {
        let id = self.next_id;
        self.next_id += 1;

        self.cursors.insert(
            id,
            Cursor {
                offset: 0,
                unit,
                generation: self.generation,
            },
        );

        id
    }

    pub fn remove(&mut self, id: CursorId) -> crate::Result<()> {
        self.cursors
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::InvalidReference)
    }

    pub fn get(&self, id: CursorId) -> crate::Result<&Cursor> {
        self.cursors.get(&id).ok_or(Error::InvalidReference)
    }

    pub fn set_offset(&mut self, id: CursorId, offset: u64) -> crate::Result<()> {
        let generation = self.generation;

        let cursor = self.cursors.get_mut(&id).ok_or(Error::InvalidReference)?;
        cursor.offset = offset;
        cursor.generation = generation;

        Ok(())
    }

    /// Marks all cursors as translated against a new revision.
    pub fn bump_generation(&mut self) {
        self.generation += 1;

        for cursor in self.cursors.values_mut() {
            cursor.generation = self.generation;
        }
    }

    /// Shifts cursors through an insertion of `len` bytes at `at`.
    ///
    /// A cursor sitting exactly at `at` stays put when `before` is set
    /// (the insertion happens behind it), otherwise it ends up at the end
    /// of the new content.
    pub fn translate_insert(&mut self, at: u64, len: u64, before: bool) {
        for cursor in self.cursors.values_mut() {
            if cursor.offset > at || (cursor.offset == at && !before) {
                cursor.offset += len;
            }
        }
    }

    /// Shifts cursors through a deletion of `[at, at + len)`.
    ///
    /// Returns the pre-edit offsets of every cursor inside `(at, at + len]`;
    /// they all collapse onto `at`, so bare translation cannot restore them
    /// on undo.
    pub fn translate_delete(&mut self, at: u64, len: u64) -> Vec<(CursorId, u64)> {
        let mut clamped = Vec::new();

        for (id, cursor) in &mut self.cursors {
            if cursor.offset > at + len {
                cursor.offset -= len;
            } else if cursor.offset > at {
                clamped.push((*id, cursor.offset));
                cursor.offset = at;
            }
        }

        clamped.sort_unstable();
        clamped
    }

    /// Restores exact offsets captured by [`CursorMap::translate_delete`].
    /// Cursors removed since then are skipped.
    pub fn restore(&mut self, saved: &[(CursorId, u64)]) {
        for (id, offset) in saved {
            if let Some(cursor) = self.cursors.get_mut(id) {
                cursor.offset = *offset;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_shifts_at_and_after() {
        let mut map = CursorMap::new();
        map.set_offset(0, 10).unwrap();
        let a = map.create(CursorUnit::Bytes);
        map.set_offset(a, 5).unwrap();

        map.translate_insert(5, 3, false);

        assert_eq!(13, map.get(0).unwrap().offset);
        assert_eq!(8, map.get(a).unwrap().offset);
    }

    #[test]
    fn insert_before_parks_cursor() {
        let mut map = CursorMap::new();
        map.set_offset(0, 5).unwrap();

        map.translate_insert(5, 3, true);
        assert_eq!(5, map.get(0).unwrap().offset);

        map.translate_insert(2, 4, true);
        assert_eq!(9, map.get(0).unwrap().offset);
    }

    #[test]
    fn delete_clamps_interior() {
        let mut map = CursorMap::new();
        let inside = map.create(CursorUnit::Bytes);
        let at_end = map.create(CursorUnit::Bytes);
        let beyond = map.create(CursorUnit::Bytes);

        map.set_offset(0, 10).unwrap();
        map.set_offset(inside, 14).unwrap();
        map.set_offset(at_end, 20).unwrap();
        map.set_offset(beyond, 30).unwrap();

        let saved = map.translate_delete(10, 10);

        assert_eq!(10, map.get(0).unwrap().offset);
        assert_eq!(10, map.get(inside).unwrap().offset);
        assert_eq!(10, map.get(at_end).unwrap().offset);
        assert_eq!(20, map.get(beyond).unwrap().offset);

        assert_eq!(vec![(inside, 14), (at_end, 20)], saved);
    }

    #[test]
    fn delete_then_restore_round_trips() {
        let mut map = CursorMap::new();
        map.set_offset(0, 14).unwrap();

        let saved = map.translate_delete(10, 10);
        map.translate_insert(10, 10, true);
        map.restore(&saved);

        assert_eq!(14, map.get(0).unwrap().offset);
    }

    #[test]
    fn removed_cursor_is_revoked() {
        let mut map = CursorMap::new();
        let id = map.create(CursorUnit::Runes);

        map.remove(id).unwrap();

        assert!(matches!(map.get(id), Err(Error::InvalidReference)));
        assert!(matches!(map.remove(id), Err(Error::InvalidReference)));
    }
}
