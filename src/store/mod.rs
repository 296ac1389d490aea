// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub(crate) mod lru;
pub(crate) mod page_cache;

use crate::memory::MemoryUsage;
use crate::{Error, Slice};
use lru::LruList;
use memmap2::Mmap;
use page_cache::{PageCache, PAGE_SIZE};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

/// Blob identifier, assigned from an atomic counter per store
pub type BlobId = u64;

/// Default size of the page-in window for spilled blobs
pub const DEFAULT_PAGE_WINDOW: u64 = 8 * 1_024 * 1_024;

fn spill_file_name(id: BlobId) -> String {
    format!("blob-{id}.bin")
}

/// Where a blob's bytes currently live
#[derive(Debug)]
pub(crate) enum Residency {
    /// Held in memory
    Resident(Slice),

    /// Backed by a read-only OS mapping of the original file
    Mapped {
        map: Arc<Mmap>,
        offset: u64,
        len: u64,
    },

    /// Paged out to a spill file, named by blob id
    Spilled { len: u64 },
}

impl Residency {
    fn len(&self) -> u64 {
        match self {
            Self::Resident(data) => data.len() as u64,
            Self::Mapped { len, .. } | Self::Spilled { len } => *len,
        }
    }
}

struct BlobEntry {
    residency: Residency,
    pins: u32,
}

#[derive(Default)]
struct StoreInner {
    blobs: FxHashMap<BlobId, BlobEntry>,
    lru: LruList,
    resident_bytes: u64,
    mapped_bytes: u64,
    spilled_bytes: u64,
    pinned_bytes: u64,
}

/// Owns all byte storage of a library.
///
/// Blobs are immutable once ingested; only their residency changes. The
/// single mutex below is the residency lock, reads of spilled blobs do
/// their I/O outside of it (a spilled blob never becomes resident again,
/// it is paged through the [`PageCache`] instead).
pub struct BlobStore {
    inner: Mutex<StoreInner>,
    pages: PageCache,
    spill_dir: Option<PathBuf>,
    next_id: AtomicU64,
}

impl BlobStore {
    #[must_use]
    pub fn new(spill_dir: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            pages: PageCache::with_capacity_bytes(DEFAULT_PAGE_WINDOW),
            spill_dir,
            next_id: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn has_spill_dir(&self) -> bool {
        self.spill_dir.is_some()
    }

    /// Registers an in-memory blob.
    pub fn add_resident(&self, data: Slice) -> BlobId {
        let id = self.next_id.fetch_add(1, Relaxed);
        let len = data.len() as u64;

        // NOTE: If the lock is poisoned, the store is broken anyway
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock is poisoned");

        inner.blobs.insert(
            id,
            BlobEntry {
                residency: Residency::Resident(data),
                pins: 0,
            },
        );
        inner.lru.touch(id);
        inner.resident_bytes += len;

        log::trace!("store: registered resident blob {id} ({len}B)");

        id
    }

    /// Registers a blob backed by a range of a read-only file mapping.
    pub fn add_mapped(&self, map: Arc<Mmap>, offset: u64, len: u64) -> BlobId {
        let id = self.next_id.fetch_add(1, Relaxed);

        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock is poisoned");

        inner.blobs.insert(
            id,
            BlobEntry {
                residency: Residency::Mapped { map, offset, len },
                pins: 0,
            },
        );
        inner.mapped_bytes += len;

        log::trace!("store: registered mapped blob {id} ({len}B)");

        id
    }

    /// Reads a byte range out of a blob, paging in transparently if the
    /// blob has been spilled.
    pub fn read(&self, id: BlobId, offset: u64, len: u64) -> crate::Result<Slice> {
        if len == 0 {
            return Ok(Slice::from(&[][..]));
        }

        enum Source {
            Done(Slice),
            Spilled(u64),
        }

        let source = {
            #[allow(clippy::expect_used)]
            let mut inner = self.inner.lock().expect("lock is poisoned");

            let entry = inner.blobs.get(&id).ok_or(Error::InvalidReference)?;

            if offset + len > entry.residency.len() {
                return Err(Error::InvalidArgument("read beyond blob bounds"));
            }

            let (source, touch) = match &entry.residency {
                Residency::Resident(data) => {
                    let range = offset as usize..(offset + len) as usize;

                    #[allow(clippy::indexing_slicing)]
                    let copy = Slice::from(&data[range]);

                    (Source::Done(copy), entry.pins == 0)
                }
                Residency::Mapped {
                    map,
                    offset: base,
                    len: _,
                } => {
                    let range = (base + offset) as usize..(base + offset + len) as usize;

                    #[allow(clippy::indexing_slicing)]
                    let copy = Slice::from(&map[range]);

                    (Source::Done(copy), false)
                }
                Residency::Spilled { len: blob_len } => (Source::Spilled(*blob_len), false),
            };

            if touch {
                inner.lru.touch(id);
            }

            source
        };

        match source {
            Source::Done(data) => Ok(data),
            // NOTE: I/O happens outside the residency lock; a spilled blob
            // never transitions back, so the classification stays valid
            Source::Spilled(blob_len) => self.read_spilled(id, blob_len, offset, len),
        }
    }

    fn read_spilled(&self, id: BlobId, blob_len: u64, offset: u64, len: u64) -> crate::Result<Slice> {
        let dir = self.spill_dir.as_ref().ok_or(Error::InvalidReference)?;
        let path = dir.join(spill_file_name(id));

        let mut out = Vec::with_capacity(len as usize);
        let mut file: Option<File> = None;

        let first_page = offset / PAGE_SIZE;
        let last_page = (offset + len - 1) / PAGE_SIZE;

        for page in first_page..=last_page {
            let page_start = page * PAGE_SIZE;
            let page_len = PAGE_SIZE.min(blob_len - page_start);

            let data = if let Some(data) = self.pages.get(id, page) {
                data
            } else {
                if file.is_none() {
                    file = Some(File::open(&path)?);
                }

                #[allow(clippy::expect_used)]
                let file = file.as_mut().expect("file was just opened");

                let mut buf = vec![0; page_len as usize];
                file.seek(SeekFrom::Start(page_start))?;
                file.read_exact(&mut buf)?;

                let data = Slice::from(buf);
                self.pages.insert(id, page, data.clone());
                data
            };

            let lo = offset.max(page_start) - page_start;
            let hi = (offset + len).min(page_start + data.len() as u64) - page_start;

            #[allow(clippy::indexing_slicing)]
            out.extend_from_slice(&data[lo as usize..hi as usize]);
        }

        Ok(Slice::from(out))
    }

    /// Prevents the blob from being chilled until unpinned.
    pub fn pin(&self, id: BlobId) -> crate::Result<()> {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock is poisoned");

        let entry = inner.blobs.get_mut(&id).ok_or(Error::InvalidReference)?;
        entry.pins += 1;

        let newly_pinned =
            entry.pins == 1 && matches!(entry.residency, Residency::Resident(_));
        let len = entry.residency.len();

        if newly_pinned {
            inner.lru.remove(id);
            inner.pinned_bytes += len;
        }

        Ok(())
    }

    /// Releases one pin.
    pub fn unpin(&self, id: BlobId) -> crate::Result<()> {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock is poisoned");

        let entry = inner.blobs.get_mut(&id).ok_or(Error::InvalidReference)?;

        if entry.pins == 0 {
            return Err(Error::InvalidReference);
        }

        entry.pins -= 1;

        let released =
            entry.pins == 0 && matches!(entry.residency, Residency::Resident(_));
        let len = entry.residency.len();

        if released {
            inner.lru.touch(id);
            inner.pinned_bytes -= len;
        }

        Ok(())
    }

    /// Chills one blob to its spill file. Returns the freed bytes, or 0 if
    /// the blob is pinned, mapped or already spilled.
    ///
    /// On spill I/O failure the blob stays resident, so the operation can
    /// be retried.
    pub fn chill(&self, id: BlobId) -> crate::Result<u64> {
        let Some(dir) = self.spill_dir.as_ref() else {
            return Ok(0);
        };

        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock is poisoned");

        let Some(entry) = inner.blobs.get_mut(&id) else {
            return Err(Error::InvalidReference);
        };

        if entry.pins > 0 {
            return Ok(0);
        }

        let Residency::Resident(data) = &entry.residency else {
            return Ok(0);
        };

        let len = data.len() as u64;

        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        temp_file.write_all(data)?;
        temp_file.flush()?;
        temp_file
            .persist(dir.join(spill_file_name(id)))
            .map_err(|e| Error::StorageFailure(e.error))?;

        entry.residency = Residency::Spilled { len };
        inner.lru.remove(id);
        inner.resident_bytes -= len;
        inner.spilled_bytes += len;

        log::debug!("store: chilled blob {id} ({len}B) to spill file");

        Ok(len)
    }

    /// Chills coldest-first until resident usage is at or below `target`,
    /// or nothing evictable remains. Returns the freed bytes.
    pub fn chill_until(&self, target: u64) -> crate::Result<u64> {
        if self.spill_dir.is_none() {
            return Ok(0);
        }

        let mut freed = 0;
        let mut skipped = Vec::new();

        loop {
            let candidate = {
                #[allow(clippy::expect_used)]
                let mut inner = self.inner.lock().expect("lock is poisoned");

                if inner.resident_bytes <= target {
                    break;
                }

                inner.lru.pop_coldest()
            };

            let Some(id) = candidate else {
                break;
            };

            let chilled = self.chill(id)?;

            if chilled == 0 {
                // raced with a pin; keep it out of this pass but back in
                // the recency list
                skipped.push(id);
            } else {
                freed += chilled;
            }
        }

        if !skipped.is_empty() {
            #[allow(clippy::expect_used)]
            let mut inner = self.inner.lock().expect("lock is poisoned");

            for id in skipped {
                let eligible = inner
                    .blobs
                    .get(&id)
                    .is_some_and(|entry| entry.pins == 0 && matches!(entry.residency, Residency::Resident(_)));

                if eligible {
                    inner.lru.touch(id);
                }
            }
        }

        Ok(freed)
    }

    /// Chills every unpinned resident blob. Returns the freed bytes.
    pub fn chill_all_unpinned(&self) -> crate::Result<u64> {
        self.chill_until(0)
    }

    /// Residency report.
    pub fn usage(&self) -> MemoryUsage {
        #[allow(clippy::expect_used)]
        let inner = self.inner.lock().expect("lock is poisoned");

        MemoryUsage {
            memory_bytes: inner.resident_bytes,
            mapped_bytes: inner.mapped_bytes,
            spilled_bytes: inner.spilled_bytes,
            pinned_bytes: inner.pinned_bytes,
            blob_count: inner.blobs.len() as u64,
        }
    }

    /// Resident bytes right now (budget enforcement hot path).
    pub fn resident_bytes(&self) -> u64 {
        #[allow(clippy::expect_used)]
        let inner = self.inner.lock().expect("lock is poisoned");
        inner.resident_bytes
    }

    /// Deletes all spill files and drops the page window. Called on
    /// library shutdown; spill files are not durable across restarts.
    pub fn drain(&self) -> crate::Result<()> {
        self.pages.clear();

        let Some(dir) = self.spill_dir.as_ref() else {
            return Ok(());
        };

        #[allow(clippy::expect_used)]
        let inner = self.inner.lock().expect("lock is poisoned");

        for (id, entry) in &inner.blobs {
            if let Residency::Spilled { .. } = entry.residency {
                let path = dir.join(spill_file_name(*id));

                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("store: could not remove spill file {path:?}: {e}");
                }
            }
        }

        Ok(())
    }
}

/// Removes spill files left behind by a previous process.
pub fn sweep_spill_dir(dir: &Path) -> crate::Result<()> {
    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;
        let name = dirent.file_name();
        let name = name.to_string_lossy();

        if name.starts_with("blob-") && name.ends_with(".bin") {
            log::warn!("store: sweeping stale spill file {name}");
            std::fs::remove_file(dirent.path())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn resident_read_round_trip() -> crate::Result<()> {
        let store = BlobStore::new(None);
        let id = store.add_resident(Slice::from("hello world"));

        assert_eq!(&*store.read(id, 0, 11)?, b"hello world");
        assert_eq!(&*store.read(id, 6, 5)?, b"world");
        assert!(store.read(id, 6, 6).is_err());

        Ok(())
    }

    #[test]
    fn unknown_blob_is_revoked() {
        let store = BlobStore::new(None);
        assert!(matches!(
            store.read(42, 0, 1),
            Err(Error::InvalidReference)
        ));
    }

    #[test]
    fn chill_and_page_in() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = BlobStore::new(Some(dir.path().into()));

        let payload = b"neptune".repeat(100_000);
        let id = store.add_resident(Slice::from(payload.clone()));

        let freed = store.chill(id)?;
        assert_eq!(payload.len() as u64, freed);
        assert_eq!(0, store.usage().memory_bytes);
        assert_eq!(payload.len() as u64, store.usage().spilled_bytes);

        // reads page back in, bit-identically, across page boundaries
        let read = store.read(id, 65_530, 100)?;
        assert_eq!(&payload[65_530..65_630], &*read);

        let read = store.read(id, 0, payload.len() as u64)?;
        assert_eq!(payload.as_slice(), &*read);

        Ok(())
    }

    #[test]
    fn pinned_blob_is_not_chilled() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = BlobStore::new(Some(dir.path().into()));

        let id = store.add_resident(Slice::from("pinned"));
        store.pin(id)?;

        assert_eq!(0, store.chill(id)?);
        assert_eq!(0, store.chill_all_unpinned()?);
        assert_eq!(6, store.usage().memory_bytes);

        store.unpin(id)?;
        assert!(store.chill(id)? > 0);

        Ok(())
    }

    #[test]
    fn unpin_without_pin_fails() {
        let store = BlobStore::new(None);
        let id = store.add_resident(Slice::from("x"));
        assert!(matches!(store.unpin(id), Err(Error::InvalidReference)));
    }

    #[test]
    fn chill_without_spill_dir_is_noop() -> crate::Result<()> {
        let store = BlobStore::new(None);
        let id = store.add_resident(Slice::from("stays"));
        assert_eq!(0, store.chill(id)?);
        assert_eq!(5, store.usage().memory_bytes);
        Ok(())
    }

    #[test]
    fn sweep_removes_stale_files() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("blob-17.bin"), b"stale")?;
        std::fs::write(dir.path().join("keep.txt"), b"keep")?;

        sweep_spill_dir(dir.path())?;

        assert!(!dir.path().join("blob-17.bin").try_exists()?);
        assert!(dir.path().join("keep.txt").try_exists()?);

        Ok(())
    }
}
