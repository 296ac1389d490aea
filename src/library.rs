// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::config::{FileOptions, FileSource, LibraryOptions};
use crate::garland::Garland;
use crate::loader;
use crate::memory::{ChillMode, MemoryManager, MemoryUsage};
use crate::store::{self, BlobStore};
use crate::Error;
use std::sync::atomic::{AtomicBool, Ordering::Acquire, Ordering::Release};
use std::sync::{Arc, Mutex};

/// Revisions this far below their fork's head count as cold for
/// [`ChillMode::ColdRevisions`]
const COLD_REVISION_DISTANCE: u64 = 32;

pub(crate) struct LibraryInner {
    store: Arc<BlobStore>,
    memory: Arc<MemoryManager>,
    garlands: Mutex<Vec<Garland>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Process-level registry of garlands with an explicit lifecycle.
///
/// Owns the shared byte store, the residency budgets and the background
/// chill worker. Dropping the library closes it.
///
/// # Examples
///
/// ```
/// use garland::{FileOptions, LibraryOptions};
///
/// let library = LibraryOptions::new().open()?;
///
/// let garland = library.open_file(FileOptions::string("hello\nworld"))?;
/// assert_eq!(11, garland.byte_count()?.value);
/// assert_eq!(2, garland.line_count()?.value);
///
/// library.close()?;
/// #
/// # Ok::<(), garland::Error>(())
/// ```
#[derive(Clone)]
pub struct Library(Arc<LibraryInner>);

impl Library {
    /// Opens a library: prepares and sweeps the spill directory, then
    /// starts the chill worker.
    ///
    /// # Errors
    ///
    /// Returns error if the spill directory cannot be prepared.
    pub fn open(options: LibraryOptions) -> crate::Result<Self> {
        if let Some(dir) = &options.cold_storage_path {
            std::fs::create_dir_all(dir)?;
            store::sweep_spill_dir(dir)?;
        }

        log::debug!(
            "library: opening (spill={:?}, soft={}B, hard={}B)",
            options.cold_storage_path,
            options.memory_soft_limit,
            options.memory_hard_limit,
        );

        let store = Arc::new(BlobStore::new(options.cold_storage_path.clone()));
        let memory = MemoryManager::new(
            store.clone(),
            options.memory_soft_limit,
            options.memory_hard_limit,
        );

        let worker = {
            let memory = memory.clone();

            std::thread::Builder::new()
                .name("garland-chill".into())
                .spawn(move || memory.run_worker())?
        };

        Ok(Self(Arc::new(LibraryInner {
            store,
            memory,
            garlands: Mutex::new(Vec::new()),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })))
    }

    fn check(&self) -> crate::Result<()> {
        if self.0.closed.load(Acquire) {
            return Err(Error::Closed);
        }

        if let Some(e) = self.0.memory.take_background_error() {
            return Err(e);
        }

        Ok(())
    }

    /// Opens a file (from disk or inline bytes), returning its garland.
    ///
    /// Disk files stream in the background; counts report
    /// `complete = false` until the load finishes.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or memory is exhausted.
    pub fn open_file(&self, options: FileOptions) -> crate::Result<Garland> {
        self.check()?;

        let garland = Garland::new(self.0.store.clone(), self.0.memory.clone());

        match options.source {
            FileSource::Bytes(data) => loader::load_slice(&garland, data)?,
            FileSource::Path(path) => loader::begin_file_load(&garland, path, options.style)?,
        }

        #[allow(clippy::expect_used)]
        let mut garlands = self.0.garlands.lock().expect("lock is poisoned");
        garlands.push(garland.clone());

        Ok(garland)
    }

    /// Residency report of the shared byte store.
    pub fn memory_usage(&self) -> crate::Result<MemoryUsage> {
        self.check()?;
        Ok(self.0.store.usage())
    }

    /// Forces an immediate chill pass.
    ///
    /// # Errors
    ///
    /// Returns error on spill I/O failure.
    pub fn chill(&self, mode: ChillMode) -> crate::Result<()> {
        self.check()?;

        if !self.0.store.has_spill_dir() {
            log::debug!("library: chill requested without a spill directory");
            return Ok(());
        }

        if mode == ChillMode::ColdRevisions {
            #[allow(clippy::expect_used)]
            let garlands = self.0.garlands.lock().expect("lock is poisoned").clone();

            for garland in garlands {
                let freed = garland.chill_cold_revisions(COLD_REVISION_DISTANCE)?;

                if freed > 0 {
                    log::debug!("library: compacted {freed}B of cold revision payloads");
                }
            }
        }

        let freed = self.0.store.chill_all_unpinned()?;
        log::debug!("library: chill pass freed {freed}B");

        Ok(())
    }

    /// Closes the library: closes all garlands, stops the chill worker and
    /// drains the spill directory.
    ///
    /// # Errors
    ///
    /// Returns error if spill files could not be removed.
    pub fn close(&self) -> crate::Result<()> {
        if self.0.closed.swap(true, Release) {
            return Ok(());
        }

        log::debug!("library: closing");

        {
            #[allow(clippy::expect_used)]
            let mut garlands = self.0.garlands.lock().expect("lock is poisoned");

            for garland in garlands.drain(..) {
                garland.close();
            }
        }

        self.0.memory.stop();

        #[allow(clippy::expect_used)]
        let worker = self.0.worker.lock().expect("lock is poisoned").take();

        if let Some(worker) = worker {
            let _ = worker.join();
        }

        self.0.store.drain()
    }
}

impl Drop for LibraryInner {
    fn drop(&mut self) {
        if self.closed.swap(true, Release) {
            return;
        }

        if let Ok(mut garlands) = self.garlands.lock() {
            for garland in garlands.drain(..) {
                garland.close();
            }
        }

        self.memory.stop();

        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                let _ = worker.join();
            }
        }

        if let Err(e) = self.store.drain() {
            log::warn!("library: could not drain spill directory: {e}");
        }
    }
}
