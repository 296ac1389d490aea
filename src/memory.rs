// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::store::BlobStore;
use crate::Error;
use std::sync::atomic::{AtomicBool, Ordering::Acquire, Ordering::Release};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Residency report of a library's byte store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Resident blob bytes (the budgeted working set)
    pub memory_bytes: u64,

    /// Bytes backed by read-only file mappings; reclaimable by the OS,
    /// not counted against the budgets
    pub mapped_bytes: u64,

    /// Bytes chilled to spill files
    pub spilled_bytes: u64,

    /// Resident bytes that are pinned and therefore not evictable
    pub pinned_bytes: u64,

    /// Number of registered blobs
    pub blob_count: u64,
}

/// What a [`crate::Library::chill`] pass is allowed to touch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChillMode {
    /// Evict all unpinned, non-mapped resident blobs
    UnusedData,

    /// Additionally spill the old-bytes buffers of revisions older than
    /// the cold-revision threshold
    ColdRevisions,
}

/// Enforces the soft and hard residency budgets.
///
/// Crossing the soft budget wakes the background chill worker; crossing
/// the hard budget makes the allocating caller evict synchronously and
/// fail with `MemoryExhausted` if nothing can be freed. A budget of 0
/// means unbounded.
pub(crate) struct MemoryManager {
    store: Arc<BlobStore>,
    soft: u64,
    hard: u64,
    wake: Mutex<bool>,
    wake_signal: Condvar,
    stopped: AtomicBool,
    parked_error: Mutex<Option<Error>>,
}

impl MemoryManager {
    pub fn new(store: Arc<BlobStore>, soft: u64, hard: u64) -> Arc<Self> {
        Arc::new(Self {
            store,
            soft,
            hard,
            wake: Mutex::new(false),
            wake_signal: Condvar::new(),
            stopped: AtomicBool::new(false),
            parked_error: Mutex::new(None),
        })
    }

    /// Admits an allocation of `additional` resident bytes.
    pub fn reserve(&self, additional: u64) -> crate::Result<()> {
        if self.hard > 0 {
            let resident = self.store.resident_bytes();

            if resident + additional > self.hard {
                // block briefly while eviction catches up
                log::trace!("memory: hard budget pressure, chilling synchronously");
                self.store.chill_until(self.hard.saturating_sub(additional))?;

                let resident = self.store.resident_bytes();

                if resident + additional > self.hard {
                    return Err(Error::MemoryExhausted {
                        requested: additional,
                        hard_limit: self.hard,
                    });
                }
            }
        }

        if self.soft > 0 && self.store.resident_bytes() + additional > self.soft {
            self.kick();
        }

        Ok(())
    }

    /// Wakes the background worker.
    pub fn kick(&self) {
        #[allow(clippy::expect_used)]
        let mut wake = self.wake.lock().expect("lock is poisoned");
        *wake = true;
        self.wake_signal.notify_one();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Release);
        self.kick();
    }

    /// Surfaces and clears an error from a previous background pass.
    pub fn take_background_error(&self) -> Option<Error> {
        #[allow(clippy::expect_used)]
        self.parked_error.lock().expect("lock is poisoned").take()
    }

    /// The background chill loop; one worker per library.
    pub fn run_worker(&self) {
        loop {
            {
                #[allow(clippy::expect_used)]
                let mut wake = self.wake.lock().expect("lock is poisoned");

                while !*wake && !self.stopped.load(Acquire) {
                    #[allow(clippy::expect_used)]
                    let (guard, timeout) = self
                        .wake_signal
                        .wait_timeout(wake, Duration::from_millis(500))
                        .expect("lock is poisoned");
                    wake = guard;

                    // re-check the budget periodically even without a kick
                    if timeout.timed_out() {
                        break;
                    }
                }

                *wake = false;
            }

            if self.stopped.load(Acquire) {
                log::trace!("memory: chill worker stopping");
                return;
            }

            if self.soft == 0 {
                continue;
            }

            let resident = self.store.resident_bytes();

            if resident > self.soft {
                log::debug!(
                    "memory: resident {resident}B above soft budget {}B, chilling",
                    self.soft,
                );

                if let Err(e) = self.store.chill_until(self.soft) {
                    log::warn!("memory: background chill failed: {e}");

                    #[allow(clippy::expect_used)]
                    let mut parked = self.parked_error.lock().expect("lock is poisoned");
                    *parked = Some(e);

                    // background work stops; the error resurfaces on the
                    // next user-facing operation
                    self.stopped.store(true, Release);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Slice;
    use test_log::test;

    #[test]
    fn unbounded_budgets_admit_everything() -> crate::Result<()> {
        let store = Arc::new(BlobStore::new(None));
        let memory = MemoryManager::new(store, 0, 0);

        memory.reserve(u64::MAX / 2)?;
        Ok(())
    }

    #[test]
    fn hard_budget_fails_when_nothing_evictable() {
        let store = Arc::new(BlobStore::new(None));
        store.add_resident(Slice::from(vec![0u8; 1_000]));

        let memory = MemoryManager::new(store, 0, 1_500);

        assert!(memory.reserve(400).is_ok());
        assert!(matches!(
            memory.reserve(600),
            Err(Error::MemoryExhausted {
                requested: 600,
                hard_limit: 1_500,
            })
        ));
    }

    #[test]
    fn hard_budget_evicts_synchronously() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(BlobStore::new(Some(dir.path().into())));
        store.add_resident(Slice::from(vec![0u8; 1_000]));

        let memory = MemoryManager::new(store.clone(), 0, 1_500);

        // over budget, but the existing blob can be chilled out of the way
        memory.reserve(1_200)?;
        assert_eq!(0, store.usage().memory_bytes);
        assert_eq!(1_000, store.usage().spilled_bytes);

        Ok(())
    }
}
