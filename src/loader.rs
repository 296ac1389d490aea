// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::config::LoadingStyle;
use crate::garland::{ingest, Garland};
use crate::segment::{Segment, MAX_LEAF_BYTES};
use crate::{Error, Slice};
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::Arc;

/// Bytes appended per write-lock acquisition, so edits can interleave
/// with the streaming load
const LOAD_CHUNK_BYTES: u64 = 1_024 * 1_024;

/// Loads inline bytes synchronously (the `DataBytes`/`DataString` open
/// paths). The counts are complete once this returns.
pub(crate) fn load_slice(garland: &Garland, data: Slice) -> crate::Result<()> {
    let segments = ingest(&garland.0.store, &garland.0.memory, data, None)?;
    append(garland, segments)?;

    garland.0.load.complete.store(true, Release);

    Ok(())
}

/// Schedules the streaming read of a file on a background thread.
///
/// Counts grow monotonically while the load runs; a failure is parked and
/// surfaces on the next user-facing operation.
pub(crate) fn begin_file_load(
    garland: &Garland,
    path: PathBuf,
    style: LoadingStyle,
) -> crate::Result<()> {
    let task = garland.clone();

    let handle = std::thread::Builder::new()
        .name("garland-load".into())
        .spawn(move || {
            if let Err(e) = run(&task, &path, style) {
                log::warn!("loader: background load of {path:?} failed: {e}");

                #[allow(clippy::expect_used)]
                let mut failed = task.0.load.failed.lock().expect("lock is poisoned");
                *failed = Some(e);
            }

            task.0.load.complete.store(true, Release);
            log::debug!("loader: load finished");
        })?;

    #[allow(clippy::expect_used)]
    let mut slot = garland.0.load.handle.lock().expect("lock is poisoned");
    *slot = Some(handle);

    Ok(())
}

fn run(garland: &Garland, path: &Path, style: LoadingStyle) -> crate::Result<()> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    log::debug!("loader: streaming {len}B from {path:?} ({style:?})");

    if len == 0 {
        return Ok(());
    }

    let map = match style {
        LoadingStyle::InMemory => None,
        LoadingStyle::MappedOnly => Some(map_file(&file)?),
        LoadingStyle::AllStorage => match map_file(&file) {
            Ok(map) => Some(map),
            Err(e) => {
                log::warn!("loader: mmap failed ({e}), falling back to streaming read");
                None
            }
        },
    };

    match map {
        Some(map) => load_mapped(garland, map, len),
        None => load_streamed(garland, file),
    }
}

fn map_file(file: &File) -> crate::Result<Mmap> {
    // SAFETY: The mapping is read-only; mutating the underlying file while
    // it is open in a garland is outside the supported contract
    #[allow(unsafe_code)]
    let map = unsafe { Mmap::map(file) }.map_err(Error::StorageFailure)?;

    Ok(map)
}

fn load_mapped(garland: &Garland, map: Mmap, len: u64) -> crate::Result<()> {
    let map = Arc::new(map);
    let blob = garland.0.store.add_mapped(map.clone(), 0, len);

    let mut pos = 0u64;

    while pos < len {
        if garland.0.closed.load(Acquire) {
            return Ok(());
        }

        let chunk_end = (pos + LOAD_CHUNK_BYTES).min(len);
        let mut segments = Vec::new();

        while pos < chunk_end {
            let leaf_len = MAX_LEAF_BYTES.min(chunk_end - pos);

            #[allow(clippy::indexing_slicing)]
            let bytes = &map[pos as usize..(pos + leaf_len) as usize];

            segments.push(Segment::scanned(blob, pos, bytes));
            pos += leaf_len;
        }

        append(garland, segments)?;
    }

    Ok(())
}

fn load_streamed(garland: &Garland, mut file: File) -> crate::Result<()> {
    let mut buf = vec![0u8; LOAD_CHUNK_BYTES as usize];

    loop {
        if garland.0.closed.load(Acquire) {
            return Ok(());
        }

        let mut filled = 0;

        while filled < buf.len() {
            #[allow(clippy::indexing_slicing)]
            let n = file.read(&mut buf[filled..])?;

            if n == 0 {
                break;
            }

            filled += n;
        }

        if filled == 0 {
            return Ok(());
        }

        #[allow(clippy::indexing_slicing)]
        let segments = ingest(
            &garland.0.store,
            &garland.0.memory,
            Slice::from(&buf[..filled]),
            None,
        )?;

        append(garland, segments)?;
    }
}

/// Appends one batch under the garland's write lock. This is the load-only
/// transaction boundary: no revision is recorded, but cursors, decorations
/// and interleaved edits observe a consistent sequence.
fn append(garland: &Garland, segments: Vec<Segment>) -> crate::Result<()> {
    let len: u64 = segments.iter().map(|s| s.len).sum();

    if len == 0 {
        return Ok(());
    }

    log::trace!("loader: acquiring write lock to append {len}B");

    #[allow(clippy::expect_used)]
    let mut state = garland.0.state.write().expect("lock is poisoned");

    let at = state.load_tail;

    state.tree.insert(&garland.0.store, at, segments)?;
    state.cursors.translate_insert(at, len, true);
    state.decorations.translate_insert(at, len, true);
    state.load_tail = at + len;

    Ok(())
}
