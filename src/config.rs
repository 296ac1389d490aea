// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Library, Slice};
use std::path::{Path, PathBuf};

/// Library configuration builder
///
/// # Examples
///
/// ```
/// # use garland::LibraryOptions;
/// # let folder = tempfile::tempdir()?;
/// let library = LibraryOptions::new()
///     .cold_storage_path(&folder)
///     .memory_soft_limit(/* 64 MiB */ 64 * 1_024 * 1_024)
///     .memory_hard_limit(/* 128 MiB */ 128 * 1_024 * 1_024)
///     .open()?;
/// #
/// # Ok::<(), garland::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct LibraryOptions {
    /// Spill directory; `None` disables chilling altogether
    #[doc(hidden)]
    pub cold_storage_path: Option<PathBuf>,

    /// Soft residency budget in bytes (0 = unbounded)
    #[doc(hidden)]
    pub memory_soft_limit: u64,

    /// Hard residency budget in bytes (0 = unbounded)
    #[doc(hidden)]
    pub memory_hard_limit: u64,
}

impl LibraryOptions {
    /// Initializes new options: no spill directory, unbounded budgets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the spill directory for chilled blobs. It is created if absent
    /// and swept of stale spill files when the library opens.
    #[must_use]
    pub fn cold_storage_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cold_storage_path = Some(path.as_ref().into());
        self
    }

    /// Sets the soft residency budget; crossing it wakes the background
    /// chill worker. 0 means unbounded.
    #[must_use]
    pub fn memory_soft_limit(mut self, bytes: u64) -> Self {
        self.memory_soft_limit = bytes;
        self
    }

    /// Sets the hard residency budget; allocations beyond it block on
    /// eviction and fail with `MemoryExhausted` if nothing is evictable.
    /// 0 means unbounded.
    #[must_use]
    pub fn memory_hard_limit(mut self, bytes: u64) -> Self {
        self.memory_hard_limit = bytes;
        self
    }

    /// Opens a library with these options.
    ///
    /// # Errors
    ///
    /// Returns error if the spill directory cannot be prepared.
    pub fn open(self) -> crate::Result<Library> {
        Library::open(self)
    }
}

/// How a file's bytes should be brought in
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LoadingStyle {
    /// Map the file when possible, permit spilling of edit data
    #[default]
    AllStorage,

    /// Map the file; refuse to fall back to a streaming read
    MappedOnly,

    /// Read everything into memory; never map
    InMemory,
}

#[derive(Clone, Debug)]
pub(crate) enum FileSource {
    Path(PathBuf),
    Bytes(Slice),
}

/// Parameters for [`Library::open_file`]
#[derive(Clone, Debug)]
pub struct FileOptions {
    pub(crate) source: FileSource,
    pub(crate) style: LoadingStyle,
}

impl FileOptions {
    /// Opens a file from disk; loading streams in the background.
    #[must_use]
    pub fn path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source: FileSource::Path(path.as_ref().into()),
            style: LoadingStyle::default(),
        }
    }

    /// Opens over inline bytes; loading is synchronous.
    #[must_use]
    pub fn bytes<B: Into<Slice>>(data: B) -> Self {
        Self {
            source: FileSource::Bytes(data.into()),
            style: LoadingStyle::InMemory,
        }
    }

    /// Opens over an inline string; loading is synchronous.
    #[must_use]
    pub fn string(data: &str) -> Self {
        Self::bytes(data)
    }

    /// Overrides the loading style hint.
    #[must_use]
    pub fn loading_style(mut self, style: LoadingStyle) -> Self {
        self.style = style;
        self
    }
}
