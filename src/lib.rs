// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An editable, versioned, cursor-navigable view over very large byte
//! sequences.
//!
//! ##### About
//!
//! This crate exports a [`Library`] that opens files (or inline bytes) as
//! [`Garland`]s: piece-tree backed documents with O(log n) position
//! queries and edits across three coordinate spaces (byte, code point,
//! line), fork-based undo/redo, named cursors and decorations that drift
//! with edits, substring search, and a tiered memory budget that chills
//! cold data to a spill directory while staying seekable.
//!
//! Content is never copied on edit: leaves of a balanced segment tree
//! reference immutable blobs, which may be resident, memory-mapped from
//! the original file, or paged out to spill files. Undo history stores
//! inverse operations referencing the same blobs, so revisions are cheap
//! no matter the document size.
//!
//! # Example usage
//!
//! ```
//! use garland::{AbsoluteAddress, FileOptions, LibraryOptions};
//!
//! # let spill = tempfile::tempdir()?;
//! let library = LibraryOptions::new().cold_storage_path(&spill).open()?;
//! let garland = library.open_file(FileOptions::string("hello\nworld"))?;
//!
//! // counts in three coordinate spaces
//! assert_eq!(11, garland.byte_count()?.value);
//! assert_eq!(11, garland.rune_count()?.value);
//! assert_eq!(2, garland.line_count()?.value);
//!
//! // cursor navigation; addresses carry their coordinate space
//! garland.seek(0, AbsoluteAddress::LineRune { line: 1, column: 0 })?;
//! assert_eq!("world", garland.read_line(0)?);
//!
//! // edits commit revisions
//! garland.seek(0, AbsoluteAddress::Byte(5))?;
//! let commit = garland.insert_str(0, " there", false)?;
//! assert_eq!(1, commit.revision);
//!
//! // undo restores the previous revision exactly
//! garland.undo_seek(0)?;
//! assert_eq!(b"hello\nworld", &*garland.read_range(0, 11)?);
//! #
//! # library.close()?;
//! # Ok::<(), garland::Error>(())
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]

mod address;
mod config;
mod cursor;
mod decoration;
mod error;
mod garland;
mod history;
mod library;
mod loader;
mod memory;
mod search;
mod segment;
mod slice;
mod store;
mod transaction;
mod tree;
mod unicode;

pub use {
    address::{AbsoluteAddress, AddressMode, Commit, Progress},
    config::{FileOptions, LibraryOptions, LoadingStyle},
    cursor::{CursorId, CursorUnit},
    error::{Error, Result},
    garland::Garland,
    history::{DiffSummary, ForkId, ForkInfo, RevisionId, RevisionInfo},
    library::Library,
    memory::{ChillMode, MemoryUsage},
    search::{FindOptions, Match, SearchDirection},
    slice::Slice,
};
