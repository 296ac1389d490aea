// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur in the garland
#[derive(Debug)]
pub enum Error {
    /// Malformed address, zero-length pattern or unknown mode
    InvalidArgument(&'static str),

    /// Numerically invalid target that survives the clamping rules,
    /// e.g. an unknown revision or fork id
    OutOfRange(u64),

    /// Decoration key is not present
    DecorationNotFound(String),

    /// Commit or rollback without a matching transaction start
    NoActiveTransaction,

    /// Spill I/O or mmap failure
    StorageFailure(std::io::Error),

    /// Hard memory limit reached with nothing evictable
    MemoryExhausted {
        /// Bytes the allocation asked for
        requested: u64,

        /// The configured hard limit
        hard_limit: u64,
    },

    /// Operation on a closed garland or library
    Closed,

    /// Cursor, blob or decoration references revoked state
    InvalidReference,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GarlandError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::StorageFailure(value)
    }
}

/// Garland result
pub type Result<T> = std::result::Result<T, Error>;
