//! # Error Types
//!
//! Shared error type for the HybridKV workspace.
//!
//! ## Design Principles
//!
//! 1. **Typed Domain Errors**: One variant per client-visible failure mode so
//!    callers can match instead of parsing strings.
//! 2. **No Silent Conversion**: Conditions that are not errors (per-field
//!    result codes, "not met" outcomes) never appear here; see
//!    `hkv_engine::ops::FieldOutcome` for those.
//! 3. **`thiserror`-derived `Display`**: Keeps messages consistent without
//!    hand-writing `impl Display` for every variant.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type HkvResult<T> = Result<T, HkvError>;

/// All client-visible domain errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HkvError {
    /// Key does not exist (or has expired and been lazily removed).
    #[error("no such key")]
    NotFound,

    /// The key exists but holds a value of a different type.
    #[error("wrong type, expected a hash")]
    WrongType,

    /// A field or value exceeded a configured byte-length bound.
    #[error("field too long")]
    FieldTooLong,

    /// A stored value exceeded a configured byte-length bound.
    #[error("value too long")]
    ValueTooLong,

    /// A key exceeded the configured byte-length bound.
    #[error("key too long")]
    KeyTooLong,

    /// An unrecognized option was supplied to a command (e.g. a bad
    /// expire-condition flag).
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// The `FIELDS <count> <field...>` tail did not carry `count` fields.
    #[error("field count mismatch: declared {declared}, got {actual}")]
    NumFieldsMismatch { declared: usize, actual: usize },

    /// A computed absolute expiration overflowed the representable range.
    #[error("expire time is not an integer or out of range")]
    ExpireOverflow,

    /// An arithmetic command (`HINCRBYFLOAT`) produced NaN or infinity.
    #[error("increment would produce NaN or Infinity")]
    NotANumber,

    /// An arithmetic command's increment would overflow the stored integer.
    #[error("increment or decrement would overflow")]
    IncrementOverflow,

    /// Non-panicking allocation path (RDB load) failed to reserve memory.
    #[error("out of memory")]
    OutOfMemory,
}
