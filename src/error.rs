//  Errors of the library.
use thiserror::Error;

/// Errors returned by this library.
///
/// Absence (a key not in a table, a string never interned) is not an error, and is reported with `Option::None`.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum LoomError {
    /// The key is already present, and replacement was not allowed.
    #[error("key already exists")]
    KeyExists,
    /// The table could not make room for the entry, and may not grow any further.
    #[error("hash table is full")]
    TableFull,
    /// No memory could be allocated.
    #[error("memory exhausted")]
    MemoryExhausted,
    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// The `Handle` or `StrHandle` is not from this instance of `Tablet`.
    #[error("handle does not belong to this tablet")]
    HandleMismatch,
    /// The pool of `Tablet` generations has been exhausted.
    #[error("tablet generation pool exhausted")]
    GenerationsExhausted,
    /// The `Tablet` cannot index any further string.
    #[error("tablet exhausted")]
    TabletExhausted,
    /// The `Mark` is stale, or not the innermost open mark of this `Arena`.
    #[error("arena mark does not match the innermost open scope")]
    MarkMismatch,
}

impl From<alloc::collections::TryReserveError> for LoomError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Self::MemoryExhausted
    }
}
