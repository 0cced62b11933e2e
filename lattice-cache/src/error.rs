use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by cache operations.
///
/// All failures are immediate and synchronous; the cache performs no
/// retries. A traversal error aborts the current call, leaving fields
/// written earlier in the same call in place.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Data contains a field the selection does not declare.
    #[error("field \"{field}\" is not present in the selection")]
    MissingSelection { field: String },

    /// An abstract-typed value arrived without `__typename`.
    #[error("abstract value under \"{key}\" is missing __typename")]
    MissingTypename { key: String },

    /// A list filter literal does not match its declared kind.
    #[error("invalid list filter: {0}")]
    InvalidFilterValue(#[from] lattice_types::Error),

    /// `list(name, parent)` has no registered handle.
    #[error("no list \"{name}\" registered under \"{parent}\"")]
    ListNotFound { name: String, parent: String },

    /// A delete operation's target value is not a string id.
    #[error("delete operation target must be a string id, got {value}")]
    InvalidParentId { value: String },
}
