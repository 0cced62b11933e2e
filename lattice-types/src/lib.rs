//! Descriptor types for the lattice cache.
//!
//! This crate defines the declarative, engine-agnostic types consumed by the
//! cache engine:
//! - Selections: which fields/links to read or write, plus list and
//!   operation metadata attached by codegen
//! - List filters and `when` conditions for conditional list mutations
//! - Cache configuration (identity key fields, custom scalars, GC tuning)
//!
//! The engine itself lives in `lattice-cache`; nothing here touches storage.

mod config;
mod selection;

pub use config::{CacheConfig, ScalarFn, ScalarHandler};
pub use selection::{
    FilterKind, ListDeclaration, ListFilter, ListPosition, ListUpdate, OperationAction,
    OperationDeclaration, ParentRef, Selection, SelectionField, WhenCondition, resolve_filters,
};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while interpreting descriptor values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid {kind:?} filter value for \"{filter}\": {value}")]
    InvalidFilterValue {
        filter: String,
        kind: selection::FilterKind,
        value: String,
    },
}
