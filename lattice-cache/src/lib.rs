//! A client-side normalized object-graph cache for GraphQL-shaped data.
//!
//! Query results are normalized into a graph of typed entities keyed by
//! identity. Arbitrary sub-selections of that graph can be reconstructed on
//! demand, and fine-grained subscribers are notified exactly when the data
//! they depend on changes. The engine is composed of:
//!
//! - [`InMemoryStorage`] — entity fields organized as a stack of layers, one
//!   committed base plus any number of optimistic overlays
//! - [`evaluate_key`] — turns raw field keys with `$variable` references into
//!   concrete storage keys
//! - the selection traversal engine ([`Cache::write`] / [`Cache::read`])
//! - [`SubscriptionRegistry`] — reference-counted interest tracking per
//!   `(entity, field)`
//! - [`ListHandle`] — addressable views over list fields, including
//!   connection-wrapped ones
//! - [`GarbageCollector`] — tick-driven, buffered eviction of fields nobody
//!   subscribes to
//!
//! Everything runs synchronously on one thread; each public call is atomic
//! from the caller's perspective. The cache performs no I/O and never
//! validates data against a schema.

mod cache;
mod error;
mod gc;
mod key;
mod lists;
mod read;
mod storage;
mod subscription;
mod write;

pub use cache::{Cache, ROOT_ID};
pub use error::{CacheError, Result};
pub use gc::GarbageCollector;
pub use key::evaluate_key;
pub use lists::ListHandle;
pub use read::ReadRequest;
pub use storage::{FieldLookup, InMemoryStorage, LayerId, LinkEntry, StoredValue};
pub use subscription::{SubscriptionRegistry, SubscriptionSpec};
pub use write::WriteRequest;
