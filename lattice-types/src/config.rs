//! Cache configuration.
//!
//! An explicit configuration value injected at cache construction. There is
//! no global instance; hosts build one `CacheConfig`, hand it to the cache,
//! and collaborators receive the cache by reference.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A scalar conversion function.
pub type ScalarFn = Box<dyn Fn(&Value) -> Value>;

/// Conversion pair for a custom scalar type.
///
/// `unmarshal` turns the stored wire value into the application-facing value
/// during reads. `marshal` is the inverse, used by input serialization layers
/// outside the cache; it is carried here so both directions live in one table.
pub struct ScalarHandler {
    pub marshal: ScalarFn,
    pub unmarshal: ScalarFn,
}

impl ScalarHandler {
    #[must_use]
    pub fn new(marshal: ScalarFn, unmarshal: ScalarFn) -> Self {
        Self { marshal, unmarshal }
    }
}

impl fmt::Debug for ScalarHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarHandler").finish_non_exhaustive()
    }
}

/// Configuration injected into the cache at construction.
#[derive(Debug)]
pub struct CacheConfig {
    /// Per-type identity key fields, overriding `default_keys`.
    keys: HashMap<String, Vec<String>>,
    /// Identity key fields used when a type has no override.
    default_keys: Vec<String>,
    /// Custom scalar conversion table, keyed by scalar type name.
    scalars: HashMap<String, ScalarHandler>,
    /// Idle ticks a field with zero subscribers survives before eviction.
    gc_buffer_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            default_keys: vec!["id".to_string()],
            scalars: HashMap::new(),
            gc_buffer_size: 10,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default identity keys (`id`) and a GC
    /// buffer of 10 ticks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the identity key fields for one type.
    #[must_use]
    pub fn with_keys(mut self, type_name: impl Into<String>, fields: Vec<String>) -> Self {
        self.keys.insert(type_name.into(), fields);
        self
    }

    /// Replaces the default identity key fields.
    #[must_use]
    pub fn with_default_keys(mut self, fields: Vec<String>) -> Self {
        self.default_keys = fields;
        self
    }

    /// Registers a custom scalar handler.
    #[must_use]
    pub fn with_scalar(mut self, type_name: impl Into<String>, handler: ScalarHandler) -> Self {
        self.scalars.insert(type_name.into(), handler);
        self
    }

    /// Sets the garbage collection buffer size.
    #[must_use]
    pub fn with_gc_buffer_size(mut self, ticks: u32) -> Self {
        self.gc_buffer_size = ticks;
        self
    }

    /// The identity key fields for a type.
    #[must_use]
    pub fn key_fields(&self, type_name: &str) -> &[String] {
        self.keys
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_keys)
    }

    /// The scalar handler registered for a type, if any.
    #[must_use]
    pub fn scalar(&self, type_name: &str) -> Option<&ScalarHandler> {
        self.scalars.get(type_name)
    }

    /// The garbage collection buffer size.
    #[must_use]
    pub fn gc_buffer_size(&self) -> u32 {
        self.gc_buffer_size
    }
}
