//! Runtime configuration.

use serde::Deserialize;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```rust
/// use weft_core::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json(r#"{ "recursion_limit": 8 }"#).unwrap();
/// assert_eq!(config.recursion_limit, 8);
/// assert!(config.warn_readonly_writes);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many times a single job may re-queue itself within one flush, and
    /// how many times a self-recursive effect may re-run within one run,
    /// before the runtime gives up on it.
    pub recursion_limit: usize,

    /// Emit a `warn!` when something writes through a readonly wrapper.
    pub warn_readonly_writes: bool,

    /// Largest length a wrapped sequence may be grown to by an index or
    /// `length` write. Larger writes are refused with a `warn!`.
    pub max_sequence_len: usize,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
            warn_readonly_writes: true,
            max_sequence_len: 1 << 20,
        }
    }
}
