//! Substitute data for when live data cannot be loaded.
//!
//! Fallback records are fixed and deterministic. They are recognisable by an
//! id prefix, so code that receives a list second-hand can still tell it is
//! looking at sample data.

use crate::config::LoaderConfig;

/// A record with a stable identifier.
pub trait Record {
    fn record_id(&self) -> &str;
}

/// Supplies the dataset shown when every live attempt has failed.
pub trait FallbackProvider<T>: Send + Sync {
    /// The substitute dataset. Must return the same records on every call.
    fn get_fallback(&self) -> Vec<T>;

    /// Whether `records` came from this provider.
    fn is_fallback(&self, records: &[T]) -> bool;
}

/// A fixed list of records tagged with an id prefix.
#[derive(Debug, Clone)]
pub struct StaticFallback<T> {
    records: Vec<T>,
    id_prefix: String,
}

impl<T> StaticFallback<T> {
    /// Use `records` with the default `fallback-` id prefix.
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            id_prefix: LoaderConfig::FALLBACK_ID_PREFIX.to_string(),
        }
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn id_prefix(&self) -> &str {
        &self.id_prefix
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: Record> StaticFallback<T> {
    /// Whether a single record carries the fallback id prefix.
    pub fn is_fallback_record(&self, record: &T) -> bool {
        record.record_id().starts_with(&self.id_prefix)
    }
}

impl<T> FallbackProvider<T> for StaticFallback<T>
where
    T: Record + Clone + Send + Sync,
{
    fn get_fallback(&self) -> Vec<T> {
        self.records.clone()
    }

    fn is_fallback(&self, records: &[T]) -> bool {
        !records.is_empty() && records.iter().all(|r| self.is_fallback_record(r))
    }
}
