//! In-memory result cache shared between loaders.
//!
//! One entry per resource key, replaced wholesale on every successful fetch.
//! Entries live for the life of the process unless explicitly invalidated;
//! freshness is judged by the reader against its own TTL.

mod ttl;

pub use ttl::{CacheEntry, TtlCache};
