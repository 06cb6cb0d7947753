//! Process-lifetime state: per-view event collections and TTL caches.

mod event_cache;
mod ttl;

pub use event_cache::{EventCache, LoadState};
pub use ttl::{CacheAside, TtlCache};
