//! Two-file on-disk content cache (§4.3).

mod store;

pub use store::{Cache, CacheStore, CleanupReport};
