pub mod cache;

pub use cache::{CacheEntry, CacheStore, InMemoryCacheStore, RedbCacheStore};
