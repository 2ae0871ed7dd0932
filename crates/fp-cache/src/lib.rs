//! # fp-cache
//!
//! Process-wide content cache for preview clips.
//!
//! This crate provides:
//!
//! - **[`ByteStore`]** -- durable byte storage keyed by a hashed URL, with a
//!   filesystem implementation ([`DiskByteStore`]) and an in-memory one
//!   ([`MemoryByteStore`]).
//! - **[`Fetcher`]** -- network retrieval; [`HttpFetcher`] issues
//!   range-capable HTTP GETs.
//! - **[`CacheLayer`]** -- size-bounded LRU cache interposed between the
//!   engine and the network. Storage failures degrade to direct fetches.
//! - **[`DataSource`]** -- what the playback engine reads from.

pub mod cache;
pub mod fetch;
pub mod source;
pub mod store;

pub use cache::{cache_key, CacheLayer, CacheStats};
pub use fetch::{ByteRange, Fetcher, HttpFetcher};
pub use source::DataSource;
pub use store::{ByteStore, DiskByteStore, MemoryByteStore, StoredEntry};
