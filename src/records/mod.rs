//! Cache coordinator for the records API.
//!
//! [`RestApi`] talks to the server; [`CachedRecordClient`] wraps it with
//! read-through caching in the client store and invalidates on writes.

mod cache;
mod cached_client;
mod client;
mod types;

pub use cache::{CacheKey, LIST_KEY};
pub use cached_client::{CacheResult, CacheSource, CachedRecordClient};
pub use client::RestApi;
pub use types::{ListScope, Record, SyncState, UploadRequest, UploadTicket, Updated};
