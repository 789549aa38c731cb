//! Structured client store.
//!
//! A persistent key/value table where every entry carries its own expiry:
//! - Payloads are serialized JSON, so any serde type can be stored
//! - Expired entries are deleted when read, never served
//! - Storage failures are logged and read as misses

mod clock;
mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use storage::{CacheEntry, ClientStore};
