//! Two-tier offline cache for a records API.
//!
//! The client store holds decoded records with a TTL; the request proxy sits
//! under every outbound request and keeps raw responses in versioned
//! partitions. The records coordinator ties the first tier to the API, and
//! the channel carries invalidation and update messages to the proxy.

pub mod channel;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod proxy;
pub mod records;
pub mod store;

#[cfg(test)]
mod testing;
