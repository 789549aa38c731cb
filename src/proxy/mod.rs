//! Request-intercepting proxy.
//!
//! Every outgoing request from the application is routed through here. The
//! proxy:
//! - Classifies each request into a partition (media, api, static)
//! - Applies that partition's strategy (cache-first, network-first,
//!   stale-while-revalidate)
//! - Keeps partitions in its own database, named per version so that
//!   activating a new version sweeps the old ones

mod partitions;
mod request;
mod router;
mod runtime;
mod strategy;
mod worker;

pub use partitions::{CacheVersion, PartitionNames, PartitionStore};
pub use request::{HttpNetwork, Network, ProxyRequest, ProxyResponse};
pub use router::{Matcher, PartitionClass, Router, Strategy};
pub use runtime::{ClientId, ProxyClient, ProxyHandle, ProxyRuntime, RegistrationStatus};
pub use worker::{InstallReport, Lifecycle, Worker, WorkerOptions};
