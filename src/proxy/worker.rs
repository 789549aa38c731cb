//! One version of the proxy: its routing table, partitions and lifecycle.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::partitions::{CacheVersion, PartitionNames, PartitionStore};
use super::request::{Network, ProxyRequest, ProxyResponse};
use super::router::{PartitionClass, Router, Strategy};
use super::strategy;
use crate::error::FetchError;

/// Lifecycle of a proxy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Pre-caching the bootstrap assets
  Installing,
  /// Installed, but an older version still controls open clients
  Waiting,
  /// Sweeping stale partitions and claiming clients
  Activating,
  /// Intercepting requests
  Active,
  /// Superseded by a newer version
  Redundant,
}

/// Everything needed to build a worker for one version.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  pub version: CacheVersion,
  pub cache_prefix: String,
  pub media_hosts: Vec<String>,
  pub api_base: Url,
  /// Assets fetched into the default partition during install
  pub bootstrap: Vec<Url>,
}

/// Outcome of the install phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  pub failed: Vec<Url>,
}

pub struct Worker {
  version: CacheVersion,
  names: PartitionNames,
  router: Router,
  bootstrap: Vec<Url>,
  cache: Arc<PartitionStore>,
  network: Arc<dyn Network>,
}

impl Worker {
  pub fn new(options: WorkerOptions, cache: Arc<PartitionStore>, network: Arc<dyn Network>) -> Self {
    let router = Router::standard(&options.media_hosts, &options.api_base);
    let names = PartitionNames::new(options.cache_prefix, options.version.clone());

    Self {
      version: options.version,
      names,
      router,
      bootstrap: options.bootstrap,
      cache,
      network,
    }
  }

  pub fn version(&self) -> &CacheVersion {
    &self.version
  }

  pub fn partition_name(&self, class: PartitionClass) -> String {
    self.names.name(class)
  }

  /// Pre-cache the bootstrap assets. A failing asset is logged and skipped.
  pub async fn install(&self) -> InstallReport {
    let partition = self.partition_name(PartitionClass::Static);
    for name in self.names.all() {
      if let Err(e) = self.cache.ensure(&name).await {
        warn!(partition = %name, error = %e, "failed to create partition");
      }
    }

    let fetches = self.bootstrap.iter().map(|url| {
      let request = ProxyRequest::get(url.clone());
      let partition = partition.as_str();
      async move {
        match self.network.fetch(request.clone()).await {
          Ok(response) if response.is_success() => {
            match self.cache.put(partition, &request, &response).await {
              Ok(()) => Ok(()),
              Err(e) => Err(e.to_string()),
            }
          }
          Ok(response) => Err(format!("status {}", response.status)),
          Err(e) => Err(e.to_string()),
        }
      }
    });

    let mut report = InstallReport::default();
    for (url, result) in self.bootstrap.iter().zip(join_all(fetches).await) {
      match result {
        Ok(()) => report.cached += 1,
        Err(reason) => {
          warn!(%url, %reason, "bootstrap asset not cached");
          report.failed.push(url.clone());
        }
      }
    }

    info!(
      version = %self.version,
      cached = report.cached,
      failed = report.failed.len(),
      "install finished"
    );
    report
  }

  /// Delete every partition that does not belong to this version.
  pub async fn sweep(&self) -> Vec<String> {
    match self.cache.retain(&self.names.all()).await {
      Ok(deleted) => {
        if !deleted.is_empty() {
          info!(version = %self.version, ?deleted, "swept stale partitions");
        }
        deleted
      }
      Err(e) => {
        warn!(version = %self.version, error = %e, "partition sweep failed");
        Vec::new()
      }
    }
  }

  /// Delete one partition by name, or all of them.
  pub async fn invalidate(&self, partition: Option<&str>) {
    let result = match partition {
      Some(name) => self.cache.delete(name).await.map(usize::from),
      None => self.cache.clear().await,
    };

    match result {
      Ok(removed) => info!(partition = ?partition, removed, "partitions invalidated"),
      Err(e) => warn!(partition = ?partition, error = %e, "invalidation failed"),
    }
  }

  /// Route one intercepted request through its partition's strategy.
  pub async fn handle(self: Arc<Self>, request: ProxyRequest) -> Result<ProxyResponse, FetchError> {
    let class = self.router.classify(&request.url);
    let partition = self.partition_name(class);
    debug!(method = %request.method, url = %request.url, %partition, "intercepted");

    match class.strategy() {
      Strategy::CacheFirst => {
        strategy::cache_first(&self.cache, self.network.as_ref(), &partition, request).await
      }
      Strategy::NetworkFirst => {
        strategy::network_first(&self.cache, self.network.as_ref(), &partition, request).await
      }
      Strategy::StaleWhileRevalidate => {
        strategy::stale_while_revalidate(
          Arc::clone(&self.cache),
          Arc::clone(&self.network),
          partition,
          request,
        )
        .await
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::ScriptedNetwork;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn options(version: &str, bootstrap: &[&str]) -> WorkerOptions {
    WorkerOptions {
      version: CacheVersion::new(version),
      cache_prefix: "app".into(),
      media_hosts: vec!["media.test".into()],
      api_base: url("https://api.test/"),
      bootstrap: bootstrap.iter().map(|s| url(s)).collect(),
    }
  }

  #[tokio::test]
  async fn test_install_tolerates_failed_assets() {
    let cache = Arc::new(PartitionStore::in_memory());
    let network = ScriptedNetwork::new();
    network.respond("GET", "https://app.test/index.html", 200, "<html>");
    network.respond("GET", "https://app.test/app.js", 500, "");

    let worker = Worker::new(
      options(
        "v1",
        &[
          "https://app.test/index.html",
          "https://app.test/app.js",
          "https://app.test/missing.css",
        ],
      ),
      cache.clone(),
      Arc::new(network),
    );
    let report = worker.install().await;

    assert_eq!(report.cached, 1);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(cache.entry_count("app-static-v1").await.unwrap(), 1);
    assert_eq!(cache.names().await.unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_handle_routes_by_class() {
    let cache = Arc::new(PartitionStore::in_memory());
    let network = ScriptedNetwork::new();
    network.respond("GET", "https://media.test/a.png", 200, "png");
    network.respond("GET", "https://api.test/records", 200, "[]");

    let worker = Arc::new(Worker::new(options("v1", &[]), cache.clone(), Arc::new(network)));
    worker
      .clone()
      .handle(ProxyRequest::get(url("https://media.test/a.png")))
      .await
      .unwrap();
    worker
      .clone()
      .handle(ProxyRequest::get(url("https://api.test/records")))
      .await
      .unwrap();

    assert_eq!(cache.entry_count("app-media-v1").await.unwrap(), 1);
    assert_eq!(cache.entry_count("app-api-v1").await.unwrap(), 1);
    assert_eq!(cache.entry_count("app-static-v1").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_sweep_keeps_only_own_partitions() {
    let cache = Arc::new(PartitionStore::in_memory());
    let network: Arc<dyn Network> = Arc::new(ScriptedNetwork::new());

    let old = Worker::new(options("v1", &[]), cache.clone(), network.clone());
    old.install().await;
    let new = Worker::new(options("v2", &[]), cache.clone(), network);
    new.install().await;

    let mut swept = new.sweep().await;
    swept.sort();

    assert_eq!(swept, vec!["app-api-v1", "app-media-v1", "app-static-v1"]);
    assert!(cache.names().await.unwrap().iter().all(|n| n.ends_with("-v2")));
  }

  #[tokio::test]
  async fn test_invalidate_named_and_all() {
    let cache = Arc::new(PartitionStore::in_memory());
    let worker = Worker::new(options("v1", &[]), cache.clone(), Arc::new(ScriptedNetwork::new()));
    worker.install().await;

    worker.invalidate(Some("app-media-v1")).await;
    let names = cache.names().await.unwrap();
    assert_eq!(names, vec!["app-api-v1", "app-static-v1"]);

    worker.invalidate(None).await;
    assert!(cache.names().await.unwrap().is_empty());
  }
}
