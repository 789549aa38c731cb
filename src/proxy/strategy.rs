//! The three caching strategies a partition can run.
//!
//! Partition I/O errors never fail a request: a failed lookup is a miss and
//! a failed store is skipped.

use std::sync::Arc;
use tracing::{debug, warn};

use super::partitions::PartitionStore;
use super::request::{Network, ProxyRequest, ProxyResponse};
use crate::error::FetchError;

/// Serve from the partition when possible; otherwise fetch and keep a copy.
pub async fn cache_first(
  cache: &PartitionStore,
  network: &dyn Network,
  partition: &str,
  request: ProxyRequest,
) -> Result<ProxyResponse, FetchError> {
  if !request.is_read_only() {
    return network.fetch(request).await;
  }

  if let Some(hit) = lookup(cache, partition, &request).await {
    debug!(partition, url = %request.url, "cache-first hit");
    return Ok(hit);
  }

  let response = network.fetch(request.clone()).await?;
  if response.is_success() {
    store(cache, partition, &request, &response).await;
  }

  Ok(response)
}

/// Always try the network; fall back to the last stored copy when it fails.
pub async fn network_first(
  cache: &PartitionStore,
  network: &dyn Network,
  partition: &str,
  request: ProxyRequest,
) -> Result<ProxyResponse, FetchError> {
  if !request.is_read_only() {
    return network.fetch(request).await;
  }

  match network.fetch(request.clone()).await {
    Ok(response) => {
      if response.is_success() {
        store(cache, partition, &request, &response).await;
      }
      Ok(response)
    }
    Err(e) => match lookup(cache, partition, &request).await {
      Some(hit) => {
        warn!(partition, url = %request.url, error = %e, "network failed, serving last known copy");
        Ok(hit)
      }
      None => Err(e),
    },
  }
}

/// Answer from the partition immediately and refresh it in the background.
/// Without a stored copy the caller waits for the network.
pub async fn stale_while_revalidate(
  cache: Arc<PartitionStore>,
  network: Arc<dyn Network>,
  partition: String,
  request: ProxyRequest,
) -> Result<ProxyResponse, FetchError> {
  if !request.is_read_only() {
    return network.fetch(request).await;
  }

  let cached = lookup(&cache, &partition, &request).await;

  let url = request.url.clone();
  let revalidate = async move {
    let response = network.fetch(request.clone()).await?;
    if response.is_success() {
      store(&cache, &partition, &request, &response).await;
    }
    Ok::<_, FetchError>(response)
  };

  match cached {
    Some(hit) => {
      debug!(%url, "serving stale copy, revalidating in background");
      tokio::spawn(async move {
        if let Err(e) = revalidate.await {
          debug!(%url, error = %e, "background revalidation failed");
        }
      });
      Ok(hit)
    }
    None => revalidate.await,
  }
}

async fn lookup(
  cache: &PartitionStore,
  partition: &str,
  request: &ProxyRequest,
) -> Option<ProxyResponse> {
  match cache.lookup(partition, request).await {
    Ok(hit) => hit,
    Err(e) => {
      warn!(partition, error = %e, "partition lookup failed, treating as miss");
      None
    }
  }
}

async fn store(
  cache: &PartitionStore,
  partition: &str,
  request: &ProxyRequest,
  response: &ProxyResponse,
) {
  if let Err(e) = cache.put(partition, request, response).await {
    warn!(partition, error = %e, "failed to store response");
  }
}
