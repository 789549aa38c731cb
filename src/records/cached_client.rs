//! Cached records client that wraps RestApi with read-through caching and
//! write invalidation.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

use super::cache::CacheKey;
use super::client::RestApi;
use super::types::{ListScope, Record, SyncState, UploadRequest, UploadTicket, Updated};
use crate::error::ApiError;
use crate::event::{Notice, NoticeSender};
use crate::store::ClientStore;

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Live entry from the client store
  Cache,
}

/// Result of a cached read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Records client with transparent caching.
///
/// Reads consult the client store before the network. Writes always hit the
/// network and invalidate whatever they made stale. A read whose key was
/// invalidated while it was in flight returns its data but does not cache
/// it. Clones share that bookkeeping.
#[derive(Clone)]
pub struct CachedRecordClient {
  inner: RestApi,
  store: Arc<ClientStore>,
  notices: Option<NoticeSender>,
  /// Invalidation count per key
  generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl CachedRecordClient {
  pub fn new(inner: RestApi, store: Arc<ClientStore>) -> Self {
    Self {
      inner,
      store,
      notices: None,
      generations: Arc::default(),
    }
  }

  /// Escalate create/delete failures on `notices`.
  pub fn with_notices(mut self, notices: NoticeSender) -> Self {
    self.notices = Some(notices);
    self
  }

  pub fn store(&self) -> &ClientStore {
    &self.store
  }

  /// All records, from the list projection when it is live.
  pub async fn list(&self) -> Result<CacheResult<Vec<Record>>, ApiError> {
    self
      .read_through(&CacheKey::List, || self.inner.list())
      .await
  }

  /// Filtered records. Never cached.
  pub async fn list_scoped(&self, scope: &ListScope) -> Result<Vec<Record>, ApiError> {
    self.inner.list_scoped(scope).await
  }

  /// One record by id.
  pub async fn get(&self, id: &str) -> Result<CacheResult<Record>, ApiError> {
    self
      .read_through(&CacheKey::entity(id), || self.inner.get(id))
      .await
  }

  /// Create a record. The list projection is stale afterwards; the new
  /// record is not cached until someone reads it.
  pub async fn create(&self, fields: Map<String, Value>) -> Result<Record, ApiError> {
    match self.inner.create(&fields).await {
      Ok(record) => {
        self.invalidate(&[CacheKey::List]).await;
        Ok(record)
      }
      Err(e) => {
        error!(error = %e, "create failed");
        self.notify(Notice::CreateFailed {
          reason: e.to_string(),
        });
        Err(e)
      }
    }
  }

  /// Update a record. This never fails: if the server rejects the update or
  /// cannot be reached, the result is assembled from `id` and `updates` and
  /// marked [`SyncState::Unsynced`]. Either way the entity and list entries
  /// are invalidated so the next read goes to the server.
  pub async fn update(&self, id: &str, mut updates: Map<String, Value>) -> Updated {
    let result = self.inner.update(id, &updates).await;
    self
      .invalidate(&[CacheKey::entity(id), CacheKey::List])
      .await;

    match result {
      Ok(record) => Updated {
        record,
        sync: SyncState::Confirmed,
      },
      Err(e) => {
        warn!(id, status = ?e.status(), error = %e, "update not applied by server, continuing optimistically");
        // The path id is authoritative
        updates.remove("id");
        Updated {
          record: Record::new(id, updates),
          sync: SyncState::Unsynced,
        }
      }
    }
  }

  /// Delete a record and drop both its entry and the list projection.
  pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
    match self.inner.delete(id).await {
      Ok(()) => {
        self
          .invalidate(&[CacheKey::entity(id), CacheKey::List])
          .await;
        Ok(())
      }
      Err(e) => {
        error!(id, error = %e, "delete failed");
        self.notify(Notice::DeleteFailed {
          id: id.to_string(),
          reason: e.to_string(),
        });
        Err(e)
      }
    }
  }

  /// Upload locations are single-use and never cached.
  pub async fn request_upload_url(&self, upload: &UploadRequest) -> Result<UploadTicket, ApiError> {
    self.inner.request_upload_url(upload).await
  }

  /// Check the store first; on a miss fetch, store, and return.
  async fn read_through<T, F, Fut>(&self, key: &CacheKey, fetcher: F) -> Result<CacheResult<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    if let Some(cached) = self.store.entry::<T>(key.as_str()).await {
      debug!(%key, "client store hit");
      return Ok(CacheResult::from_cache(cached.data, cached.timestamp));
    }

    debug!(%key, "client store miss, fetching");
    let started = self.generation(key);
    let data = fetcher().await?;

    if self.generation(key) == started {
      self.store.put(key.as_str(), &data).await;
      // An invalidation that landed during the put must still win
      if self.generation(key) != started {
        self.store.delete(key.as_str()).await;
      }
    } else {
      debug!(%key, "invalidated while fetching, not caching");
    }

    Ok(CacheResult::from_network(data))
  }

  fn generation(&self, key: &CacheKey) -> u64 {
    let generations = self.generations.lock().unwrap_or_else(|e| e.into_inner());
    generations.get(key.as_str()).copied().unwrap_or(0)
  }

  async fn invalidate(&self, keys: &[CacheKey]) {
    {
      let mut generations = self.generations.lock().unwrap_or_else(|e| e.into_inner());
      for key in keys {
        *generations.entry(key.as_str().to_string()).or_default() += 1;
      }
    }
    for key in keys {
      self.store.delete(key.as_str()).await;
    }
    debug!(?keys, "invalidated");
  }

  fn notify(&self, notice: Notice) {
    if let Some(tx) = &self.notices {
      let _ = tx.send(notice);
    }
  }
}
