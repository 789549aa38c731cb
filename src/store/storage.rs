//! SQLite-backed client store with per-entry expiry.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use crate::db::{schema::STORE_SCHEMA, Database, Location};
use crate::error::StoreError;

/// A cached payload together with its lifetime.
///
/// `expires_at` is always `timestamp + ttl` of the write that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub key: String,
  pub data: T,
  pub timestamp: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Persistent key/value store with TTL expiry.
///
/// Every operation is infallible from the caller's point of view: a storage
/// failure is logged and the store answers as if it were empty.
pub struct ClientStore {
  /// `None` when caching is disabled
  db: Option<Database>,
  clock: Arc<dyn Clock>,
  default_ttl: Duration,
}

impl ClientStore {
  /// Store backed by the database at `location`, opened on first use.
  pub fn open(location: Location) -> Self {
    Self {
      db: Some(Database::new(location, STORE_SCHEMA)),
      clock: Arc::new(SystemClock),
      default_ttl: Duration::minutes(5),
    }
  }

  pub fn in_memory() -> Self {
    Self::open(Location::Memory)
  }

  /// Store that never holds anything. Every read is a miss.
  pub fn disabled() -> Self {
    Self {
      db: None,
      clock: Arc::new(SystemClock),
      default_ttl: Duration::minutes(5),
    }
  }

  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Look up a live payload. Expired entries are deleted on the way out.
  pub async fn get<T>(&self, key: &str) -> Option<T>
  where
    T: DeserializeOwned + Send + 'static,
  {
    self.entry(key).await.map(|entry| entry.data)
  }

  /// Like [`get`](Self::get) but returns the whole entry.
  pub async fn entry<T>(&self, key: &str) -> Option<CacheEntry<T>>
  where
    T: DeserializeOwned + Send + 'static,
  {
    match self.try_entry(key).await {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "client store read failed, treating as miss");
        None
      }
    }
  }

  /// Store `data` under `key` with the default TTL.
  pub async fn put<T: Serialize + ?Sized>(&self, key: &str, data: &T) {
    self.put_with_ttl(key, data, self.default_ttl).await
  }

  /// Store `data` under `key`, replacing any previous entry and its expiry.
  pub async fn put_with_ttl<T: Serialize + ?Sized>(&self, key: &str, data: &T, ttl: Duration) {
    if let Err(e) = self.try_put(key, data, ttl).await {
      warn!(key, error = %e, "client store write failed");
    }
  }

  /// Remove `key`. Removing a missing key is not an error.
  pub async fn delete(&self, key: &str) {
    let Some(db) = &self.db else { return };
    let owned = key.to_string();

    let result = db
      .run(move |conn| {
        conn.execute("DELETE FROM client_store WHERE key = ?", params![owned])?;
        Ok(())
      })
      .await;

    if let Err(e) = result {
      warn!(key, error = %e, "client store delete failed");
    }
  }

  /// Drop every entry.
  pub async fn clear(&self) {
    let Some(db) = &self.db else { return };

    let result = db
      .run(|conn| {
        conn.execute("DELETE FROM client_store", [])?;
        Ok(())
      })
      .await;

    if let Err(e) = result {
      warn!(error = %e, "client store clear failed");
    }
  }

  /// Whether a row for `key` physically exists, expired or not.
  pub async fn contains_raw(&self, key: &str) -> bool {
    let Some(db) = &self.db else { return false };
    let key = key.to_string();

    db.run(move |conn| {
      let found = conn
        .query_row(
          "SELECT 1 FROM client_store WHERE key = ?",
          params![key],
          |_| Ok(()),
        )
        .optional()?;
      Ok(found.is_some())
    })
    .await
    .unwrap_or(false)
  }

  /// Number of physically stored rows, expired ones included.
  pub async fn len(&self) -> usize {
    let Some(db) = &self.db else { return 0 };

    db.run(|conn| {
      let count: i64 = conn.query_row("SELECT COUNT(*) FROM client_store", [], |row| row.get(0))?;
      Ok(count as usize)
    })
    .await
    .unwrap_or(0)
  }

  async fn try_entry<T>(&self, key: &str) -> Result<Option<CacheEntry<T>>, StoreError>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let Some(db) = &self.db else { return Ok(None) };
    let now = self.clock.now();
    let key = key.to_string();

    db.run(move |conn| {
      let row: Option<(Vec<u8>, i64, i64)> = conn
        .query_row(
          "SELECT data, timestamp, expires_at FROM client_store WHERE key = ?",
          params![key],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

      let Some((data, timestamp, expires_at)) = row else {
        return Ok(None);
      };

      let expires_at = from_millis(expires_at);
      if now >= expires_at {
        // Check and delete run under the same connection lock, so a put
        // racing with this read is never deleted by it.
        conn.execute("DELETE FROM client_store WHERE key = ?", params![key])?;
        debug!(key = %key, %expires_at, "entry expired, evicted");
        return Ok(None);
      }

      let data: T = serde_json::from_slice(&data)?;
      Ok(Some(CacheEntry {
        key,
        data,
        timestamp: from_millis(timestamp),
        expires_at,
      }))
    })
    .await
  }

  async fn try_put<T: Serialize + ?Sized>(
    &self,
    key: &str,
    data: &T,
    ttl: Duration,
  ) -> Result<(), StoreError> {
    let Some(db) = &self.db else { return Ok(()) };
    let bytes = serde_json::to_vec(data)?;
    let timestamp = self.clock.now();
    // A TTL past the end of representable time never expires
    let expires_at = timestamp
      .checked_add_signed(ttl)
      .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let key = key.to_string();

    db.run(move |conn| {
      conn.execute(
        "INSERT OR REPLACE INTO client_store (key, data, timestamp, expires_at)
         VALUES (?, ?, ?, ?)",
        params![
          key,
          bytes,
          timestamp.timestamp_millis(),
          expires_at.timestamp_millis()
        ],
      )?;
      Ok(())
    })
    .await
  }
}

/// Out-of-range timestamps decode to the epoch, which reads as expired.
fn from_millis(ms: i64) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
