//! Named byte-level response caches ("partitions") owned by the proxy.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;

use super::request::{ProxyRequest, ProxyResponse};
use super::router::PartitionClass;
use crate::db::{schema::PROXY_SCHEMA, Database, Location};
use crate::error::StoreError;

/// Version tag embedded in every partition name.
///
/// Tags order naturally: runs of digits compare as numbers, so `v2 < v10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVersion(String);

impl CacheVersion {
  pub fn new(tag: impl Into<String>) -> Self {
    Self(tag.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Ord for CacheVersion {
  fn cmp(&self, other: &Self) -> Ordering {
    let mut left = chunks(&self.0);
    let mut right = chunks(&other.0);
    loop {
      match (left.next(), right.next()) {
        (None, None) => return self.0.cmp(&other.0),
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => {
          let ord = compare_chunk(a, b);
          if ord != Ordering::Equal {
            return ord;
          }
        }
      }
    }
  }
}

impl PartialOrd for CacheVersion {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Split into alternating digit and non-digit runs.
fn chunks(tag: &str) -> impl Iterator<Item = &str> {
  let mut rest = tag;
  std::iter::from_fn(move || {
    let first = rest.chars().next()?;
    let digits = first.is_ascii_digit();
    let end = rest
      .find(|c: char| c.is_ascii_digit() != digits)
      .unwrap_or(rest.len());
    let (chunk, tail) = rest.split_at(end);
    rest = tail;
    Some(chunk)
  })
}

fn compare_chunk(a: &str, b: &str) -> Ordering {
  let numeric = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
  if numeric(a) && numeric(b) {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
  } else {
    a.cmp(b)
  }
}

impl fmt::Display for CacheVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Partition naming scheme for one version: `{prefix}-{class}-{version}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  prefix: String,
  version: CacheVersion,
}

impl PartitionNames {
  pub fn new(prefix: impl Into<String>, version: CacheVersion) -> Self {
    Self {
      prefix: prefix.into(),
      version,
    }
  }

  pub fn name(&self, class: PartitionClass) -> String {
    format!("{}-{}-{}", self.prefix, class.as_str(), self.version)
  }

  pub fn all(&self) -> Vec<String> {
    PartitionClass::ALL.iter().map(|c| self.name(*c)).collect()
  }
}

/// SQLite-backed partition storage.
pub struct PartitionStore {
  db: Database,
}

impl PartitionStore {
  pub fn open(location: Location) -> Self {
    Self {
      db: Database::new(location, PROXY_SCHEMA),
    }
  }

  pub fn in_memory() -> Self {
    Self::open(Location::Memory)
  }

  /// Create the partition if it does not exist yet.
  pub async fn ensure(&self, partition: &str) -> Result<(), StoreError> {
    let partition = partition.to_string();

    self
      .db
      .run(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO proxy_partitions (name) VALUES (?)",
          params![partition],
        )?;
        Ok(())
      })
      .await
  }

  /// Stored response for `request` in `partition`, if any.
  pub async fn lookup(
    &self,
    partition: &str,
    request: &ProxyRequest,
  ) -> Result<Option<ProxyResponse>, StoreError> {
    let partition = partition.to_string();
    let key = request_key(&request.identity());

    self
      .db
      .run(move |conn| {
        let row: Option<(u16, String, Vec<u8>)> = conn
          .query_row(
            "SELECT status, headers, body FROM proxy_entries
             WHERE partition = ? AND request_key = ?",
            params![partition, key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()?;

        match row {
          Some((status, headers, body)) => Ok(Some(ProxyResponse {
            status,
            headers: serde_json::from_str(&headers)?,
            body,
          })),
          None => Ok(None),
        }
      })
      .await
  }

  /// Store (or replace) the response for `request` in `partition`.
  pub async fn put(
    &self,
    partition: &str,
    request: &ProxyRequest,
    response: &ProxyResponse,
  ) -> Result<(), StoreError> {
    let partition = partition.to_string();
    let identity = request.identity();
    let key = request_key(&identity);
    let headers = serde_json::to_string(&response.headers)?;
    let status = response.status;
    let body = response.body.clone();

    self
      .db
      .run(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO proxy_partitions (name) VALUES (?)",
          params![partition],
        )?;
        tx.execute(
          "INSERT OR REPLACE INTO proxy_entries
             (partition, request_key, identity, status, headers, body, stored_at)
           VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
          params![partition, key, identity, status, headers, body],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  /// Delete a partition and everything in it. Returns whether it existed.
  pub async fn delete(&self, partition: &str) -> Result<bool, StoreError> {
    let partition = partition.to_string();

    self
      .db
      .run(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM proxy_entries WHERE partition = ?",
          params![partition],
        )?;
        let removed = tx.execute(
          "DELETE FROM proxy_partitions WHERE name = ?",
          params![partition],
        )?;
        tx.commit()?;
        Ok(removed > 0)
      })
      .await
  }

  /// Names of every partition, in name order.
  pub async fn names(&self) -> Result<Vec<String>, StoreError> {
    self
      .db
      .run(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM proxy_partitions ORDER BY name")?;
        let names = stmt
          .query_map([], |row| row.get(0))?
          .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
      })
      .await
  }

  /// Delete every partition whose name is not in `keep`. Returns the
  /// deleted names.
  pub async fn retain(&self, keep: &[String]) -> Result<Vec<String>, StoreError> {
    let mut deleted = Vec::new();

    for name in self.names().await? {
      if !keep.contains(&name) && self.delete(&name).await? {
        deleted.push(name);
      }
    }

    Ok(deleted)
  }

  /// Delete every partition. Returns how many there were.
  pub async fn clear(&self) -> Result<usize, StoreError> {
    self
      .db
      .run(|conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM proxy_entries", [])?;
        let removed = tx.execute("DELETE FROM proxy_partitions", [])?;
        tx.commit()?;
        Ok(removed)
      })
      .await
  }

  /// Number of stored responses in `partition`.
  pub async fn entry_count(&self, partition: &str) -> Result<usize, StoreError> {
    let partition = partition.to_string();

    self
      .db
      .run(move |conn| {
        let count: i64 = conn.query_row(
          "SELECT COUNT(*) FROM proxy_entries WHERE partition = ?",
          params![partition],
          |row| row.get(0),
        )?;
        Ok(count as usize)
      })
      .await
  }
}

/// SHA256 of the request identity, for stable fixed-length keys.
fn request_key(identity: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(identity.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(s: &str) -> ProxyRequest {
    ProxyRequest::get(Url::parse(s).unwrap())
  }

  #[test]
  fn test_partition_names_embed_version() {
    let names = PartitionNames::new("app", CacheVersion::new("v3"));
    assert_eq!(names.name(PartitionClass::Media), "app-media-v3");
    assert_eq!(
      names.all(),
      vec!["app-media-v3", "app-api-v3", "app-static-v3"]
    );
  }

  #[test]
  fn test_versions_order_naturally() {
    let v = CacheVersion::new;
    assert!(v("v2") < v("v10"));
    assert!(v("v1.9") < v("v1.10"));
    assert!(v("v0") < v("v2"));
    assert!(v("2024-01-09") < v("2024-01-10"));
    assert!(v("v1") < v("v1a"));
    assert_ne!(v("v01").cmp(&v("v1")), Ordering::Equal);
  }

  #[test]
  fn test_request_key_is_stable_hex() {
    let a = request_key("GET https://x.test/a");
    assert_eq!(a.len(), 64);
    assert_eq!(a, request_key("GET https://x.test/a"));
    assert_ne!(a, request_key("GET https://x.test/b"));
  }

  #[tokio::test]
  async fn test_put_and_lookup() {
    let store = PartitionStore::in_memory();
    let request = get("https://media.test/a.png");
    let mut response = ProxyResponse::new(200, vec![1, 2, 3]);
    response.headers.push(("content-type".into(), "image/png".into()));

    store.put("p", &request, &response).await.unwrap();

    assert_eq!(store.lookup("p", &request).await.unwrap(), Some(response));
    assert_eq!(store.lookup("other", &request).await.unwrap(), None);
    assert_eq!(
      store.lookup("p", &get("https://media.test/b.png")).await.unwrap(),
      None
    );
  }

  #[tokio::test]
  async fn test_put_replaces_in_place() {
    let store = PartitionStore::in_memory();
    let request = get("https://app.test/main.css");

    store.put("p", &request, &ProxyResponse::new(200, "old")).await.unwrap();
    store.put("p", &request, &ProxyResponse::new(200, "new")).await.unwrap();

    assert_eq!(store.entry_count("p").await.unwrap(), 1);
    assert_eq!(
      store.lookup("p", &request).await.unwrap().unwrap().text(),
      "new"
    );
  }

  #[tokio::test]
  async fn test_delete_partition() {
    let store = PartitionStore::in_memory();
    let request = get("https://app.test/");
    store.put("a", &request, &ProxyResponse::new(200, "x")).await.unwrap();
    store.put("b", &request, &ProxyResponse::new(200, "y")).await.unwrap();

    assert!(store.delete("a").await.unwrap());
    assert!(!store.delete("a").await.unwrap());

    assert_eq!(store.names().await.unwrap(), vec!["b"]);
    assert_eq!(store.lookup("a", &request).await.unwrap(), None);
    assert!(store.lookup("b", &request).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_retain_sweeps_other_versions() {
    let store = PartitionStore::in_memory();
    let old = PartitionNames::new("app", CacheVersion::new("v1"));
    let new = PartitionNames::new("app", CacheVersion::new("v2"));
    for name in old.all().iter().chain(new.all().iter()) {
      store.ensure(name).await.unwrap();
    }
    store.ensure("unrelated").await.unwrap();

    let mut deleted = store.retain(&new.all()).await.unwrap();
    deleted.sort();

    assert_eq!(
      deleted,
      vec!["app-api-v1", "app-media-v1", "app-static-v1", "unrelated"]
    );
    let mut remaining = store.names().await.unwrap();
    remaining.sort();
    let mut expected = new.all();
    expected.sort();
    assert_eq!(remaining, expected);
  }

  #[tokio::test]
  async fn test_clear_removes_all_partitions() {
    let store = PartitionStore::in_memory();
    store.ensure("a").await.unwrap();
    store.put("b", &get("https://x.test/"), &ProxyResponse::new(200, "")).await.unwrap();

    assert_eq!(store.clear().await.unwrap(), 2);
    assert!(store.names().await.unwrap().is_empty());
    assert_eq!(store.entry_count("b").await.unwrap(), 0);
  }
}
