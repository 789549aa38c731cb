pub mod schema;

use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

use crate::error::StoreError;

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
  File(PathBuf),
  /// Private in-memory database, gone when the handle is dropped.
  Memory,
}

/// Lazily opened SQLite connection shared by one store.
///
/// The connection is opened on first use and kept for the life of the
/// handle. A failed open is not remembered, so the next call tries again.
pub struct Database {
  location: Location,
  schema: &'static str,
  conn: OnceCell<Arc<Mutex<Connection>>>,
}

impl Database {
  pub fn new(location: Location, schema: &'static str) -> Self {
    Self {
      location,
      schema,
      conn: OnceCell::new(),
    }
  }

  pub fn location(&self) -> &Location {
    &self.location
  }

  /// Run `f` against the connection on the blocking pool.
  pub async fn run<F, R>(&self, f: F) -> Result<R, StoreError>
  where
    F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
    R: Send + 'static,
  {
    let conn = self.connection().await?;

    tokio::task::spawn_blocking(move || {
      let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
      f(&mut guard)
    })
    .await?
  }

  async fn connection(&self) -> Result<Arc<Mutex<Connection>>, StoreError> {
    self
      .conn
      .get_or_try_init(|| {
        let location = self.location.clone();
        let schema = self.schema;
        async move {
          let conn = tokio::task::spawn_blocking(move || open(&location, schema)).await??;
          Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
        }
      })
      .await
      .cloned()
  }
}

/// Open (or create) the database and run migrations.
fn open(location: &Location, schema: &str) -> Result<Connection, StoreError> {
  let conn = match location {
    Location::Memory => Connection::open_in_memory()?,
    Location::File(path) => {
      // Ensure parent directory exists
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
          path: parent.to_path_buf(),
          source,
        })?;
      }

      Connection::open(path).map_err(|source| StoreError::Open {
        path: path.clone(),
        source,
      })?
    }
  };

  conn.execute_batch(schema)?;
  tracing::debug!(?location, "database opened");

  Ok(conn)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_opens_lazily_and_runs_schema() {
    let db = Database::new(Location::Memory, schema::STORE_SCHEMA);
    assert!(db.conn.get().is_none());

    let count: i64 = db
      .run(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM client_store", [], |row| row.get(0))?))
      .await
      .unwrap();

    assert_eq!(count, 0);
    assert!(db.conn.get().is_some());
  }

  #[tokio::test]
  async fn test_open_failure_is_retried() {
    let blocker = tempfile::NamedTempFile::new().unwrap();
    // Parent "directory" is a regular file, so the open always fails
    let path = blocker.path().join("store.db");
    let db = Database::new(Location::File(path), schema::STORE_SCHEMA);

    assert!(db.run(|_| Ok(())).await.is_err());
    assert!(db.conn.get().is_none());
    assert!(db.run(|_| Ok(())).await.is_err());
  }

  #[tokio::test]
  async fn test_file_database_persists_between_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");

    let first = Database::new(Location::File(path.clone()), schema::STORE_SCHEMA);
    first
      .run(|conn| {
        conn.execute(
          "INSERT INTO client_store (key, data, timestamp, expires_at) VALUES ('a', x'00', 0, 1)",
          [],
        )?;
        Ok(())
      })
      .await
      .unwrap();

    let second = Database::new(Location::File(path), schema::STORE_SCHEMA);
    let count: i64 = second
      .run(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM client_store", [], |row| row.get(0))?))
      .await
      .unwrap();
    assert_eq!(count, 1);
  }
}
