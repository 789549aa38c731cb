/// Schema for the structured client store.
pub const STORE_SCHEMA: &str = r#"
-- One row per cache entry (payload is serialized JSON)
CREATE TABLE IF NOT EXISTS client_store (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

/// Schema for the request proxy's partitions.
pub const PROXY_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named partitions, including empty ones
CREATE TABLE IF NOT EXISTS proxy_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request identity hash
CREATE TABLE IF NOT EXISTS proxy_entries (
    partition TEXT NOT NULL,
    request_key TEXT NOT NULL,
    identity TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, request_key),
    FOREIGN KEY (partition) REFERENCES proxy_partitions(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_proxy_entries_partition ON proxy_entries(partition);
"#;
