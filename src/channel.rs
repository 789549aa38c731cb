//! One-way messages from the application to the proxy, and the poller that
//! tells the application when a new proxy version is waiting.
//!
//! Messages are fire-and-forget. There is no reply channel; an application
//! that needs confirmation polls [`ProxyHandle::status`]. A request/response
//! handshake would be a new message kind, not a change to these two.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::proxy::{CacheVersion, ProxyHandle};

/// Wire form: `{"type":"INVALIDATE_CACHE","cacheName":"..."}` or
/// `{"type":"SKIP_WAITING"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMessage {
  /// Delete the named partition, or every partition when no name is given
  InvalidateCache {
    #[serde(
      rename = "cacheName",
      default,
      skip_serializing_if = "Option::is_none"
    )]
    cache_name: Option<String>,
  },
  /// Activate the waiting version now instead of after its clients close
  SkipWaiting,
}

impl ChannelMessage {
  pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(raw)
  }

  pub fn to_json(&self) -> String {
    // A two-variant enum of strings cannot fail to serialize
    serde_json::to_string(self).unwrap_or_default()
  }
}

/// Periodically checks the proxy for a waiting version.
pub struct UpdateWatcher;

impl UpdateWatcher {
  /// Poll every `every`. The receiver holds the waiting version, if any.
  /// The task stops once the proxy is gone or every receiver is dropped.
  pub fn spawn(
    handle: ProxyHandle,
    every: Duration,
  ) -> (watch::Receiver<Option<CacheVersion>>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(None);

    let task = tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      loop {
        interval.tick().await;
        if tx.is_closed() {
          break;
        }

        let waiting = match handle.status().await {
          Ok(status) => status.waiting,
          Err(e) => {
            debug!(error = %e, "update check failed, stopping watcher");
            break;
          }
        };

        tx.send_if_modified(|current| {
          if *current == waiting {
            return false;
          }
          if let Some(version) = &waiting {
            info!(%version, "proxy update waiting");
          }
          *current = waiting;
          true
        });
      }
    });

    (rx, task)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::proxy::{PartitionStore, ProxyRuntime, WorkerOptions};
  use crate::testing::ScriptedNetwork;
  use std::sync::Arc;
  use url::Url;

  #[test]
  fn test_wire_format() {
    let named = ChannelMessage::InvalidateCache {
      cache_name: Some("app-media-v1".into()),
    };
    assert_eq!(
      named.to_json(),
      r#"{"type":"INVALIDATE_CACHE","cacheName":"app-media-v1"}"#
    );
    assert_eq!(
      ChannelMessage::InvalidateCache { cache_name: None }.to_json(),
      r#"{"type":"INVALIDATE_CACHE"}"#
    );
    assert_eq!(ChannelMessage::SkipWaiting.to_json(), r#"{"type":"SKIP_WAITING"}"#);
  }

  #[test]
  fn test_parse() {
    assert_eq!(
      ChannelMessage::from_json(r#"{"type":"INVALIDATE_CACHE"}"#).unwrap(),
      ChannelMessage::InvalidateCache { cache_name: None }
    );
    assert_eq!(
      ChannelMessage::from_json(r#"{"type":"SKIP_WAITING"}"#).unwrap(),
      ChannelMessage::SkipWaiting
    );
    assert!(ChannelMessage::from_json(r#"{"type":"RELOAD"}"#).is_err());
    assert!(ChannelMessage::from_json(r#"{"cacheName":"x"}"#).is_err());
  }

  fn options(version: &str) -> WorkerOptions {
    WorkerOptions {
      version: CacheVersion::new(version),
      cache_prefix: "app".into(),
      media_hosts: Vec::new(),
      api_base: Url::parse("https://api.test/").unwrap(),
      bootstrap: Vec::new(),
    }
  }

  #[tokio::test]
  async fn test_watcher_reports_waiting_version() {
    let handle = ProxyRuntime::spawn(
      Arc::new(PartitionStore::in_memory()),
      Arc::new(ScriptedNetwork::new()),
    );
    handle.register(options("v1"));
    handle.ready().await.unwrap();
    let _client = handle.connect().await.unwrap();

    let (mut updates, _task) = UpdateWatcher::spawn(handle.clone(), Duration::from_millis(10));
    handle.register(options("v2"));

    let waiting = tokio::time::timeout(
      Duration::from_secs(2),
      updates.wait_for(|v| v.is_some()),
    )
    .await
    .expect("watcher should see the waiting version")
    .unwrap()
    .clone();

    assert_eq!(waiting, Some(CacheVersion::new("v2")));
  }
}
