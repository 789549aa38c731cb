//! In-process network double for tests.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FetchError;
use crate::proxy::{Network, ProxyRequest, ProxyResponse};

/// Answers requests from a table keyed by request identity. Unknown
/// requests get a 404. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedNetwork {
  inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
  responses: Mutex<HashMap<String, ProxyResponse>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
  calls: Mutex<Vec<ProxyRequest>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, method: &str, url: &str, status: u16, body: impl Into<Vec<u8>>) {
    let identity = format!("{} {}", method, url);
    self
      .inner
      .responses
      .lock()
      .unwrap()
      .insert(identity, ProxyResponse::new(status, body));
  }

  pub fn respond_json(&self, method: &str, url: &str, status: u16, body: serde_json::Value) {
    self.respond(method, url, status, body.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.inner.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Option<Duration>) {
    *self.inner.delay.lock().unwrap() = delay;
  }

  /// Every request that reached the network, in order.
  pub fn calls(&self) -> Vec<ProxyRequest> {
    self.inner.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, identity: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|r| r.identity() == identity)
      .count()
  }
}

impl Network for ScriptedNetwork {
  fn fetch(&self, request: ProxyRequest) -> BoxFuture<'static, Result<ProxyResponse, FetchError>> {
    let inner = Arc::clone(&self.inner);

    Box::pin(async move {
      inner.calls.lock().unwrap().push(request.clone());

      let delay = *inner.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }

      if inner.offline.load(Ordering::SeqCst) {
        return Err(FetchError::Network("connection refused".into()));
      }

      let response = inner
        .responses
        .lock()
        .unwrap()
        .get(&request.identity())
        .cloned()
        .unwrap_or_else(|| ProxyResponse::new(404, "not found"));
      Ok(response)
    })
  }
}
