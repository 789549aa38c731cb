//! The proxy's own execution context.
//!
//! A single task owns the registration (which version is active, which is
//! waiting, which clients are open). The application only talks to it
//! through [`ProxyHandle`] and [`ProxyClient`], which post envelopes on a
//! channel. Intercepted fetches are spawned so they run concurrently.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::partitions::{CacheVersion, PartitionStore};
use super::request::{Network, ProxyRequest, ProxyResponse};
use super::worker::{InstallReport, Lifecycle, Worker, WorkerOptions};
use crate::channel::ChannelMessage;
use crate::error::FetchError;

pub type ClientId = u64;

enum Envelope {
  Register(WorkerOptions),
  Connect(oneshot::Sender<ClientId>),
  Disconnect(ClientId),
  Fetch {
    request: ProxyRequest,
    reply: oneshot::Sender<Result<ProxyResponse, FetchError>>,
  },
  Message(ChannelMessage),
  Status(oneshot::Sender<RegistrationStatus>),
}

/// Snapshot of the registration, as seen from the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationStatus {
  pub active: Option<CacheVersion>,
  pub waiting: Option<CacheVersion>,
  pub installing: Option<CacheVersion>,
  pub clients: usize,
  /// Clients controlled by the active version
  pub controlled: usize,
  pub partitions: Vec<String>,
}

struct Slot {
  worker: Arc<Worker>,
  state: Lifecycle,
}

impl Slot {
  fn transition(&mut self, state: Lifecycle) {
    debug!(version = %self.worker.version(), from = ?self.state, to = ?state, "lifecycle");
    self.state = state;
  }
}

pub struct ProxyRuntime {
  cache: Arc<PartitionStore>,
  network: Arc<dyn Network>,
  active: Option<Slot>,
  waiting: Option<Slot>,
  /// Newest version currently installing
  installing: Option<CacheVersion>,
  installs: JoinSet<(Arc<Worker>, InstallReport)>,
  /// Open clients and the version controlling each
  clients: HashMap<ClientId, Option<CacheVersion>>,
  next_client: ClientId,
}

impl ProxyRuntime {
  /// Start the proxy task. It runs until every handle and client is gone.
  pub fn spawn(cache: Arc<PartitionStore>, network: Arc<dyn Network>) -> ProxyHandle {
    let (tx, rx) = mpsc::unbounded_channel();

    let runtime = Self {
      cache,
      network,
      active: None,
      waiting: None,
      installing: None,
      installs: JoinSet::new(),
      clients: HashMap::new(),
      next_client: 1,
    };
    tokio::spawn(runtime.run(rx));

    ProxyHandle { tx }
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    loop {
      tokio::select! {
        Some(envelope) = rx.recv() => self.handle(envelope).await,
        Some(joined) = self.installs.join_next() => match joined {
          Ok((worker, report)) => self.installed(worker, report).await,
          Err(e) => warn!(error = %e, "install task failed"),
        },
        else => break,
      }
    }

    debug!("proxy runtime stopped");
  }

  async fn handle(&mut self, envelope: Envelope) {
    match envelope {
      Envelope::Register(options) => self.register(options),
      Envelope::Connect(reply) => {
        let id = self.next_client;
        self.next_client += 1;
        let controller = self.active.as_ref().map(|slot| slot.worker.version().clone());
        self.clients.insert(id, controller);
        let _ = reply.send(id);
      }
      Envelope::Disconnect(id) => {
        self.clients.remove(&id);
        self.try_activate(false).await;
      }
      Envelope::Fetch { request, reply } => {
        let route: BoxFuture<'static, Result<ProxyResponse, FetchError>> = match &self.active {
          Some(slot) => Box::pin(Arc::clone(&slot.worker).handle(request)),
          // Nothing active yet: straight to the network
          None => self.network.fetch(request),
        };
        tokio::spawn(async move {
          let _ = reply.send(route.await);
        });
      }
      Envelope::Message(message) => self.on_message(message).await,
      Envelope::Status(reply) => {
        let _ = reply.send(self.status().await);
      }
    }
  }

  fn register(&mut self, options: WorkerOptions) {
    let version = options.version.clone();
    let known = [
      self.active.as_ref().map(|s| s.worker.version()),
      self.waiting.as_ref().map(|s| s.worker.version()),
      self.installing.as_ref(),
    ];
    if known.iter().flatten().any(|v| **v == version) {
      debug!(%version, "version already registered");
      return;
    }
    if let Some(newest) = known.iter().flatten().max() {
      if version < **newest {
        warn!(%version, %newest, "refusing to register an older proxy version");
        return;
      }
    }

    info!(%version, "installing proxy version");
    let worker = Arc::new(Worker::new(
      options,
      Arc::clone(&self.cache),
      Arc::clone(&self.network),
    ));
    self.installing = Some(version);
    self.installs.spawn(async move {
      let report = worker.install().await;
      (worker, report)
    });
  }

  async fn installed(&mut self, worker: Arc<Worker>, report: InstallReport) {
    if self.installing.as_ref() != Some(worker.version()) {
      info!(version = %worker.version(), ?report, "superseded during install");
      return;
    }
    self.installing = None;

    if let Some(mut previous) = self.waiting.take() {
      previous.transition(Lifecycle::Redundant);
    }
    let mut slot = Slot {
      worker,
      state: Lifecycle::Installing,
    };
    slot.transition(Lifecycle::Waiting);
    self.waiting = Some(slot);

    self.try_activate(false).await;
  }

  /// Promote the waiting version unless the active one still controls a
  /// client. `force` skips that check.
  async fn try_activate(&mut self, force: bool) {
    let Some(waiting) = &self.waiting else { return };

    if let Some(active) = &self.active {
      let current = active.worker.version();
      let in_use = self.clients.values().any(|c| c.as_ref() == Some(current));
      if in_use && !force {
        debug!(version = %waiting.worker.version(), "waiting for clients of {}", current);
        return;
      }
    }

    let Some(mut slot) = self.waiting.take() else { return };
    slot.transition(Lifecycle::Activating);
    slot.worker.sweep().await;

    if let Some(mut previous) = self.active.take() {
      previous.transition(Lifecycle::Redundant);
    }

    // Claim every open client
    let version = slot.worker.version().clone();
    for controller in self.clients.values_mut() {
      *controller = Some(version.clone());
    }

    slot.transition(Lifecycle::Active);
    info!(%version, clients = self.clients.len(), "proxy version active");
    self.active = Some(slot);
  }

  async fn on_message(&mut self, message: ChannelMessage) {
    match message {
      ChannelMessage::InvalidateCache { cache_name } => match &self.active {
        Some(slot) => slot.worker.invalidate(cache_name.as_deref()).await,
        None => debug!(?cache_name, "no active proxy, invalidation ignored"),
      },
      // Only a version that is already waiting can skip; the request is
      // not remembered for later installs
      ChannelMessage::SkipWaiting => match &self.waiting {
        Some(_) => self.try_activate(true).await,
        None => debug!("nothing waiting, skip-waiting ignored"),
      },
    }
  }

  async fn status(&self) -> RegistrationStatus {
    let active = self.active.as_ref().map(|s| s.worker.version().clone());
    let controlled = self
      .clients
      .values()
      .filter(|c| c.is_some() && **c == active)
      .count();

    RegistrationStatus {
      waiting: self.waiting.as_ref().map(|s| s.worker.version().clone()),
      installing: self.installing.clone(),
      clients: self.clients.len(),
      controlled,
      partitions: self.cache.names().await.unwrap_or_default(),
      active,
    }
  }
}

/// Application-side handle to the proxy task.
#[derive(Clone)]
pub struct ProxyHandle {
  tx: mpsc::UnboundedSender<Envelope>,
}

impl ProxyHandle {
  /// Install `options.version`. Activation follows once no client depends
  /// on the previous version.
  pub fn register(&self, options: WorkerOptions) {
    if self.tx.send(Envelope::Register(options)).is_err() {
      warn!("proxy runtime gone, registration dropped");
    }
  }

  /// Open a new application instance.
  pub async fn connect(&self) -> Result<ProxyClient, FetchError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope::Connect(reply))
      .map_err(|_| FetchError::ProxyUnavailable)?;
    let id = rx.await.map_err(|_| FetchError::ProxyUnavailable)?;

    Ok(ProxyClient {
      id,
      tx: self.tx.clone(),
    })
  }

  pub async fn status(&self) -> Result<RegistrationStatus, FetchError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope::Status(reply))
      .map_err(|_| FetchError::ProxyUnavailable)?;
    rx.await.map_err(|_| FetchError::ProxyUnavailable)
  }

  /// Fire-and-forget message to the proxy. No acknowledgment.
  pub fn post_message(&self, message: ChannelMessage) {
    post(&self.tx, message);
  }

  /// Poll until some version is active. Callers bound this with a timeout.
  pub async fn ready(&self) -> Result<CacheVersion, FetchError> {
    loop {
      if let Some(version) = self.status().await?.active {
        return Ok(version);
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
  }
}

/// One open application instance. Every request it sends is intercepted.
/// Dropping it closes the instance.
pub struct ProxyClient {
  id: ClientId,
  tx: mpsc::UnboundedSender<Envelope>,
}

impl ProxyClient {
  pub fn id(&self) -> ClientId {
    self.id
  }

  pub fn post_message(&self, message: ChannelMessage) {
    post(&self.tx, message);
  }
}

impl Network for ProxyClient {
  fn fetch(&self, request: ProxyRequest) -> BoxFuture<'static, Result<ProxyResponse, FetchError>> {
    let tx = self.tx.clone();

    Box::pin(async move {
      let (reply, rx) = oneshot::channel();
      tx.send(Envelope::Fetch { request, reply })
        .map_err(|_| FetchError::ProxyUnavailable)?;
      rx.await.map_err(|_| FetchError::ProxyUnavailable)?
    })
  }
}

impl Drop for ProxyClient {
  fn drop(&mut self) {
    let _ = self.tx.send(Envelope::Disconnect(self.id));
  }
}

fn post(tx: &mpsc::UnboundedSender<Envelope>, message: ChannelMessage) {
  debug!(?message, "posting message to proxy");
  if tx.send(Envelope::Message(message)).is_err() {
    debug!("proxy runtime gone, message dropped");
  }
}
