use clap::{Parser, Subcommand};
use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use duocache::channel::ChannelMessage;
use duocache::config::Config;
use duocache::event::notice_channel;
use duocache::proxy::{
  CacheVersion, HttpNetwork, Network, PartitionStore, ProxyClient, ProxyHandle, ProxyRequest,
  ProxyRuntime,
};
use duocache::records::{
  CacheSource, CachedRecordClient, ListScope, RestApi, UploadRequest, LIST_KEY,
};

/// How long to wait for the proxy to install and activate.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "duocache")]
#[command(about = "Offline-first client for a records API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/duocache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List records. Filtered lists always go to the server.
  List {
    /// Filter as key=value, may be repeated
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
  },
  /// Show one record
  Get { id: String },
  /// Create a record from a JSON object
  Create { json: String },
  /// Apply a JSON object of changes to a record
  Update { id: String, json: String },
  /// Delete a record
  Delete { id: String },
  /// Request an upload location for a media file
  UploadUrl {
    filename: String,
    content_type: String,
  },
  /// GET any URL through the proxy
  Fetch { url: Url },
  /// Drop a proxy partition, or all of them
  Invalidate {
    #[arg(long)]
    cache: Option<String>,
  },
  /// Activate a waiting proxy version now
  SkipWaiting,
  /// Show proxy and store state
  Status,
  /// Remove everything from both tiers
  Clear,
}

fn parse_filter(raw: &str) -> std::result::Result<(String, String), String> {
  raw
    .split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
  match serde_json::from_str(raw).wrap_err("Invalid JSON")? {
    Value::Object(map) => Ok(map),
    _ => Err(eyre!("Expected a JSON object")),
  }
}

/// Log to a file in the data directory so stdout stays clean.
fn init_logging() -> Result<WorkerGuard> {
  let dir = Config::data_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&dir, "duocache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_env("DUOCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;

  // Start the proxy and wait for a version to take over
  let partitions = Arc::new(config.partition_store()?);
  let network = HttpNetwork::new().wrap_err("Failed to build HTTP client")?;
  let proxy = ProxyRuntime::spawn(Arc::clone(&partitions), Arc::new(network));
  proxy.register(config.worker_options()?);
  let version = tokio::time::timeout(READY_TIMEOUT, proxy.ready())
    .await
    .map_err(|_| eyre!("Proxy did not activate within {:?}", READY_TIMEOUT))??;
  tracing::debug!(%version, "proxy ready");

  let client = Arc::new(proxy.connect().await?);
  let api = RestApi::new(client.clone(), &config.api.base_url, &config.api.collection)?
    .with_token(Config::get_api_token());
  let (notices_tx, mut notices) = notice_channel();
  let records = CachedRecordClient::new(api, Arc::new(config.client_store()?)).with_notices(notices_tx);

  let outcome = run(args.command, &records, &proxy, &client, &partitions).await;

  drop(records);
  while let Ok(notice) = notices.try_recv() {
    eprintln!("{}", notice);
  }

  outcome
}

async fn run(
  command: Command,
  records: &CachedRecordClient,
  proxy: &ProxyHandle,
  client: &ProxyClient,
  partitions: &PartitionStore,
) -> Result<()> {
  match command {
    Command::List { filters } => {
      if filters.is_empty() {
        let result = records.list().await?;
        report_source(result.source, result.cached_at);
        print_json(&result.data)?;
      } else {
        let scope = filters
          .into_iter()
          .fold(ListScope::new(), |scope, (k, v)| scope.filter(k, v));
        print_json(&records.list_scoped(&scope).await?)?;
      }
    }
    Command::Get { id } => {
      let result = records.get(&id).await?;
      report_source(result.source, result.cached_at);
      print_json(&result.data)?;
    }
    Command::Create { json } => {
      let created = records.create(parse_object(&json)?).await?;
      print_json(&created)?;
    }
    Command::Update { id, json } => {
      let updated = records.update(&id, parse_object(&json)?).await;
      if !updated.is_synced() {
        eprintln!("warning: the server did not confirm this update; showing the local copy");
      }
      print_json(&updated.record)?;
    }
    Command::Delete { id } => {
      records.delete(&id).await?;
      println!("deleted {}", id);
    }
    Command::UploadUrl {
      filename,
      content_type,
    } => {
      let ticket = records
        .request_upload_url(&UploadRequest {
          filename,
          content_type,
        })
        .await?;
      print_json(&ticket)?;
    }
    Command::Fetch { url } => {
      let response = client.fetch(ProxyRequest::get(url)).await?;
      eprintln!("status: {}", response.status);
      println!("{}", response.text());
    }
    Command::Invalidate { cache } => {
      client.post_message(ChannelMessage::InvalidateCache { cache_name: cache });
      // Messages are handled in order, so this returns after the invalidation
      let status = proxy.status().await?;
      println!("partitions: {}", status.partitions.join(", "));
    }
    Command::SkipWaiting => {
      client.post_message(ChannelMessage::SkipWaiting);
      let status = proxy.status().await?;
      println!("active: {}", show_version(status.active));
    }
    Command::Status => {
      let status = proxy.status().await?;
      println!("active:     {}", show_version(status.active));
      println!("waiting:    {}", show_version(status.waiting));
      println!("installing: {}", show_version(status.installing));
      println!("clients:    {} ({} controlled)", status.clients, status.controlled);
      for name in &status.partitions {
        let entries = partitions.entry_count(name).await?;
        println!("partition:  {} ({} entries)", name, entries);
      }
      println!("store:      {} entries", records.store().len().await);
      if let Some(list) = records.store().entry::<Value>(LIST_KEY).await {
        println!("list:       cached until {}", list.expires_at.to_rfc3339());
      }
    }
    Command::Clear => {
      records.store().clear().await;
      let removed = partitions.clear().await?;
      println!("cleared client store and {} partitions", removed);
    }
  }

  Ok(())
}

fn report_source(source: CacheSource, cached_at: Option<chrono::DateTime<chrono::Utc>>) {
  match (source, cached_at) {
    (CacheSource::Cache, Some(at)) => eprintln!("(cached at {})", at.to_rfc3339()),
    _ => eprintln!("(from network)"),
  }
}

fn show_version(version: Option<CacheVersion>) -> String {
  version.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}
