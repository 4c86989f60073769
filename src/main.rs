mod cache;
mod config;
mod event;
mod intercept;
mod lifecycle;
mod net;
mod route;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::cache::{CacheBackend, CacheStore, MemoryBackend, RequestKey, SqliteBackend};
use crate::config::Config;
use crate::event::LifecycleEvent;
use crate::intercept::{FetchOutcome, Interceptor, ResponseSource, ServedResponse};
use crate::lifecycle::LifecycleManager;
use crate::net::{Fetch, NetworkClient, Request};
use crate::route::Routes;

#[derive(Parser, Debug)]
#[command(name = "awning")]
#[command(about = "An offline-first caching gateway for single-page apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/awning/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Use an in-memory cache instead of the on-disk database
  #[arg(long)]
  memory: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the static cache from the configured manifest
  Install,
  /// Prune caches from superseded versions and take over
  Activate,
  /// Route one request through the interceptor and print the result
  Fetch {
    /// Absolute URL to fetch
    url: String,
  },
  /// Deliver a message payload to the lifecycle manager
  Message {
    /// JSON payload with a type tag, e.g. '{"type": "background-sync"}'
    payload: String,
  },
  /// Show configured cache names and what exists on disk
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing();

  let config = Config::load(args.config.as_deref())?;

  if args.memory {
    run(&args.command, &config, MemoryBackend::new()).await
  } else {
    run(&args.command, &config, SqliteBackend::open()?).await
  }
}

/// Log to a daily-rotated file under the data directory so stdout stays
/// clean for command output.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()?.join("awning");
  std::fs::create_dir_all(&log_dir).ok()?;

  let appender = tracing_appender::rolling::daily(log_dir, "awning.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}

async fn run<B: CacheBackend>(command: &Command, config: &Config, backend: B) -> Result<()> {
  let routes = Routes::from_config(config)?;
  let store = CacheStore::new(
    backend,
    config.cache.static_cache_name(),
    config.cache.dynamic_cache_name(),
  );
  let net = NetworkClient::new()?;

  match command {
    Command::Install => install(config, store, net, routes).await,
    Command::Activate => activate(config, store, net, routes),
    Command::Fetch { url } => fetch(config, store, net, routes, url).await,
    Command::Message { payload } => message(config, store, net, routes, payload),
    Command::Status => status(config, &store),
  }
}

async fn install<B: CacheBackend>(
  config: &Config,
  store: CacheStore<B>,
  net: NetworkClient,
  routes: Routes,
) -> Result<()> {
  let (tx, mut events) = event::channel();

  // A cache from another version means an older deploy is still governing
  let current = [
    store.static_name().to_string(),
    store.dynamic_name().to_string(),
  ];
  let previous = store
    .list_names()?
    .into_iter()
    .find(|name| !current.contains(name));

  let mut lifecycle = LifecycleManager::new(
    store,
    net,
    routes,
    config.cache.manifest.clone(),
    config.cache.version.clone(),
    tx,
  );
  if let Some(previous) = previous {
    lifecycle = lifecycle.with_controller(previous);
  }

  lifecycle.install().await?;
  println!(
    "installed {} ({} assets pre-populated)",
    config.cache.version,
    config.cache.manifest.len()
  );

  if lifecycle.skip_waiting() {
    lifecycle.activate()?;
    println!("activated {} without waiting", config.cache.version);
  }

  drain_events(&mut events);
  Ok(())
}

fn activate<B: CacheBackend>(
  config: &Config,
  store: CacheStore<B>,
  net: NetworkClient,
  routes: Routes,
) -> Result<()> {
  let (tx, mut events) = event::channel();
  let mut lifecycle = LifecycleManager::new(
    store,
    net,
    routes,
    config.cache.manifest.clone(),
    config.cache.version.clone(),
    tx,
  );

  lifecycle.activate()?;
  println!("activated {}", config.cache.version);

  drain_events(&mut events);
  Ok(())
}

async fn fetch<B: CacheBackend>(
  config: &Config,
  store: CacheStore<B>,
  net: NetworkClient,
  routes: Routes,
  url: &str,
) -> Result<()> {
  let url = Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
  let request = Request::get(url);

  let offline_page = config
    .cache
    .offline_page
    .as_deref()
    .map(|path| routes.resource(path).map(RequestKey::get))
    .transpose()?;

  let interceptor = Interceptor::new(store, net.clone(), routes, offline_page);

  match interceptor.intercept(&request).await {
    FetchOutcome::Served(served) => print_served(&request, &served),
    FetchOutcome::Passthrough => {
      // Not ours; perform the fetch the host would have done untouched
      let response = net.fetch(&request).await?;
      println!("{} {} [passthrough]", response.status, request.url);
    }
  }

  Ok(())
}

fn message<B: CacheBackend>(
  config: &Config,
  store: CacheStore<B>,
  net: NetworkClient,
  routes: Routes,
  payload: &str,
) -> Result<()> {
  let payload: serde_json::Value =
    serde_json::from_str(payload).map_err(|e| eyre!("Invalid message payload: {}", e))?;

  let (tx, mut events) = event::channel();
  let lifecycle = LifecycleManager::new(
    store,
    net,
    routes,
    config.cache.manifest.clone(),
    config.cache.version.clone(),
    tx,
  );

  lifecycle.handle_message(&payload);
  drain_events(&mut events);
  Ok(())
}

fn status<B: CacheBackend>(config: &Config, store: &CacheStore<B>) -> Result<()> {
  let names = store.list_names()?;
  let presence = |name: &str| {
    if names.iter().any(|n| n == name) {
      "present"
    } else {
      "absent"
    }
  };

  println!("version:       {}", config.cache.version);
  println!(
    "static cache:  {} ({})",
    store.static_name(),
    presence(store.static_name())
  );
  println!(
    "dynamic cache: {} ({})",
    store.dynamic_name(),
    presence(store.dynamic_name())
  );

  let superseded: Vec<String> = names
    .into_iter()
    .filter(|name| name != store.static_name() && name != store.dynamic_name())
    .collect();
  if !superseded.is_empty() {
    println!("superseded:    {}", superseded.join(", "));
  }

  Ok(())
}

fn print_served(request: &Request, served: &ServedResponse) {
  let source = match served.source {
    ResponseSource::Network => "network",
    ResponseSource::Cache => "cache",
    ResponseSource::OfflinePage => "offline-page",
    ResponseSource::Synthetic => "synthetic",
  };

  println!("{} {} [{}]", served.response.status, request.url, source);

  let printable = served
    .response
    .content_type()
    .map(|ct| ct.starts_with("text/") || ct.starts_with("application/json"))
    .unwrap_or(false);
  if printable {
    println!("{}", String::from_utf8_lossy(&served.response.body));
  } else {
    println!("({} bytes)", served.response.body.len());
  }
}

fn drain_events(events: &mut event::EventReceiver) {
  while let Some(event) = events.try_next() {
    match event {
      LifecycleEvent::UpdateAvailable { version } => {
        println!("update available: {}", version);
      }
      LifecycleEvent::BackgroundSyncHandled => {
        println!("background sync handled");
      }
    }
  }
}
