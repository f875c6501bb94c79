mod app;
mod config;
mod data;
mod engine;
mod event;
mod keys;
mod message;
mod scheduler;
mod settings;
mod store;
mod sync;
mod transport;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::event::EventHandler;
use crate::store::{MemoryStore, RecordStore, SqliteStore};
use crate::transport::LineTransport;

#[derive(Parser, Debug)]
#[command(name = "facesync")]
#[command(about = "Watch-face configuration and cached-data sync host")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/facesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path of the state database
  #[arg(short, long)]
  database: Option<PathBuf>,

  /// Keep all state in memory; nothing survives a restart
  #[arg(long, conflicts_with = "database")]
  memory: bool,
}

/// Logs go to stderr; stdout carries the outbound message stream.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("facesync=info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "facesync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  guard
}

async fn run<S: RecordStore>(store: S, tick_rate: Duration) -> Result<()> {
  let mut app = app::App::new(store, LineTransport::stdout())?;
  app.run(EventHandler::new(tick_rate)).await
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _guard = init_tracing(config.log_dir.as_deref());

  let tick_rate = Duration::from_secs(config.tick_seconds.max(1));

  if args.memory {
    tracing::info!("Using in-memory state");
    return run(MemoryStore::new(), tick_rate).await;
  }

  // Command line wins over the config file
  let store = match args.database.or(config.database) {
    Some(path) => SqliteStore::open(&path)?,
    None => SqliteStore::open_default()?,
  };
  tracing::info!("Opened state database");
  run(store, tick_rate).await
}
