mod config;

use clap::Parser;
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use proxy_storage::persistence::{NoopSnapshotStore, SnapshotStore, get_store};
use proxy_storage::snapshot::{Snapshot, SnapshotError, StorageKind};
use proxy_storage::snapshotter::Snapshotter;
use proxy_storage::storage::{ProxyState, ProxyStorage};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "split_proxy";

#[derive(Parser)]
#[command(name = "split-proxy", about = "Caching proxy for feature flag SDKs")]
enum CliCommand {
    /// Run the proxy storage and its snapshot job until interrupted
    Run {
        #[arg(long)]
        config_file_path: PathBuf,
    },
    /// Print the metadata and a summary of a snapshot file
    InspectSnapshot { path: PathBuf },
    /// Write the decompressed payload of a snapshot file to `output`
    ExtractSnapshot { path: PathBuf, output: PathBuf },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("invalid snapshot payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("could not initialize metrics: {0}")]
    Metrics(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match cli {
        CliCommand::Run { config_file_path } => run(config_file_path),
        CliCommand::InspectSnapshot { path } => inspect_snapshot(path),
        CliCommand::ExtractSnapshot { path, output } => extract_snapshot(path, output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_file_path: PathBuf) -> Result<(), CliError> {
    let config = Config::from_file(&config_file_path)?;

    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config)?;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_async(config))
}

async fn run_async(config: Config) -> Result<(), CliError> {
    let storage_config = config.storage;

    let (store, interval, restore_on_start): (Arc<dyn SnapshotStore>, Duration, bool) =
        match &storage_config.snapshot {
            Some(snapshot) => (
                get_store(&snapshot.store),
                Duration::from_secs(snapshot.interval_secs),
                snapshot.restore_on_start,
            ),
            None => (
                Arc::new(NoopSnapshotStore {}),
                Duration::from_secs(3600),
                false,
            ),
        };

    let storage = if restore_on_start {
        ProxyStorage::load_or_cold_start(store.as_ref(), &storage_config)
    } else {
        ProxyStorage::new(&storage_config)
    };
    let storage = Arc::new(storage);

    let snapshotter = Snapshotter::spawn(storage.clone(), store, interval);
    tracing::info!(
        change_number = storage.splits().change_number(),
        "Proxy storage ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    snapshotter.shutdown().await;

    Ok(())
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(metrics_config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(&metrics_config.statsd_host, metrics_config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(proxy_storage::metrics_defs::ALL_METRICS);
    Ok(())
}

fn inspect_snapshot(path: PathBuf) -> Result<(), CliError> {
    let snapshot = Snapshot::decode_from_file(&path)?;
    let meta = snapshot.meta();

    println!("file:            {}", path.display());
    println!("version:         {}", meta.version);
    println!("storage:         {:?}", meta.storage);
    println!("spec version:    {}", meta.spec_version);
    println!("compressed size: {}", snapshot.compressed_len());

    let data = snapshot.data()?;
    println!("payload size:    {}", data.len());

    if meta.storage == StorageKind::Memory {
        let state: ProxyState = serde_json::from_slice(&data)?;
        println!("change number:   {}", state.splits.summaries.current_cn);
        println!("splits:          {}", state.splits.snapshot.splits.len());
        println!("checkpoints:     {}", state.splits.summaries.changes.len());
        println!("segment keys:    {}", state.my_segments.len());
    }

    Ok(())
}

fn extract_snapshot(path: PathBuf, output: PathBuf) -> Result<(), CliError> {
    let snapshot = Snapshot::decode_from_file(&path)?;
    snapshot.write_data_to_file(&output)?;
    println!("Wrote snapshot payload to {}", output.display());
    Ok(())
}
