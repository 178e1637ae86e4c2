use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use marginalia::config::{Cli, Command, Config, default_config_path};
use marginalia::store::HighlightStore;
use marginalia::sync::SyncStats;
use marginalia::{path_key, unpack_error, watch};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let (config_path, explicit) = match args.config_path {
        Some(path) => (PathBuf::from(path), true),
        None => (default_config_path(), false),
    };

    let cfg = Config::load(&config_path, explicit).unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&e), path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });

    let store = HighlightStore::load(&cfg.store.path).unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&e), path = ?cfg.store.path, "failed to load highlight store");
        std::process::exit(1);
    });

    let outcome = match args.command {
        Command::Scan { files } => scan(cfg, store, &files),
        Command::Watch { root } => watch_tree(cfg, store, root).await,
        Command::Show { file, pretty } => show(&store, file.as_deref(), pretty),
    };

    if let Err(e) = outcome {
        tracing::error!(error = %format!("{:#}", e), "marginalia failed");
        std::process::exit(1);
    }
}

fn scan(cfg: Config, mut store: HighlightStore, files: &[PathBuf]) -> Result<()> {
    let mut stats = SyncStats::default();

    for file in files {
        let key = path_key(file);
        let result = store.rescan_file(&key, file, &cfg.scan);
        tracing::info!(file = %key, result = %result, "scanned");
        result.record(&mut stats);
    }

    if stats.changed() {
        store
            .save(&cfg.store.path)
            .context("Failed to save highlight store")?;
        tracing::info!(path = ?cfg.store.path, records = store.total_records(), "persisted highlights");
    }

    tracing::info!(
        created = stats.created,
        updated = stats.updated,
        unchanged = stats.unchanged,
        removed = stats.removed,
        skipped = stats.skipped,
        "scan complete"
    );
    Ok(())
}

async fn watch_tree(cfg: Config, store: HighlightStore, root: Option<PathBuf>) -> Result<()> {
    let root = root.unwrap_or_else(|| cfg.watch.root.clone());
    let root = root
        .canonicalize()
        .with_context(|| format!("Watch root does not exist: {}", root.display()))?;
    let debounce = Duration::from_millis(cfg.watch.debounce_ms);
    let session = watch::Session::new(store, cfg, root);

    let cancellation_token = CancellationToken::new();
    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            shutdown_token.cancel();
        }
    });

    tracing::info!("marginalia watcher starting");
    let store = watch::run(session, debounce, cancellation_token).await?;
    tracing::info!(
        files = store.files().count(),
        records = store.total_records(),
        "marginalia going off, graceful shutdown complete"
    );
    Ok(())
}

fn show(store: &HighlightStore, file: Option<&Path>, pretty: bool) -> Result<()> {
    let json = match file {
        Some(file) => {
            let records = store.records(&path_key(file));
            if pretty {
                serde_json::to_string_pretty(records)?
            } else {
                serde_json::to_string(records)?
            }
        }
        None if pretty => serde_json::to_string_pretty(store)?,
        None => serde_json::to_string(store)?,
    };
    println!("{}", json);
    Ok(())
}
