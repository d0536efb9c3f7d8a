//! Tessera master daemon
//!
//! Opens the block and file system masters from their journals, then runs
//! the TTL sweeper and periodic journal checkpoints until interrupted.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tessera_common::MasterConfig;
use tessera_master::{
    BlockMaster, FileSystemMaster, LocalUnderFileSystem, MasterMetrics, TtlSweeper,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tessera-masterd")]
#[command(about = "Tessera metadata master")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/tessera/master.toml")]
    config: String,

    /// Data directory; journals go to <dir>/journal, the root mount to
    /// <dir>/underfs unless set otherwise
    #[arg(long, env = "TESSERA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Journal directory
    #[arg(long)]
    journal_dir: Option<PathBuf>,

    /// Under storage location mounted at /
    #[arg(long)]
    root_ufs: Option<String>,

    /// TTL checker interval in milliseconds, 0 disables it
    #[arg(long)]
    ttl_checker_interval_ms: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<MasterConfig> {
    let mut config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config file {}: {}", args.config, e))?
    } else {
        MasterConfig::default()
    };

    // CLI takes precedence over the file
    if let Some(dir) = &args.data_dir {
        let defaults = MasterConfig::with_data_dir(dir);
        config.journal.dir = defaults.journal.dir;
        config.root_ufs = defaults.root_ufs;
    }
    if let Some(dir) = &args.journal_dir {
        config.journal.dir.clone_from(dir);
    }
    if let Some(root_ufs) = &args.root_ufs {
        config.root_ufs.clone_from(root_ufs);
    }
    if let Some(interval) = args.ttl_checker_interval_ms {
        config.ttl_checker_interval_ms = interval;
    }

    config.validate()?;
    Ok(config)
}

/// Checkpoint both journals whenever enough entries have piled up
fn spawn_checkpoint_loop(
    block_master: Arc<BlockMaster>,
    fs_master: Arc<FileSystemMaster>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let block_master = Arc::clone(&block_master);
            let fs_master = Arc::clone(&fs_master);
            let result = tokio::task::spawn_blocking(move || {
                block_master.maybe_checkpoint()?;
                fs_master.maybe_checkpoint()
            })
            .await;
            match result {
                Ok(Ok(true)) => info!("Journal checkpoint written"),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => error!("Journal checkpoint failed: {}", e),
                Err(e) => error!("Journal checkpoint task panicked: {}", e),
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;

    info!("Starting Tessera master");
    info!("Config file: {}", args.config);
    info!("Journal directory: {:?}", config.journal.dir);
    info!("Root under storage: {}", config.root_ufs);

    let ufs = Arc::new(LocalUnderFileSystem::new());
    if !std::path::Path::new(&config.root_ufs).exists() {
        warn!("Root under storage {} does not exist, creating it", config.root_ufs);
        std::fs::create_dir_all(&config.root_ufs)?;
    }

    let metrics = Arc::new(MasterMetrics::new());
    let block_master = Arc::new(BlockMaster::open(&config)?);
    let fs_master = Arc::new(FileSystemMaster::open(
        &config,
        Arc::clone(&block_master),
        ufs,
        Arc::clone(&metrics),
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = Arc::new(TtlSweeper::new(
        Arc::clone(&fs_master),
        config.ttl_checker_interval(),
    ));
    let sweeper_handle = Arc::clone(&sweeper).spawn(shutdown_rx.clone());
    if sweeper_handle.is_none() {
        info!("TTL checker disabled");
    }

    let checkpoint_handle = spawn_checkpoint_loop(
        Arc::clone(&block_master),
        Arc::clone(&fs_master),
        Duration::from_millis(config.checkpoint_check_interval_ms.max(1)),
        shutdown_rx,
    );

    info!("Tessera master ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown_tx.send(true).ok();
    if let Some(handle) = sweeper_handle {
        handle.await.ok();
    }
    checkpoint_handle.await.ok();

    for (name, value) in metrics.snapshot() {
        if value > 0 {
            info!("{}: {}", name, value);
        }
    }
    info!("Tessera master stopped");
    Ok(())
}
