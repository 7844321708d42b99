use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use devreg::broker::ConfigPublisher;
use devreg::broker::MqttPublisher;
use devreg::store::DeadlineStore;
use devreg::store::DeviceStore;
use devreg::store::MemoryDeviceStore;
use devreg::Config;
use devreg::ConfigSync;
use devreg::DeviceService;

/// Device registry with broker-confirmed config sync
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "devreg.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.check {
        println!("{}: ok", args.config.display());
        return Ok(());
    }

    devreg::telemetry::init(&config.logging);

    tracing::info!("devreg starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let store: Arc<dyn DeviceStore> = match &config.store.path {
        Some(path) => Arc::new(
            MemoryDeviceStore::open(path)
                .await
                .context("Failed to open device store")?,
        ),
        None => {
            tracing::warn!("No store path configured, devices are kept in memory only");
            Arc::new(MemoryDeviceStore::new())
        }
    };
    let store: Arc<dyn DeviceStore> =
        Arc::new(DeadlineStore::new(store, config.store.query_timeout()));

    let publisher: Arc<dyn ConfigPublisher> =
        Arc::new(MqttPublisher::new(&config.broker).context("Failed to create MQTT publisher")?);

    let sync = ConfigSync::new(
        store.clone(),
        publisher,
        config.sync.confirm_timeout(),
        config.sync.rollback,
    );
    let devices = Arc::new(DeviceService::new(store, sync));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut server = tokio::spawn({
        let api = config.api;
        async move { devreg::api::serve(&api, devices, shutdown_rx).await }
    });

    let finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
            None
        }
        result = &mut server => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        None => {
            shutdown_tx.send(()).ok();
            server.await
        }
    };
    result.context("HTTP server task panicked")??;

    tracing::info!("devreg shutdown complete");

    Ok(())
}
