//! # VE Telemetry
//!
//! Read a Victron VE.Direct device, keep a bounded rolling history of its
//! telemetry and optionally upload delta-encoded batches.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first argument, else `config/default.toml`, else defaults)
//!    - Set up logging with a non-blocking stderr writer
//!    - Build the register catalog and open the serial device (auto-detected
//!      when none is configured) or capture file
//!
//! 2. **Running**
//!    - Decoder worker: bytes to raw records
//!    - Ingest loop: raw records to typed records, summary and upload batches
//!    - Upload sender, when enabled
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C or end of stream stops the decoder worker
//!    - The closed record queue ends the ingest loop and the sender
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- config/default.toml
//! ```
//!
//! Expected output:
//! ```text
//! INFO ve_telemetry: VE Telemetry v0.1.0 starting...
//! INFO ve_telemetry::serial: Opened VE.Direct device at /dev/ttyUSB0
//! INFO ve_telemetry::pipeline: 1000 records ingested, 16 summary bins, 600 raw records retained
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ve_telemetry::config::Config;
use ve_telemetry::fields::{FieldTable, Normalizer};
use ve_telemetry::pipeline::{run_ingest, SummaryHandle, Uploads};
use ve_telemetry::registers::RegisterCatalog;
use ve_telemetry::serial::VeSource;
use ve_telemetry::summary::StreamingSummary;
use ve_telemetry::transmit::{run_sender, transport_for, Batcher};
use ve_telemetry::vedirect::reader::spawn_reader;

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Queue depth between the ingest loop and the upload sender
const UPLOAD_QUEUE_CAPACITY: usize = 1;

/// Pick the configuration file: the first argument, else the default path if
/// it exists
fn config_path(arg: Option<String>, default_exists: bool) -> Option<PathBuf> {
    match arg {
        Some(path) => Some(PathBuf::from(path)),
        None if default_exists => Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
        None => None,
    }
}

fn load_config() -> Result<Config> {
    let default_exists = Path::new(DEFAULT_CONFIG_PATH).is_file();
    match config_path(std::env::args().nth(1), default_exists) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn load_catalog(config: &Config) -> Result<RegisterCatalog> {
    let mut catalog = RegisterCatalog::builtin()?;
    for table in &config.registers.extra_tables {
        catalog
            .add_family_file(table)
            .with_context(|| format!("loading register table {}", table.display()))?;
    }
    Ok(catalog)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    // Initialize logging; RUST_LOG wins over the configured level
    let (writer, _log_guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();

    info!("VE Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(load_catalog(&config)?);
    info!(
        "Loaded {} registers from families: {}",
        catalog.len(),
        catalog.family_names().join(", ")
    );

    let source = VeSource::open_or_detect(&config.serial.port).await?;

    let (record_tx, record_rx) = mpsc::channel(config.serial.queue_capacity);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut reader = spawn_reader(source, record_tx, stop_rx, config.serial.reader_options());

    let summary = SummaryHandle::new(
        StreamingSummary::new(config.summary.options(), FieldTable::standard(), catalog.clone()),
        config.summary.raw_window(),
    );
    let normalizer = Normalizer::new(FieldTable::standard(), catalog);

    let mut sender = None;
    let uploads = if config.transmit.enabled {
        let transport = transport_for(&config.transmit.target)?;
        let (req_tx, req_rx) = mpsc::channel(UPLOAD_QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(UPLOAD_QUEUE_CAPACITY);
        sender = Some(tokio::spawn(run_sender(
            transport,
            req_rx,
            out_tx,
            config.transmit.retry_period(),
        )));
        info!(
            "Uploading to {} every {} records",
            config.transmit.target, config.transmit.send_period
        );
        Some(Uploads {
            batcher: Batcher::new(config.transmit.send_period, config.transmit.keyframe_period()),
            requests: req_tx,
            outcomes: out_rx,
        })
    } else {
        None
    };

    let ingest = tokio::spawn(run_ingest(
        record_rx,
        normalizer,
        summary.clone(),
        uploads,
        config.summary.status_interval_records,
    ));

    info!("Press Ctrl+C to exit");

    let finished = tokio::select! {
        result = &mut reader => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let reader_result = match finished {
        Some(result) => result,
        None => {
            info!("Received Ctrl+C, shutting down...");
            let _ = stop_tx.send(true);
            reader.await
        }
    };

    match reader_result {
        Ok(Ok(stats)) => info!(
            "Decoder read {} bytes: {} text blocks, {} VE.HEX messages",
            stats.bytes, stats.text_records, stats.hex_records
        ),
        Ok(Err(e)) => warn!("Decoder stopped: {}", e),
        Err(e) => warn!("Decoder task failed: {}", e),
    }

    let ingested = ingest.await?;
    if let Some(sender) = sender {
        sender.await?;
    }

    let stats = summary.stats().await;
    info!(
        "Ingested {} records ({} rejected); {} summary bins and {} raw records retained",
        ingested.records, ingested.rejected, stats.summary_bins, stats.raw_records
    );

    Ok(())
}
