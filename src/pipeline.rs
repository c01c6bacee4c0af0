//! # Ingest Pipeline
//!
//! Connects the decoder worker's output queue to the rolling history and the
//! upload batcher.
//!
//! The summary is shared through [`SummaryHandle`]: the ingest loop is the only
//! writer, queries take the read lock just long enough to copy both tiers and
//! merge the copy after releasing it.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::delta::DeltaMessage;
use crate::error::Result;
use crate::fields::Normalizer;
use crate::record::{RawRecord, Record, HEX_FIELD};
use crate::summary::{Snapshot, StreamingSummary};
use crate::transmit::{Batcher, SendOutcome, SendRequest};
use crate::vedirect::decoder::decode_hex_message;

/// Shared, lock-protected rolling history
#[derive(Debug, Clone)]
pub struct SummaryHandle {
    inner: Arc<RwLock<StreamingSummary>>,
    raw_window: Duration,
}

/// Tier sizes at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryStats {
    pub summary_bins: usize,
    pub raw_records: usize,
}

impl SummaryHandle {
    /// Share `summary`; queries without an explicit cut return raw records
    /// for the last `raw_window`
    pub fn new(summary: StreamingSummary, raw_window: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(summary)),
            raw_window,
        }
    }

    pub async fn add(&self, record: Record) -> Result<()> {
        self.inner.write().await.add(record)
    }

    /// Copy both tiers under the read lock
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.snapshot()
    }

    /// Merged history with raw resolution after `raw_after` (epoch ms)
    pub async fn query(&self, raw_after: i64) -> Vec<Record> {
        let snapshot = self.snapshot().await;
        snapshot.merge(raw_after)
    }

    /// Merged history with raw resolution for the configured recent window
    pub async fn query_recent(&self) -> Vec<Record> {
        self.query(self.default_raw_after()).await
    }

    /// Merged history, delta-encoded for the wire
    pub async fn query_deltas(&self, raw_after: i64) -> DeltaMessage {
        let records = self.query(raw_after).await;
        DeltaMessage::from_records(&records, 0)
    }

    pub fn default_raw_after(&self) -> i64 {
        let window = i64::try_from(self.raw_window.as_millis()).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis().saturating_sub(window)
    }

    pub async fn stats(&self) -> SummaryStats {
        let summary = self.inner.read().await;
        SummaryStats {
            summary_bins: summary.summary_len(),
            raw_records: summary.raw_len(),
        }
    }
}

/// Upload side of the ingest loop: the batcher plus the sender task's queues
#[derive(Debug)]
pub struct Uploads {
    pub batcher: Batcher,
    pub requests: mpsc::Sender<SendRequest>,
    pub outcomes: mpsc::Receiver<SendOutcome>,
}

/// Counters reported when the ingest loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub records: u64,
    /// Records the summary refused (no usable `_t`)
    pub rejected: u64,
}

/// Consume raw records until the decoder's queue closes
///
/// Each record is batched for upload as received, then typed and added to
/// the summary. Rejected records are logged and skipped.
pub async fn run_ingest(
    mut records: mpsc::Receiver<RawRecord>,
    mut normalizer: Normalizer,
    summary: SummaryHandle,
    mut uploads: Option<Uploads>,
    status_interval: u64,
) -> IngestStats {
    let mut stats = IngestStats::default();
    let mut uploads_open = uploads.is_some();

    loop {
        tokio::select! {
            raw = records.recv() => {
                let Some(raw) = raw else {
                    info!("record queue closed, ingest exiting");
                    break;
                };

                if let Some(up) = uploads.as_mut() {
                    if let Some(request) = up.batcher.push(raw.clone()) {
                        send_request(up, request).await;
                    }
                }

                if let Some(text) = raw.get(HEX_FIELD) {
                    log_hex(&normalizer, text);
                }

                let record = normalizer.normalize(&raw);
                if let Err(e) = summary.add(record).await {
                    debug!("record rejected by summary: {}", e);
                    stats.rejected += 1;
                }

                stats.records += 1;
                if status_interval > 0 && stats.records % status_interval == 0 {
                    let s = summary.stats().await;
                    info!(
                        "{} records ingested, {} summary bins, {} raw records retained",
                        stats.records, s.summary_bins, s.raw_records
                    );
                }
            }

            outcome = next_outcome(&mut uploads), if uploads_open => {
                match (outcome, uploads.as_mut()) {
                    (Some(outcome), Some(up)) => {
                        if let Some(request) = up.batcher.on_outcome(outcome) {
                            send_request(up, request).await;
                        }
                    }
                    _ => {
                        warn!("upload sender stopped, uploads disabled");
                        uploads_open = false;
                    }
                }
            }
        }
    }

    stats
}

async fn next_outcome(uploads: &mut Option<Uploads>) -> Option<SendOutcome> {
    match uploads {
        Some(up) => up.outcomes.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_request(uploads: &mut Uploads, request: SendRequest) {
    if uploads.requests.send(request).await.is_err() {
        warn!("upload sender is gone, dropping send request");
    }
}

fn log_hex(normalizer: &Normalizer, text: &str) {
    let resolved = decode_hex_message(text).and_then(|frame| {
        normalizer
            .resolve_hex(&frame)
            .map(|v| format!("{} = {} {}", v.register.name, v.scaled(), v.register.unit))
    });
    match resolved {
        Ok(line) => debug!("VE.HEX {}", line),
        Err(e) => debug!("VE.HEX {}: {}", text, e),
    }
}
