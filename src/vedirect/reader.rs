//! # Decoder Worker
//!
//! Reads a byte source in fixed-size chunks, runs the frame decoder and hands
//! each completed frame downstream as a raw record.
//!
//! The worker is the only writer of its output queue. A read error or end of
//! stream ends the worker and closes the queue, which consumers observe as the
//! end of the stream. Frames are flattened into raw records: text blocks keep
//! their fields, VE.HEX messages become `{"_x": "<hex text>"}`.

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::decoder::FrameDecoder;
use super::protocol::Frame;
use crate::error::Result;
use crate::record::{RawRecord, HEX_FIELD, TIME_FIELD};

/// Default read size, in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Decoder worker settings
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Bytes requested per read call
    pub chunk_size: usize,
    /// Add `_t` (now, epoch ms) to every emitted record
    pub stamp_time: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            stamp_time: true,
        }
    }
}

/// Counters reported when the worker exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub bytes: u64,
    pub text_records: u64,
    pub hex_records: u64,
}

/// Flatten a decoded frame into the raw record handed downstream
pub fn frame_to_raw(frame: Frame) -> RawRecord {
    match frame {
        Frame::Text(record) => record,
        Frame::Hex(hex) => {
            let mut record = RawRecord::new();
            record.insert(HEX_FIELD.to_string(), hex.text);
            record
        }
    }
}

/// Spawn the decoder worker on the tokio runtime
pub fn spawn_reader<R>(
    source: R,
    records: mpsc::Sender<RawRecord>,
    shutdown: watch::Receiver<bool>,
    options: ReaderOptions,
) -> JoinHandle<Result<ReaderStats>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run_reader(source, records, shutdown, options))
}

/// Run the decoder worker until end of stream, read error, shutdown or a
/// closed output queue
///
/// # Errors
///
/// Returns the read error that stopped the worker. The output queue is closed
/// on every exit path.
pub async fn run_reader<R>(
    mut source: R,
    records: mpsc::Sender<RawRecord>,
    mut shutdown: watch::Receiver<bool>,
    options: ReaderOptions,
) -> Result<ReaderStats>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; options.chunk_size.max(1)];
    let mut stats = ReaderStats::default();

    loop {
        let n = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("VE.Direct reader stopping on shutdown");
                return Ok(stats);
            }
            read = source.read(&mut buf) => match read {
                Ok(0) => {
                    info!("VE.Direct stream ended after {} bytes", stats.bytes);
                    return Ok(stats);
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("VE.Direct read error: {}", e);
                    return Err(e.into());
                }
            },
        };
        stats.bytes += n as u64;

        for frame in decoder.feed(&buf[..n]) {
            match frame {
                Frame::Text(_) => stats.text_records += 1,
                Frame::Hex(_) => stats.hex_records += 1,
            }
            let mut record = frame_to_raw(frame);
            if options.stamp_time {
                record.insert(
                    TIME_FIELD.to_string(),
                    Utc::now().timestamp_millis().to_string(),
                );
            }
            if records.send(record).await.is_err() {
                debug!("record queue closed, VE.Direct reader exiting");
                return Ok(stats);
            }
        }
    }
}

/// Resolve once shutdown is requested. A dropped sender means no shutdown will
/// ever be requested.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
