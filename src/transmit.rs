//! # Upload Batching
//!
//! Raw records are batched and uploaded as delta-encoded `{"d": [...]}`
//! messages. One send is in flight at a time. A failed send keeps the batch,
//! grows the already-encoded message with the records that arrived since, and
//! is retried no earlier than the retry period after the failed attempt began.
//!
//! The network client itself is behind the [`Transport`] trait; the only
//! built-in transport writes JSON lines to stdout.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::delta::{encode_deltas, DeltaMessage};
use crate::error::{Result, VeError};
use crate::record::RawRecord;

/// Upload target meaning "write to stdout"
pub const STDOUT_TARGET: &str = "-";

/// One upload attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub message: DeltaMessage<String>,
    /// When this attempt was issued
    pub started_at: Instant,
    /// 1 for the first attempt
    pub attempt: u32,
}

/// Result of one upload attempt, handed back to the batcher
#[derive(Debug)]
pub struct SendOutcome {
    pub request: SendRequest,
    pub result: Result<()>,
}

/// Accumulates records and issues send requests
#[derive(Debug)]
pub struct Batcher {
    batch: Vec<RawRecord>,
    send_period: usize,
    keyframe_period: usize,
    in_flight: bool,
}

impl Batcher {
    pub fn new(send_period: usize, keyframe_period: usize) -> Self {
        Self {
            batch: Vec::with_capacity(send_period),
            send_period: send_period.max(1),
            keyframe_period,
            in_flight: false,
        }
    }

    /// Records waiting to be acknowledged
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Add a record; returns a request once a full batch is waiting and no
    /// send is in flight
    pub fn push(&mut self, record: RawRecord) -> Option<SendRequest> {
        self.batch.push(record);
        self.maybe_send()
    }

    fn maybe_send(&mut self) -> Option<SendRequest> {
        if self.in_flight || self.batch.len() < self.send_period {
            return None;
        }
        debug!("sending {} records", self.batch.len());
        self.in_flight = true;
        Some(SendRequest {
            message: DeltaMessage {
                data: encode_deltas(&self.batch, &[], self.keyframe_period),
            },
            started_at: Instant::now(),
            attempt: 1,
        })
    }

    /// Account for a finished attempt
    ///
    /// Success drops the sent records. Failure returns the retry request,
    /// grown from the failed message to cover the whole current batch.
    pub fn on_outcome(&mut self, outcome: SendOutcome) -> Option<SendRequest> {
        let SendOutcome { request, result } = outcome;
        match result {
            Ok(()) => {
                let sent = request.message.len().min(self.batch.len());
                self.batch.drain(..sent);
                self.in_flight = false;
                debug!("sent {} records, {} pending", sent, self.batch.len());
                self.maybe_send()
            }
            Err(e) => {
                let data = encode_deltas(&self.batch, &request.message.data, self.keyframe_period);
                warn!(
                    "upload attempt {} failed: {}; retrying with {} records",
                    request.attempt,
                    e,
                    data.len()
                );
                Some(SendRequest {
                    message: DeltaMessage { data },
                    started_at: Instant::now(),
                    attempt: request.attempt + 1,
                })
            }
        }
    }
}

/// Outbound upload channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Deliver one message
    async fn send(&mut self, message: &DeltaMessage<String>) -> Result<()>;
}

/// Writes each message as one JSON line
pub struct WriterTransport<W> {
    writer: W,
}

/// JSON lines on stdout
pub type StdoutTransport = WriterTransport<tokio::io::Stdout>;

impl StdoutTransport {
    pub fn stdout() -> Self {
        WriterTransport::new(tokio::io::stdout())
    }
}

impl<W> WriterTransport<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Transport for WriterTransport<W> {
    async fn send(&mut self, message: &DeltaMessage<String>) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Build the transport for a configured target
///
/// # Errors
///
/// Returns `Transport` for targets other than stdout; network upload is
/// provided by an external `Transport` implementation.
pub fn transport_for(target: &str) -> Result<Box<dyn Transport>> {
    if target == STDOUT_TARGET {
        Ok(Box::new(StdoutTransport::stdout()))
    } else {
        Err(VeError::Transport(format!(
            "no built-in transport for target {:?}",
            target
        )))
    }
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: &DeltaMessage<String>) -> Result<()> {
        (**self).send(message).await
    }
}

/// Send requests one at a time until the request queue closes
///
/// After a failure the outcome is held back until `retry_period` has passed
/// since the attempt began, so the retry it triggers is paced.
pub async fn run_sender<T: Transport>(
    mut transport: T,
    mut requests: mpsc::Receiver<SendRequest>,
    outcomes: mpsc::Sender<SendOutcome>,
    retry_period: Duration,
) {
    while let Some(request) = requests.recv().await {
        let result = transport.send(&request.message).await;
        if let Err(e) = &result {
            let resume = request.started_at + retry_period;
            debug!("send error {}, waiting {:?}", e, resume.saturating_duration_since(Instant::now()));
            sleep_until(resume).await;
        }
        if outcomes.send(SendOutcome { request, result }).await.is_err() {
            break;
        }
    }
    info!("upload sender exiting");
}
