use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::metrics;
use crate::protocol::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No matching `SYNC_ACK` within the ack timeout
    SyncFailed,
    /// Round budget spent with chunks still unconfirmed
    Aborted,
    /// Every burst was confirmed but `FINAL` counted fewer chunks than were sent
    Incomplete,
}

/// Outcome of one transmitter session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub run_id: u16,
    pub bytes_total: usize,
    pub chunks_total: usize,
    pub chunks_received: usize,
    pub loss_percent: f64,
    pub crc_fail_count: u32,
    pub timeouts: u32,
    pub rounds: u32,
    pub duration_s: f64,
    /// Payload bytes per second of transfer time
    pub effective_throughput: f64,
    pub aborted: bool,
}

impl TransferResult {
    pub(crate) fn sync_failed(run_id: u16, bytes_total: usize, chunks_total: usize) -> Self {
        Self {
            success: false,
            reason: Some(FailureReason::SyncFailed),
            run_id,
            bytes_total,
            chunks_total,
            chunks_received: 0,
            loss_percent: metrics::loss_percent(chunks_total, 0),
            crc_fail_count: 0,
            timeouts: 0,
            rounds: 0,
            duration_s: 0.0,
            effective_throughput: 0.0,
            aborted: false,
        }
    }

    pub fn goodput(&self) -> f64 {
        metrics::goodput(self.effective_throughput, self.loss_percent)
    }

    pub fn crc_failure_percent(&self) -> f64 {
        metrics::crc_failure_percent(self.crc_fail_count, self.chunks_total)
    }
}

/// Payload and statistics handed to the caller when a receiver session closes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedTransfer {
    pub success: bool,
    pub run_id: u16,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub bytes: usize,
    pub metadata: Metadata,
    pub chunks_received: usize,
    pub chunks_expected: usize,
    pub loss_percent: f64,
    pub crc_fail_count: u32,
    pub timeouts: u32,
}

impl ReceivedTransfer {
    /// The payload as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Progress notifications emitted while a session runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    SyncSent {
        run_id: u16,
        mtu: usize,
        chunks: u16,
        total_size: u64,
    },
    SyncReceived {
        run_id: u16,
        mtu: usize,
        chunks: u16,
        total_size: u64,
    },
    /// One burst answered: read by the transmitter, sent by the receiver
    Report {
        run_id: u16,
        round: u32,
        pending: usize,
        missing: usize,
        crc_fail: u32,
        timeouts: u32,
    },
    Finished {
        run_id: u16,
        success: bool,
        chunks_received: usize,
        chunks_expected: usize,
        loss_percent: f64,
        crc_fail: u32,
        timeouts: u32,
    },
}

pub type EventSender = mpsc::UnboundedSender<TransferEvent>;

/// Optional listener a session reports progress to
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<EventSender>);

impl EventSink {
    pub(crate) fn new(events: EventSender) -> Self {
        Self(Some(events))
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.0 {
            if events.send(event).is_err() {
                trace!("event listener dropped");
            }
        }
    }
}
