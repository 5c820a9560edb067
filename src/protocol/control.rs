//! Newline-delimited JSON control messages.
//!
//! Control traffic shares the byte stream with binary frames. A frame always
//! starts with `0xA5`, a control line with `{`, so a reader that lost sync
//! can skip stale frame bytes and pick up the next JSON object.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::protocol::constants::{CONTROL_DELIMITER, MAX_CONTROL_LINE};
use crate::utils::io::write_flushed;

/// Free-form session metadata carried by `SYNC`
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    Sync {
        run_id: u16,
        mtu: usize,
        count: u16,
        total_size: u64,
        window: usize,
        #[serde(default)]
        meta: Metadata,
    },
    SyncAck {
        run_id: u16,
    },
    Burst {
        run_id: u16,
        /// Round number, echoed back in the matching `REPORT`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        burst: Option<u32>,
        seqs: Vec<u16>,
    },
    Report {
        run_id: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        burst: Option<u32>,
        missing: Vec<u16>,
        received_total: usize,
        crc_fail: u32,
        timeouts: u32,
    },
    End {
        run_id: u16,
    },
    Final {
        run_id: u16,
        received: usize,
        expected: usize,
        loss: f64,
        crc_fail: u32,
        timeouts: u32,
    },
}

impl ControlMessage {
    pub fn run_id(&self) -> u16 {
        match self {
            ControlMessage::Sync { run_id, .. }
            | ControlMessage::SyncAck { run_id }
            | ControlMessage::Burst { run_id, .. }
            | ControlMessage::Report { run_id, .. }
            | ControlMessage::End { run_id }
            | ControlMessage::Final { run_id, .. } => *run_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Sync { .. } => "SYNC",
            ControlMessage::SyncAck { .. } => "SYNC_ACK",
            ControlMessage::Burst { .. } => "BURST",
            ControlMessage::Report { .. } => "REPORT",
            ControlMessage::End { .. } => "END",
            ControlMessage::Final { .. } => "FINAL",
        }
    }

    /// One wire line including the trailing delimiter
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(CONTROL_DELIMITER);
        Ok(line)
    }

    /// Decode one line. Bytes before the JSON object (stale frame tails) are skipped.
    pub fn decode(line: &[u8]) -> Option<Self> {
        line.iter()
            .enumerate()
            .filter(|&(_, &b)| b == b'{')
            .find_map(|(start, _)| serde_json::from_slice(&line[start..]).ok())
    }
}

/// Outcome of one bounded wait on the control channel
#[derive(Debug)]
pub enum Inbound {
    Message(ControlMessage),
    Timeout,
    Malformed,
    Closed,
}

/// Serialize `msg`, write it and flush.
pub async fn send_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &ControlMessage,
) -> anyhow::Result<()> {
    let line = msg.encode()?;
    trace!(kind = msg.kind(), bytes = line.len(), "sending control message");
    write_flushed(writer, &line).await?;
    Ok(())
}

/// Wait up to `wait` for one control line.
pub async fn read_inbound<R: AsyncBufRead + Unpin>(reader: &mut R, wait: Duration) -> Inbound {
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_CONTROL_LINE as u64);

    match timeout(wait, limited.read_until(CONTROL_DELIMITER, &mut line)).await {
        Err(_) => Inbound::Timeout,
        Ok(Err(e)) => {
            warn!("control read failed: {}", e);
            Inbound::Closed
        }
        Ok(Ok(0)) => Inbound::Closed,
        Ok(Ok(_)) => match ControlMessage::decode(&line) {
            Some(msg) => {
                trace!(kind = msg.kind(), run_id = msg.run_id(), "received control message");
                Inbound::Message(msg)
            }
            None => {
                debug!("discarding {} byte undecodable control line", line.len());
                Inbound::Malformed
            }
        },
    }
}

/// Wait up to `wait` for one control message. Absence is not an error.
pub async fn recv_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    wait: Duration,
) -> Option<ControlMessage> {
    match read_inbound(reader, wait).await {
        Inbound::Message(msg) => Some(msg),
        _ => None,
    }
}
