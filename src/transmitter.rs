//! Driving end of a transfer: handshake, paced bursts, report-driven retries.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::TransmitterConfig;
use crate::metrics::loss_percent;
use crate::protocol::control::{read_inbound, send_message};
use crate::protocol::{
    encode_frame, payload_capacity, split_payload, ControlMessage, Inbound, Metadata, ProtocolError,
};
use crate::transfer::{EventSender, EventSink, FailureReason, TransferEvent, TransferResult};
use crate::utils::io::write_flushed;

/// Statistics the receiver closes a session with
struct FinalStats {
    received: usize,
    loss: f64,
    crc_fail: u32,
    timeouts: u32,
}

pub struct Transmitter<T> {
    link: BufStream<T>,
    config: TransmitterConfig,
    events: EventSink,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Transmitter<T> {
    pub fn new(transport: T, config: TransmitterConfig) -> Self {
        Self {
            link: BufStream::new(transport),
            config,
            events: EventSink::default(),
        }
    }

    /// Report session progress to `events`
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = EventSink::new(events);
        self
    }

    /// Tune mtu, gap or window between sessions
    pub fn config_mut(&mut self) -> &mut TransmitterConfig {
        &mut self.config
    }

    pub async fn send_text(&mut self, text: &str, metadata: Metadata) -> anyhow::Result<TransferResult> {
        self.send(text.as_bytes(), metadata).await
    }

    /// Deliver `payload` in one session.
    ///
    /// Link trouble (no handshake, rounds exhausted) is reported through the
    /// returned [`TransferResult`]. Errors are reserved for misconfiguration
    /// and transport failures.
    pub async fn send(&mut self, payload: &[u8], metadata: Metadata) -> anyhow::Result<TransferResult> {
        self.validate()?;
        let mtu = self.config.mtu;
        let chunks = split_payload(payload, payload_capacity(mtu)?)?;
        let total = chunks.len() as u16;
        let run_id: u16 = rand::thread_rng().gen_range(1..=u16::MAX);

        let sync = ControlMessage::Sync {
            run_id,
            mtu,
            count: total,
            total_size: payload.len() as u64,
            window: self.config.window_size,
            meta: metadata,
        };
        send_message(&mut self.link, &sync).await?;
        info!(run_id, mtu, chunks = total, bytes = payload.len(), "SYNC sent");
        self.events.emit(TransferEvent::SyncSent {
            run_id,
            mtu,
            chunks: total,
            total_size: payload.len() as u64,
        });

        let acked = self
            .await_reply(|msg| matches!(msg, ControlMessage::SyncAck { run_id: id } if id == run_id).then_some(()))
            .await;
        if acked.is_none() {
            warn!(run_id, "no SYNC_ACK within {:?}", self.config.ack_timeout());
            let result = TransferResult::sync_failed(run_id, payload.len(), chunks.len());
            self.emit_finished(&result);
            return Ok(result);
        }

        let start = Instant::now();
        let mut pending: BTreeSet<u16> = (0..total).collect();
        let mut rounds = 0u32;
        let mut crc_fail = 0u32;
        let mut timeouts = 0u32;

        while !pending.is_empty() && rounds < self.config.max_rounds {
            let round = rounds + 1;
            let seqs: Vec<u16> = pending.iter().take(self.config.window_size).copied().collect();
            debug!(
                run_id,
                round,
                pending = pending.len(),
                first = seqs[0],
                last = seqs[seqs.len() - 1],
                "starting burst"
            );

            self.discard_stale_replies(run_id).await;
            let burst = ControlMessage::Burst { run_id, burst: Some(round), seqs: seqs.clone() };
            send_message(&mut self.link, &burst).await?;
            for &seq in &seqs {
                let frame = encode_frame(run_id, seq, total, chunks[seq as usize], mtu)?;
                write_flushed(&mut self.link, &frame).await?;
                trace!(run_id, seq, "frame sent");
                if self.config.gap_ms > 0 {
                    sleep(self.config.gap()).await;
                }
            }

            let report = self
                .await_reply(|msg| match msg {
                    ControlMessage::Report { run_id: id, burst, missing, crc_fail, timeouts, .. }
                        if id == run_id && answers_burst(burst, round, &missing, &seqs) =>
                    {
                        Some((missing, crc_fail, timeouts))
                    }
                    _ => None,
                })
                .await;
            rounds = round;

            let Some((missing, report_crc, report_timeouts)) = report else {
                debug!(run_id, round, "no REPORT, burst will be repeated");
                continue;
            };
            crc_fail = report_crc;
            timeouts = report_timeouts;

            let missing: BTreeSet<u16> = missing.into_iter().collect();
            for seq in seqs.iter().filter(|&seq| !missing.contains(seq)) {
                pending.remove(seq);
            }
            debug!(
                run_id,
                round,
                missing = missing.len(),
                pending = pending.len(),
                crc_fail,
                timeouts,
                "burst reported"
            );
            self.events.emit(TransferEvent::Report {
                run_id,
                round,
                pending: pending.len(),
                missing: missing.len(),
                crc_fail,
                timeouts,
            });
        }

        let elapsed = start.elapsed().max(Duration::from_micros(1));

        self.discard_stale_replies(run_id).await;
        send_message(&mut self.link, &ControlMessage::End { run_id }).await?;
        let stats = self
            .await_reply(|msg| match msg {
                ControlMessage::Final { run_id: id, received, loss, crc_fail, timeouts, .. } if id == run_id => {
                    Some(FinalStats { received, loss, crc_fail, timeouts })
                }
                _ => None,
            })
            .await
            .unwrap_or_else(|| {
                warn!(run_id, "no FINAL, deriving statistics locally");
                let received = chunks.len() - pending.len();
                FinalStats {
                    received,
                    loss: loss_percent(chunks.len(), received),
                    crc_fail,
                    timeouts,
                }
            });

        let aborted = !pending.is_empty();
        let reason = if aborted {
            Some(FailureReason::Aborted)
        } else if stats.received < chunks.len() {
            Some(FailureReason::Incomplete)
        } else {
            None
        };
        let result = TransferResult {
            success: reason.is_none(),
            reason,
            run_id,
            bytes_total: payload.len(),
            chunks_total: chunks.len(),
            chunks_received: stats.received,
            loss_percent: stats.loss,
            crc_fail_count: stats.crc_fail,
            timeouts: stats.timeouts,
            rounds,
            duration_s: elapsed.as_secs_f64(),
            effective_throughput: payload.len() as f64 / elapsed.as_secs_f64(),
            aborted,
        };

        match reason {
            Some(FailureReason::Aborted) => {
                warn!(run_id, rounds, unconfirmed = pending.len(), "round budget exhausted")
            }
            Some(_) => warn!(
                run_id,
                received = stats.received,
                expected = chunks.len(),
                "receiver is missing chunks the reports confirmed"
            ),
            None => info!(
                run_id,
                rounds,
                duration_s = result.duration_s,
                throughput = result.effective_throughput,
                "transfer complete"
            ),
        }
        self.emit_finished(&result);
        Ok(result)
    }

    fn emit_finished(&self, result: &TransferResult) {
        self.events.emit(TransferEvent::Finished {
            run_id: result.run_id,
            success: result.success,
            chunks_received: result.chunks_received,
            chunks_expected: result.chunks_total,
            loss_percent: result.loss_percent,
            crc_fail: result.crc_fail_count,
            timeouts: result.timeouts,
        });
    }

    /// Drop control lines that are already waiting. Nothing the receiver
    /// sent before the next announcement can answer it.
    async fn discard_stale_replies(&mut self, run_id: u16) {
        loop {
            match read_inbound(&mut self.link, Duration::ZERO).await {
                Inbound::Message(msg) => {
                    debug!(run_id, kind = msg.kind(), stale = msg.run_id(), "discarding late reply")
                }
                Inbound::Malformed => {}
                Inbound::Timeout | Inbound::Closed => return,
            }
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if payload_capacity(self.config.mtu)? == 0 {
            return Err(ProtocolError::InvalidConfiguration(format!(
                "mtu {} leaves no room for payload",
                self.config.mtu
            )));
        }
        if self.config.window_size == 0 {
            return Err(ProtocolError::InvalidConfiguration("window_size must be at least 1".to_string()));
        }
        if self.config.max_rounds == 0 {
            return Err(ProtocolError::InvalidConfiguration("max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Wait up to the ack timeout for a message `accept` maps to `Some`.
    /// Anything else that arrives meanwhile is skipped.
    async fn await_reply<R, F>(&mut self, mut accept: F) -> Option<R>
    where
        F: FnMut(ControlMessage) -> Option<R>,
    {
        let deadline = Instant::now() + self.config.ack_timeout();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            match read_inbound(&mut self.link, remaining).await {
                Inbound::Message(msg) => {
                    let (kind, id) = (msg.kind(), msg.run_id());
                    if let Some(reply) = accept(msg) {
                        return Some(reply);
                    }
                    debug!(kind, run_id = id, "skipping unexpected control message");
                }
                Inbound::Malformed => {}
                Inbound::Timeout | Inbound::Closed => return None,
            }
        }
    }
}

/// Whether a `REPORT` answers burst number `round` announcing `seqs`.
///
/// Numbered reports must echo the round. Unnumbered ones, from receivers that
/// do not echo it, only qualify when every index they list was announced.
fn answers_burst(echoed: Option<u32>, round: u32, missing: &[u16], seqs: &[u16]) -> bool {
    match echoed {
        Some(burst) => burst == round,
        None => missing.iter().all(|seq| seqs.contains(seq)),
    }
}
