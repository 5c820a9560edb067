//! Reactive end of a transfer.
//!
//! The receiver never initiates. It waits for `SYNC`, answers every `BURST`
//! with a `REPORT` and every `END` with a `FINAL`, leaving pacing and retry
//! decisions to the transmitter.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::bail;
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ReceiverConfig;
use crate::metrics::loss_percent;
use crate::protocol::control::{read_inbound, send_message};
use crate::protocol::{decode_frame, ControlMessage, Inbound, Metadata, FRAME_OVERHEAD, MAX_MTU};
use crate::transfer::{EventSender, EventSink, ReceivedTransfer, TransferEvent};
use crate::utils::io::read_exact_within;

/// Chunk slots of one session, addressed by index rather than arrival order
#[derive(Debug, Clone)]
pub struct ChunkSlots {
    slots: Vec<Option<Vec<u8>>>,
}

impl ChunkSlots {
    pub fn new(total: usize) -> Self {
        Self { slots: vec![None; total] }
    }

    /// Fill slot `seq`, overwriting any earlier copy. `false` if out of range.
    pub fn store(&mut self, seq: u16, payload: Vec<u8>) -> bool {
        match self.slots.get_mut(seq as usize) {
            Some(slot) => {
                *slot = Some(payload);
                true
            }
            None => false,
        }
    }

    pub fn received(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Concatenate filled slots in index order and trim to `total_size`
    pub fn assemble(&self, total_size: usize) -> Vec<u8> {
        let mut data: Vec<u8> = self.slots.iter().flatten().flatten().copied().collect();
        data.truncate(total_size);
        data
    }
}

/// Receiver-side state between `SYNC` and `END`
#[derive(Debug)]
struct RxSession {
    run_id: u16,
    mtu: usize,
    total_size: usize,
    metadata: Metadata,
    slots: ChunkSlots,
    crc_fail: u32,
    timeouts: u32,
    bursts: u32,
}

pub struct Receiver<T> {
    link: BufStream<T>,
    config: ReceiverConfig,
    events: EventSink,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Receiver<T> {
    pub fn new(transport: T, config: ReceiverConfig) -> Self {
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

    /// Run one session: wait up to `sync_timeout` for a transmitter, then
    /// follow it until `END`.
    ///
    /// `Ok(None)` when no session started or an open session went silent.
    /// Errors only when the transport itself fails.
    pub async fn receive_once(&mut self, sync_timeout: Duration) -> anyhow::Result<Option<ReceivedTransfer>> {
        let Some(session) = self.await_sync(sync_timeout).await? else {
            return Ok(None);
        };
        self.run_session(session).await
    }

    /// Like [`receive_once`](Self::receive_once) but returns the payload as
    /// text, and only for a complete transfer.
    pub async fn receive_text_once(&mut self, sync_timeout: Duration) -> anyhow::Result<Option<String>> {
        Ok(self
            .receive_once(sync_timeout)
            .await?
            .filter(|t| t.success)
            .map(|t| t.text()))
    }

    async fn await_sync(&mut self, sync_timeout: Duration) -> anyhow::Result<Option<RxSession>> {
        let deadline = Instant::now() + sync_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("no SYNC within {:?}", sync_timeout);
                return Ok(None);
            }

            match read_inbound(&mut self.link, remaining).await {
                Inbound::Message(ControlMessage::Sync { run_id, mtu, count, total_size, window, meta }) => {
                    if !(FRAME_OVERHEAD..=MAX_MTU).contains(&mtu) {
                        warn!(run_id, mtu, "ignoring SYNC with unusable mtu");
                        continue;
                    }

                    send_message(&mut self.link, &ControlMessage::SyncAck { run_id }).await?;
                    info!(run_id, mtu, chunks = count, total_size, window, "session opened");
                    self.events.emit(TransferEvent::SyncReceived { run_id, mtu, chunks: count, total_size });

                    return Ok(Some(RxSession {
                        run_id,
                        mtu,
                        total_size: total_size as usize,
                        metadata: meta,
                        slots: ChunkSlots::new(count as usize),
                        crc_fail: 0,
                        timeouts: 0,
                        bursts: 0,
                    }));
                }
                Inbound::Message(other) => {
                    debug!(kind = other.kind(), run_id = other.run_id(), "ignoring message while awaiting SYNC");
                }
                Inbound::Malformed => {}
                Inbound::Timeout => return Ok(None),
                Inbound::Closed => bail!("link closed while awaiting SYNC"),
            }
        }
    }

    async fn run_session(&mut self, mut session: RxSession) -> anyhow::Result<Option<ReceivedTransfer>> {
        let mut idle_waits = 0;

        loop {
            match read_inbound(&mut self.link, self.config.message_timeout()).await {
                Inbound::Message(ControlMessage::Burst { run_id, burst, seqs }) if run_id == session.run_id => {
                    idle_waits = 0;
                    self.receive_burst(&mut session, burst, &seqs).await?;
                    continue;
                }
                Inbound::Message(ControlMessage::End { run_id }) if run_id == session.run_id => {
                    return self.finish(session).await.map(Some);
                }
                Inbound::Message(other) => {
                    debug!(
                        kind = other.kind(),
                        run_id = other.run_id(),
                        session = session.run_id,
                        "ignoring message outside session"
                    );
                }
                Inbound::Malformed | Inbound::Timeout => {}
                Inbound::Closed => bail!("link closed during session {}", session.run_id),
            }

            // Silence and traffic for other sessions both count as idle
            idle_waits += 1;
            if idle_waits >= self.config.max_idle_waits {
                warn!(
                    run_id = session.run_id,
                    received = session.slots.received(),
                    expected = session.slots.total(),
                    "no traffic for this session, abandoning it"
                );
                return Ok(None);
            }
        }
    }

    async fn receive_burst(
        &mut self,
        session: &mut RxSession,
        burst: Option<u32>,
        seqs: &[u16],
    ) -> anyhow::Result<()> {
        session.bursts += 1;
        let mut missing: BTreeSet<u16> = seqs.iter().copied().collect();
        let frame_timeout = self.config.frame_timeout();

        for attempt in 1..=seqs.len() {
            let Some(raw) = read_exact_within(&mut self.link, session.mtu, frame_timeout).await? else {
                session.timeouts += 1;
                debug!(
                    run_id = session.run_id,
                    "timed out reading frame {}/{} (timeouts={})",
                    attempt,
                    seqs.len(),
                    session.timeouts
                );
                break;
            };

            match decode_frame(&raw, session.mtu) {
                Ok(frame) if frame.run_id == session.run_id => {
                    let seq = frame.seq;
                    if session.slots.store(seq, frame.payload) {
                        missing.remove(&seq);
                        trace!(run_id = session.run_id, seq, "stored chunk");
                    } else {
                        session.crc_fail += 1;
                        debug!(run_id = session.run_id, seq, "frame index outside session");
                    }
                }
                Ok(frame) => {
                    session.crc_fail += 1;
                    debug!(run_id = session.run_id, foreign = frame.run_id, "discarding frame from another run");
                }
                Err(e) => {
                    session.crc_fail += 1;
                    debug!(run_id = session.run_id, "discarding frame: {} (crc_fail={})", e, session.crc_fail);
                }
            }
        }

        let missing: Vec<u16> = missing.into_iter().collect();
        let received_total = session.slots.received();
        debug!(
            run_id = session.run_id,
            burst = seqs.len(),
            missing = missing.len(),
            received_total,
            "burst report"
        );

        self.events.emit(TransferEvent::Report {
            run_id: session.run_id,
            round: burst.unwrap_or(session.bursts),
            pending: session.slots.total() - received_total,
            missing: missing.len(),
            crc_fail: session.crc_fail,
            timeouts: session.timeouts,
        });

        let report = ControlMessage::Report {
            run_id: session.run_id,
            burst,
            missing,
            received_total,
            crc_fail: session.crc_fail,
            timeouts: session.timeouts,
        };
        send_message(&mut self.link, &report).await
    }

    async fn finish(&mut self, session: RxSession) -> anyhow::Result<ReceivedTransfer> {
        let expected = session.slots.total();
        let received = session.slots.received();
        let loss = loss_percent(expected, received);

        send_message(
            &mut self.link,
            &ControlMessage::Final {
                run_id: session.run_id,
                received,
                expected,
                loss,
                crc_fail: session.crc_fail,
                timeouts: session.timeouts,
            },
        )
        .await?;

        let data = session.slots.assemble(session.total_size);
        info!(
            run_id = session.run_id,
            received,
            expected,
            loss_percent = loss,
            crc_fail = session.crc_fail,
            timeouts = session.timeouts,
            "session closed"
        );
        self.events.emit(TransferEvent::Finished {
            run_id: session.run_id,
            success: received == expected,
            chunks_received: received,
            chunks_expected: expected,
            loss_percent: loss,
            crc_fail: session.crc_fail,
            timeouts: session.timeouts,
        });

        Ok(ReceivedTransfer {
            success: received == expected,
            run_id: session.run_id,
            bytes: data.len(),
            data,
            metadata: session.metadata,
            chunks_received: received,
            chunks_expected: expected,
            loss_percent: loss,
            crc_fail_count: session.crc_fail,
            timeouts: session.timeouts,
        })
    }
}
