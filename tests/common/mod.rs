//! Shared fixtures: in-memory links and a relay that can drop or mangle frames.

#![allow(dead_code)]

use std::time::Duration;

use rflink::protocol::FRAME_MAGIC;
use rflink::{ReceiverConfig, TransmitterConfig};
use tokio::io::{
    duplex, split, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream,
};
use tokio::task::JoinHandle;

pub const LINK_BUFFER: usize = 64 * 1024;

pub fn tx_config(mtu: usize, window_size: usize, max_rounds: u32) -> TransmitterConfig {
    TransmitterConfig {
        mtu,
        gap_ms: 0,
        window_size,
        max_rounds,
        ack_timeout_ms: 2_000,
    }
}

pub fn rx_config() -> ReceiverConfig {
    ReceiverConfig {
        sync_timeout_ms: 2_000,
        message_timeout_ms: 2_000,
        frame_timeout_ms: 100,
        max_idle_waits: 3,
    }
}

pub const SYNC_WAIT: Duration = Duration::from_secs(2);

/// Deterministic, non-repeating test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Two link ends joined by a relay task.
///
/// Traffic from the first end toward the second is split into control lines
/// and `mtu`-sized frames; `policy` sees every frame with its running index
/// and returns `false` to drop it. Traffic in the other direction is copied
/// untouched.
pub fn lossy_link<F>(mtu: usize, mut policy: F) -> (DuplexStream, DuplexStream, JoinHandle<()>)
where
    F: FnMut(u64, &mut Vec<u8>) -> bool + Send + 'static,
{
    let (tx_end, relay_tx) = duplex(LINK_BUFFER);
    let (relay_rx, rx_end) = duplex(LINK_BUFFER);

    let handle = tokio::spawn(async move {
        let (tx_read, mut tx_write) = split(relay_tx);
        let (mut rx_read, mut rx_write) = split(relay_rx);

        let backward = tokio::spawn(async move {
            let _ = tokio::io::copy(&mut rx_read, &mut tx_write).await;
        });

        let mut reader = BufReader::new(tx_read);
        let mut frames = 0u64;
        loop {
            let first = match reader.fill_buf().await {
                Ok([]) | Err(_) => break,
                Ok(buf) => buf[0],
            };

            let forward = if first == (FRAME_MAGIC >> 8) as u8 {
                let mut frame = vec![0u8; mtu];
                if reader.read_exact(&mut frame).await.is_err() {
                    break;
                }
                let keep = policy(frames, &mut frame);
                frames += 1;
                keep.then_some(frame)
            } else {
                let mut line = Vec::new();
                if reader.read_until(b'\n', &mut line).await.is_err() {
                    break;
                }
                Some(line)
            };

            if let Some(bytes) = forward {
                if rx_write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        }

        let _ = rx_write.shutdown().await;
        backward.abort();
    });

    (tx_end, rx_end, handle)
}

pub fn perfect_link(mtu: usize) -> (DuplexStream, DuplexStream, JoinHandle<()>) {
    lossy_link(mtu, |_, _| true)
}
