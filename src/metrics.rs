//! Link arithmetic shared by both session ends and the result records.

use std::time::Duration;

use crate::protocol::FRAME_OVERHEAD;

/// Bits on the wire per byte for 8N1 serial framing
pub const BITS_PER_BYTE: u32 = 10;

/// Percentage of `expected` chunks that never arrived. An empty session loses nothing.
pub fn loss_percent(expected: usize, received: usize) -> f64 {
    let lost = expected.saturating_sub(received);
    lost as f64 / expected.max(1) as f64 * 100.0
}

/// CRC failures relative to the number of chunks the session needed
pub fn crc_failure_percent(crc_fail: u32, expected: usize) -> f64 {
    crc_fail as f64 / expected.max(1) as f64 * 100.0
}

/// Time one `mtu`-byte frame occupies the air at `baud_rate`
pub fn frame_airtime(mtu: usize, baud_rate: u32) -> Duration {
    let bits = mtu as f64 * BITS_PER_BYTE as f64;
    Duration::from_secs_f64(bits / baud_rate.max(1) as f64)
}

/// Best-case payload throughput in bytes/s for a given frame size and air gap
pub fn expected_throughput(mtu: usize, gap_ms: u64, baud_rate: u32) -> f64 {
    let payload = mtu.saturating_sub(FRAME_OVERHEAD) as f64;
    let per_frame = frame_airtime(mtu, baud_rate).as_secs_f64() + gap_ms as f64 / 1000.0;
    payload / per_frame.max(1e-6)
}

/// Throughput discounted by loss; the figure configurations are ranked by
pub fn goodput(throughput: f64, loss_percent: f64) -> f64 {
    throughput * (1.0 - loss_percent / 100.0)
}
