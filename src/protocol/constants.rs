//! Wire constants for the rflink radio protocol

/// Frame start sentinel
pub const FRAME_MAGIC: u16 = 0xA55A;

/// magic + run_id + seq + total + payload_len
pub const HEADER_SIZE: usize = 10;

/// Trailing CRC-32
pub const CHECKSUM_SIZE: usize = 4;

/// Bytes of every frame not available to payload
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Largest MTU a 16-bit `payload_len` field can describe
pub const MAX_MTU: usize = u16::MAX as usize;

/// `seq` and `total` are 16-bit on the wire
pub const MAX_CHUNKS: usize = u16::MAX as usize;

/// Control lines longer than this are discarded as noise
pub const MAX_CONTROL_LINE: usize = 64 * 1024;

/// Control message delimiter
pub const CONTROL_DELIMITER: u8 = b'\n';
