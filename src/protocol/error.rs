use std::fmt;

/// Misconfiguration detected before anything touches the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidConfiguration(String),
    PayloadTooLarge { len: usize, capacity: usize },
    TooManyChunks { chunks: usize, max: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidConfiguration(reason) =>
                write!(f, "invalid configuration: {}", reason),
            ProtocolError::PayloadTooLarge { len, capacity } =>
                write!(f, "payload chunk of {} bytes exceeds frame capacity {}", len, capacity),
            ProtocolError::TooManyChunks { chunks, max } =>
                write!(f, "payload needs {} chunks, at most {} fit a session", chunks, max),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Why a received frame was rejected. Always a counted, recoverable outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    LengthMismatch { expected: usize, actual: usize },
    BadMagic(u16),
    ChecksumMismatch { expected: u32, computed: u32 },
    MalformedLength { declared: usize, capacity: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::LengthMismatch { expected, actual } =>
                write!(f, "frame length {} does not match mtu {}", actual, expected),
            FrameError::BadMagic(magic) =>
                write!(f, "bad frame magic {:#06x}", magic),
            FrameError::ChecksumMismatch { expected, computed } =>
                write!(f, "checksum mismatch: expected={:08x}, computed={:08x}", expected, computed),
            FrameError::MalformedLength { declared, capacity } =>
                write!(f, "declared payload length {} exceeds capacity {}", declared, capacity),
        }
    }
}

impl std::error::Error for FrameError {}
