//! Reliable payload delivery over a slow, lossy, half-duplex radio link.
//!
//! A [`Transmitter`] splits a payload into fixed-size CRC-protected frames and
//! pushes them in bounded, paced bursts; a [`Receiver`] reports which frames of
//! each burst it is still missing until everything arrives or the round budget
//! runs out. Both run over any `AsyncRead + AsyncWrite` byte stream.

pub mod config;
pub mod metrics;
pub mod protocol;
pub mod receiver;
pub mod results;
pub mod transfer;
pub mod transmitter;
pub mod transport;
pub mod utils;

pub use config::{LinkConfig, ReceiverConfig, TransmitterConfig, TransportConfig};
pub use protocol::{ControlMessage, FrameError, Metadata, ProtocolError};
pub use receiver::Receiver;
pub use transfer::{EventSender, FailureReason, ReceivedTransfer, TransferEvent, TransferResult};
pub use transmitter::Transmitter;
