pub mod constants;
pub mod control;
pub mod error;
pub mod frame;

pub use constants::*;
pub use control::{ControlMessage, Inbound, Metadata};
pub use error::{FrameError, ProtocolError};
pub use frame::{decode_frame, encode_frame, payload_capacity, split_payload, DecodedFrame};
