use tracing::trace;

use crate::protocol::constants::{
    CHECKSUM_SIZE, FRAME_MAGIC, FRAME_OVERHEAD, HEADER_SIZE, MAX_CHUNKS, MAX_MTU,
};
use crate::protocol::error::{FrameError, ProtocolError};
use crate::utils::crc::{append_crc32, crc32};

/// Fixed-size frame header (10 bytes, magic included)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub run_id: u16,
    pub seq: u16,
    pub total: u16,
    pub payload_len: u16,
}

impl FrameHeader {
    pub const SIZE: usize = HEADER_SIZE;

    /// Parse the fields after a verified magic. Caller guarantees `buf.len() >= SIZE`.
    fn decode(buf: &[u8]) -> Self {
        Self {
            run_id: u16::from_be_bytes([buf[2], buf[3]]),
            seq: u16::from_be_bytes([buf[4], buf[5]]),
            total: u16::from_be_bytes([buf[6], buf[7]]),
            payload_len: u16::from_be_bytes([buf[8], buf[9]]),
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&FRAME_MAGIC.to_be_bytes());
        buf[2..4].copy_from_slice(&self.run_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.seq.to_be_bytes());
        buf[6..8].copy_from_slice(&self.total.to_be_bytes());
        buf[8..10].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }
}

/// A well-formed frame with its payload already trimmed to `payload_len`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub run_id: u16,
    pub seq: u16,
    pub total: u16,
    pub payload: Vec<u8>,
}

impl DecodedFrame {
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Payload bytes one frame of `mtu` bytes can carry
pub fn payload_capacity(mtu: usize) -> Result<usize, ProtocolError> {
    if mtu < FRAME_OVERHEAD {
        return Err(ProtocolError::InvalidConfiguration(format!(
            "mtu {} is below the {} byte frame overhead",
            mtu, FRAME_OVERHEAD
        )));
    }
    if mtu > MAX_MTU {
        return Err(ProtocolError::InvalidConfiguration(format!(
            "mtu {} exceeds the maximum of {}",
            mtu, MAX_MTU
        )));
    }
    Ok(mtu - FRAME_OVERHEAD)
}

/// Build one frame: header, zero-padded chunk, CRC-32 of both.
pub fn encode_frame(
    run_id: u16,
    seq: u16,
    total: u16,
    chunk: &[u8],
    mtu: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let capacity = payload_capacity(mtu)?;
    if chunk.len() > capacity {
        return Err(ProtocolError::PayloadTooLarge {
            len: chunk.len(),
            capacity,
        });
    }

    let header = FrameHeader {
        run_id,
        seq,
        total,
        payload_len: chunk.len() as u16,
    };

    let mut frame = Vec::with_capacity(mtu);
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(chunk);
    frame.resize(HEADER_SIZE + capacity, 0);
    append_crc32(&mut frame);
    debug_assert_eq!(frame.len(), mtu);

    Ok(frame)
}

/// Validate and unpack a received frame.
///
/// The checksum is checked before `payload_len` is trusted, so corruption
/// anywhere past the magic surfaces as `ChecksumMismatch`.
pub fn decode_frame(bytes: &[u8], mtu: usize) -> Result<DecodedFrame, FrameError> {
    if bytes.len() != mtu || mtu < FRAME_OVERHEAD {
        return Err(FrameError::LengthMismatch {
            expected: mtu,
            actual: bytes.len(),
        });
    }

    let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
    if magic != FRAME_MAGIC {
        trace!(header = %hex::encode(&bytes[..HEADER_SIZE]), "rejecting frame with bad magic");
        return Err(FrameError::BadMagic(magic));
    }

    let (body, trailer) = bytes.split_at(mtu - CHECKSUM_SIZE);
    let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32(body);
    if expected != computed {
        trace!(header = %hex::encode(&bytes[..HEADER_SIZE]), "rejecting frame with bad checksum");
        return Err(FrameError::ChecksumMismatch { expected, computed });
    }

    let header = FrameHeader::decode(bytes);
    let capacity = mtu - FRAME_OVERHEAD;
    let declared = header.payload_len as usize;
    if declared > capacity {
        return Err(FrameError::MalformedLength { declared, capacity });
    }

    let payload = bytes[HEADER_SIZE..HEADER_SIZE + declared].to_vec();

    Ok(DecodedFrame {
        run_id: header.run_id,
        seq: header.seq,
        total: header.total,
        payload,
    })
}

/// Slice a payload into `ceil(len / capacity)` chunks in index order
pub fn split_payload(data: &[u8], capacity: usize) -> Result<Vec<&[u8]>, ProtocolError> {
    if capacity == 0 {
        return Err(ProtocolError::InvalidConfiguration(
            "frame capacity must be at least one byte".to_string(),
        ));
    }
    let chunks: Vec<&[u8]> = data.chunks(capacity).collect();
    if chunks.len() > MAX_CHUNKS {
        return Err(ProtocolError::TooManyChunks {
            chunks: chunks.len(),
            max: MAX_CHUNKS,
        });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTU: usize = 32;

    #[test]
    fn encode_decode_inverse() {
        let frame = encode_frame(0xBEEF, 3, 9, b"hello radio", MTU).unwrap();
        assert_eq!(frame.len(), MTU);

        let decoded = decode_frame(&frame, MTU).unwrap();
        assert_eq!(decoded.run_id, 0xBEEF);
        assert_eq!(decoded.seq, 3);
        assert_eq!(decoded.total, 9);
        assert_eq!(decoded.payload, b"hello radio");
    }

    #[test]
    fn encode_pads_with_zeros_and_is_big_endian() {
        let frame = encode_frame(0x0102, 0x0304, 0x0506, b"ab", MTU).unwrap();
        assert_eq!(&frame[..10], &[0xA5, 0x5A, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00, 0x02]);
        assert_eq!(&frame[10..12], b"ab");
        assert!(frame[12..MTU - 4].iter().all(|&b| b == 0));
    }

    #[test]
    fn full_and_empty_chunks_round_trip() {
        let capacity = MTU - FRAME_OVERHEAD;
        let full = vec![0x5Au8; capacity];
        let decoded = decode_frame(&encode_frame(1, 0, 1, &full, MTU).unwrap(), MTU).unwrap();
        assert_eq!(decoded.payload, full);

        let decoded = decode_frame(&encode_frame(1, 0, 1, &[], MTU).unwrap(), MTU).unwrap();
        assert_eq!(decoded.payload_len(), 0);
    }

    #[test]
    fn minimal_mtu_carries_no_payload() {
        let frame = encode_frame(7, 0, 1, &[], FRAME_OVERHEAD).unwrap();
        assert_eq!(frame.len(), FRAME_OVERHEAD);
        assert!(decode_frame(&frame, FRAME_OVERHEAD).is_ok());
        assert_eq!(
            encode_frame(7, 0, 1, &[1], FRAME_OVERHEAD),
            Err(ProtocolError::PayloadTooLarge { len: 1, capacity: 0 })
        );
    }

    #[test]
    fn encode_rejects_bad_configuration() {
        assert!(matches!(
            encode_frame(1, 0, 1, &[], 13),
            Err(ProtocolError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            encode_frame(1, 0, 1, &[0u8; 19], MTU),
            Err(ProtocolError::PayloadTooLarge { len: 19, capacity: 18 })
        ));
    }

    #[test]
    fn single_bit_flips_are_always_caught() {
        let frame = encode_frame(0x1234, 5, 6, b"payload bytes", MTU).unwrap();

        for bit in 0..frame.len() * 8 {
            let mut corrupted = frame.clone();
            corrupted[bit / 8] ^= 1 << (bit % 8);

            let err = decode_frame(&corrupted, MTU).unwrap_err();
            if bit < 16 {
                assert!(matches!(err, FrameError::BadMagic(_)), "bit {}: {:?}", bit, err);
            } else {
                assert!(
                    matches!(err, FrameError::ChecksumMismatch { .. }),
                    "bit {}: {:?}",
                    bit,
                    err
                );
            }
        }
    }

    #[test]
    fn wrong_length_is_rejected_first() {
        let frame = encode_frame(1, 0, 1, b"x", MTU).unwrap();
        assert_eq!(
            decode_frame(&frame[..MTU - 1], MTU),
            Err(FrameError::LengthMismatch { expected: MTU, actual: MTU - 1 })
        );
        // Garbage of the wrong size never reaches the magic check
        assert!(matches!(
            decode_frame(&[0u8; 3], MTU),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn oversized_declared_length_with_valid_checksum() {
        let mut frame = encode_frame(1, 0, 1, b"x", MTU).unwrap();
        frame[8..10].copy_from_slice(&500u16.to_be_bytes());
        frame.truncate(MTU - CHECKSUM_SIZE);
        append_crc32(&mut frame);

        assert_eq!(
            decode_frame(&frame, MTU),
            Err(FrameError::MalformedLength { declared: 500, capacity: MTU - FRAME_OVERHEAD })
        );
    }

    #[test]
    fn split_then_concat_restores_payload() {
        for mtu in [15usize, 16, 64, 128] {
            let capacity = payload_capacity(mtu).unwrap();
            for len in [0usize, 1, capacity - 1, capacity, capacity + 1, 1000] {
                let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
                let chunks = split_payload(&data, capacity).unwrap();
                assert_eq!(chunks.len(), len.div_ceil(capacity));

                let rebuilt: Vec<u8> = chunks
                    .iter()
                    .enumerate()
                    .map(|(i, c)| encode_frame(9, i as u16, chunks.len() as u16, c, mtu).unwrap())
                    .flat_map(|f| decode_frame(&f, mtu).unwrap().payload)
                    .collect();
                assert_eq!(rebuilt, data);
            }
        }
    }

    #[test]
    fn split_refuses_more_chunks_than_fit_in_a_session() {
        let data = vec![0u8; MAX_CHUNKS + 1];
        assert_eq!(
            split_payload(&data, 1).unwrap_err(),
            ProtocolError::TooManyChunks { chunks: MAX_CHUNKS + 1, max: MAX_CHUNKS }
        );
    }
}
