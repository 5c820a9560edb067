use crc32fast::Hasher;

/// CRC-32 (IEEE polynomial, zlib-compatible) of a byte slice
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Append the big-endian CRC-32 of everything already in `buf`
pub fn append_crc32(buf: &mut Vec<u8>) {
    let checksum = crc32(buf);
    buf.extend_from_slice(&checksum.to_be_bytes());
}
