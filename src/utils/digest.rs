use sha2::{Digest, Sha256};

/// Hex SHA-256 of a payload, printed on both ends so operators can compare
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
