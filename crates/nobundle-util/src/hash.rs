/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Short content id: the first 8 hex characters of the BLAKE3 digest of `text`.
///
/// Used for stable, human-scannable identifiers such as SFC descriptor ids.
#[must_use]
pub fn short_hash(text: &str) -> String {
    let mut hex = blake3_bytes(text.as_bytes());
    hex.truncate(8);
    hex
}
