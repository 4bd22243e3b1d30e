//! Block content hashing.

use sha2::{Digest, Sha256};

/// Computes the canonical block id: SHA-256 over the ASCII decimal
/// height concatenated with each transaction id in order, no
/// separators, encoded as lowercase hex.
///
/// The separator-free encoding is part of the wire contract and must
/// not be changed.
pub fn block_id<'a>(height: u64, tx_ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(height.to_string().as_bytes());
    for id in tx_ids {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}
