//! Content hashing and timestamps for change detection.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// SHA-256 of `content`, lowercase hex.
pub fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Get current UTC timestamp in seconds since UNIX_EPOCH
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}
