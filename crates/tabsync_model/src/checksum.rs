//! Change-detection checksums.

use crate::record::Record;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Computes a checksum over a record's canonical serialization.
///
/// The backing map keeps field names sorted, so two records with the same
/// fields produce the same bytes regardless of insertion order.
///
/// This is a *change-detection* checksum, not a security control: it only
/// needs to be stable and collision-resistant enough that two successive
/// versions of the same record are unlikely to collide. SHA-256 is used
/// because it is already in the dependency set; any stable digest would do.
pub fn record_checksum(record: &Record) -> String {
    // Serializing a JSON object with string keys cannot fail.
    let canonical = serde_json::to_vec(record).unwrap_or_default();

    let digest = Sha256::digest(&canonical);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
