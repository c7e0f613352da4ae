use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Computes the SHA-256 checksum of the provided data.
pub fn compute_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex-encodes a checksum, matching the textual form `ShardFileInfo`
/// manifests carry on disk.
pub fn to_hex(checksum: &[u8; 32]) -> String {
    checksum.iter().map(|b| format!("{b:02x}")).collect()
}

/// Verifies `data` against an `expected` checksum produced by
/// [`compute_checksum`], failing with `Error::ShardUnpackFailed`-worthy
/// detail when the unpacked bytes don't match what the manifest promised.
pub fn verify_checksum(data: &[u8], expected: &[u8; 32]) -> Result<()> {
    let actual = compute_checksum(data);
    if actual == *expected {
        Ok(())
    } else {
        Err(Error::Storage(format!(
            "checksum mismatch: expected {}, got {}",
            to_hex(expected),
            to_hex(&actual)
        )))
    }
}
