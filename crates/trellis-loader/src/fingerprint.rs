//! Content fingerprints for tracked module sources.
//!
//! The loader hashes every source it reads and compares the hash on each
//! file-system notification: a notification that does not change the hash is
//! editor noise (save-without-change, touch) and must not trigger a reload.

use sha2::{Digest, Sha256};

/// SHA-256 digest of a module source.
pub type Fingerprint = [u8; 32];

/// Computes the fingerprint of `source`.
pub fn fingerprint(source: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(source);
    hasher.finalize().into()
}
