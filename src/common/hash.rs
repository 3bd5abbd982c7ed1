//! Hashing utilities for fleetcoord
//!
//! BLAKE3 gives the same value for a key in every process, so two callers
//! routing the same key against the same instance list agree on the target.

/// 64-bit hash of a routing key (first 8 bytes of BLAKE3, little endian)
pub fn hash_key(key: &str) -> u64 {
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Index-modulo placement of a key over `len` slots.
///
/// This is plain modulo hashing: changing `len` remaps most keys.
/// Returns `None` when there are no slots.
pub fn modulo_index(key: &str, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some((hash_key(key) % len as u64) as usize)
}
