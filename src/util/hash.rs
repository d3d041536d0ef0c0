//! Stable hashing for sharding and seeding
//!
//! Game IDs must map to the same worker (and the same random seed) across
//! process restarts, so everything here is keyed off SHA-256 rather than the
//! process-randomized `std` hasher.

use sha2::{Digest, Sha256};

/// Hash an identifier to a stable u64.
pub fn stable_hash64(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Deterministically map a game ID to a worker index.
pub fn worker_index(game_id: &str, num_workers: usize) -> usize {
    debug_assert!(num_workers > 0);
    (stable_hash64(game_id) % num_workers as u64) as usize
}

/// Port a worker listens on, relative to the master's base port.
pub fn worker_port(base_port: u16, index: usize) -> u16 {
    base_port + 1 + index as u16
}

/// Path prefix a worker's routes are nested under.
pub fn worker_path(index: usize) -> String {
    format!("/w{}", index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        // Routing must survive restarts: same input, same output, always.
        let a = stable_hash64("abc123");
        let b = stable_hash64("abc123");
        assert_eq!(a, b);
        assert_ne!(stable_hash64("abc123"), stable_hash64("abc124"));
    }

    #[test]
    fn routing_is_pure_and_bounded() {
        for n in 1..8 {
            let idx = worker_index("some-game", n);
            assert!(idx < n);
            assert_eq!(idx, worker_index("some-game", n));
        }
    }

    #[test]
    fn worker_addressing() {
        assert_eq!(worker_port(3000, 0), 3001);
        assert_eq!(worker_port(3000, 3), 3004);
        assert_eq!(worker_path(2), "/w2");
    }
}
