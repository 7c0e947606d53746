//! Stream-id minting: a 16-byte opaque identifier rendered as 32 lowercase
//! hex characters, `[ms-since-epoch: u64 BE | counter: u32 BE | random: 4B]`.
//! The counter is the uniqueness guard within a millisecond bucket;
//! randomness is only a defense against cross-process collisions, not the
//! primary one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct StreamIdMinter {
    counter: AtomicU32,
}

impl StreamIdMinter {
    pub fn new() -> Self {
        StreamIdMinter { counter: AtomicU32::new(0) }
    }

    /// Mints a new stream id. Must be called while the registry mutex that
    /// owns this minter is held, matching the coordinator's locking
    /// discipline for `GenerateStreamId`.
    pub fn mint(&self) -> String {
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let random: u32 = rand::random();

        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&millis.to_be_bytes());
        bytes[8..12].copy_from_slice(&counter.to_be_bytes());
        bytes[12..16].copy_from_slice(&random.to_be_bytes());

        hex::encode(bytes)
    }
}

impl Default for StreamIdMinter {
    fn default() -> Self {
        StreamIdMinter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn mints_32_char_lowercase_hex() {
        let minter = StreamIdMinter::new();
        let id = minter.mint();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn distinct_within_the_same_millisecond() {
        let minter = StreamIdMinter::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(minter.mint()));
        }
    }
}
