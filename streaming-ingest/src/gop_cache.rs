//! GOP cache (§4.5): the publisher-side rolling buffer of recent binary
//! chunks flushed to newly-joined players, with byte accounting that
//! charges a fixed per-chunk bookkeeping overhead in addition to payload
//! size.
//!
//! Grounded on `original_source/ws-stream-server/session_publisher.go`'s
//! `HandleChunk` (append-then-evict-while-over-limit) and its
//! `DATA_STREAM_PACKET_BASE_SIZE` constant.

use bytes::Bytes;
use std::collections::VecDeque;

pub const PER_CHUNK_OVERHEAD: usize = 16;

pub struct GopCache {
    chunks: VecDeque<Bytes>,
    total_bytes: usize,
    limit_bytes: usize,
    disabled: bool,
}

impl GopCache {
    pub fn new(limit_bytes: usize) -> Self {
        GopCache { chunks: VecDeque::new(), total_bytes: 0, limit_bytes, disabled: false }
    }

    pub fn push(&mut self, chunk: Bytes) {
        if self.disabled {
            return;
        }
        self.total_bytes += chunk.len() + PER_CHUNK_OVERHEAD;
        self.chunks.push_back(chunk);
        while self.total_bytes > self.limit_bytes {
            let Some(removed) = self.chunks.pop_front() else { break };
            self.total_bytes -= removed.len() + PER_CHUNK_OVERHEAD;
        }
    }

    pub fn snapshot(&self) -> Vec<Bytes> {
        self.chunks.iter().cloned().collect()
    }

    /// Irreversibly disables further caching and drops what's buffered.
    /// Requested once per publisher lifetime by a `receive-clear-cache`
    /// player.
    pub fn disable(&mut self) {
        self.disabled = true;
        self.chunks.clear();
        self.total_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_chunks_once_over_the_byte_limit() {
        let mut cache = GopCache::new(50);
        cache.push(Bytes::from_static(b"0123456789")); // 10 + 16 = 26
        cache.push(Bytes::from_static(b"0123456789")); // total 52 > 50, evicts first
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[test]
    fn disable_clears_and_stops_future_caching() {
        let mut cache = GopCache::new(1000);
        cache.push(Bytes::from_static(b"a"));
        cache.disable();
        assert!(cache.snapshot().is_empty());
        cache.push(Bytes::from_static(b"b"));
        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn empty_cache_snapshot_is_empty() {
        let cache = GopCache::new(1000);
        assert!(cache.snapshot().is_empty());
    }
}
