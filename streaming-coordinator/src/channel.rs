//! Channel registry (C9): the coordinator's channel state machine,
//! acquire/release with refcount, and encoder registration/assignment.
//!
//! Locking discipline mirrors the distilled source: a registry mutex
//! guards the map of channel entries; each channel additionally has its
//! own mutex guarding its mutable fields. `acquire` takes the registry
//! lock only long enough to find-or-create the entry and bump its
//! refcount, then drops it before taking the per-channel lock — so no
//! caller ever holds the registry lock while doing channel work. `release`
//! takes the per-channel lock to decrement the refcount and, if it has
//! reached zero and the channel is closed, reacquires the registry lock
//! to remove the entry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::stream_id::StreamIdMinter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMethod {
    Rtmp,
    Ws,
}

#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub stream_id: String,
    pub cancelled: bool,
}

#[derive(Default)]
pub struct ChannelState {
    pub stream_id: Option<String>,
    pub publisher_session_id: Option<u64>,
    pub encoder_session_id: Option<u64>,
    pub publish_method: Option<PublishMethod>,
    pub closed: bool,
    pub next_event_id: u64,
    pub pending_events: HashMap<u64, PendingEvent>,
}

impl ChannelState {
    pub fn new_closed() -> Self {
        ChannelState { closed: true, ..ChannelState::default() }
    }
}

struct ChannelEntry {
    refcount: AtomicU64,
    state: Mutex<ChannelState>,
}

/// An exclusively-held reference to one channel's state. Must be released
/// via [`ChannelRegistry::release`] exactly once.
pub struct ChannelHandle {
    id: String,
    entry: Arc<ChannelEntry>,
}

impl ChannelHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        let mut guard = self.entry.state.lock();
        f(&mut guard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncoderId(pub u64);

struct EncoderEntry {
    capacity: i64,
    load: i64,
    first_seen: u64,
}

pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<ChannelEntry>>>,
    encoders: Mutex<HashMap<EncoderId, EncoderEntry>>,
    minter: StreamIdMinter,
    next_seen_counter: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry {
            channels: Mutex::new(HashMap::new()),
            encoders: Mutex::new(HashMap::new()),
            minter: StreamIdMinter::new(),
            next_seen_counter: AtomicU64::new(0),
        }
    }

    pub fn mint_stream_id(&self) -> String {
        self.minter.mint()
    }

    /// Returns an exclusively-held handle for `channel_id`, creating a
    /// closed entry if one doesn't exist yet, and bumps its refcount.
    pub fn acquire(&self, channel_id: &str) -> ChannelHandle {
        let mut channels = self.channels.lock();
        let entry = channels
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(ChannelEntry { refcount: AtomicU64::new(0), state: Mutex::new(ChannelState::new_closed()) }))
            .clone();
        entry.refcount.fetch_add(1, Ordering::SeqCst);
        drop(channels);

        ChannelHandle { id: channel_id.to_string(), entry }
    }

    /// Releases a previously-acquired handle. If the refcount drops to zero
    /// and the channel is closed, the entry is removed from the registry.
    pub fn release(&self, handle: ChannelHandle) {
        let remaining = handle.entry.refcount.fetch_sub(1, Ordering::SeqCst) - 1;
        let closed = handle.entry.state.lock().closed;

        if remaining == 0 && closed {
            let mut channels = self.channels.lock();
            // Re-check under the registry lock: another acquire may have
            // raced in between the fetch_sub above and taking this lock.
            if let Some(current) = channels.get(&handle.id) {
                if Arc::ptr_eq(current, &handle.entry) && current.refcount.load(Ordering::SeqCst) == 0 {
                    channels.remove(&handle.id);
                }
            }
        }
    }

    pub fn register_encoder(&self, id: EncoderId, capacity: i64) {
        let first_seen = self.next_seen_counter.fetch_add(1, Ordering::SeqCst);
        self.encoders.lock().insert(id, EncoderEntry { capacity, load: 0, first_seen });
    }

    pub fn deregister_encoder(&self, id: EncoderId) {
        self.encoders.lock().remove(&id);
    }

    /// Scans registered encoders and returns the one with minimum load
    /// among those with unbounded capacity (`capacity < 0`) or spare
    /// capacity (`load < capacity`), breaking ties by first-seen order.
    /// Atomically increments the chosen encoder's load.
    pub fn assign_available_encoder(&self) -> Option<EncoderId> {
        let mut encoders = self.encoders.lock();
        let chosen = encoders
            .iter()
            .filter(|(_, e)| e.capacity < 0 || e.load < e.capacity)
            .min_by_key(|(_, e)| (e.load, e.first_seen))
            .map(|(id, _)| *id)?;

        if let Some(entry) = encoders.get_mut(&chosen) {
            entry.load += 1;
        }
        Some(chosen)
    }

    /// Decrements an encoder's load, clamped at zero.
    pub fn release_encoder(&self, id: EncoderId) {
        if let Some(entry) = self.encoders.lock().get_mut(&id) {
            entry.load = (entry.load - 1).max(0);
        }
    }

    /// Aggregate capacity for `GET /commands/capacity`: total load, total
    /// capacity (`-1` if any registered encoder is unbounded), and encoder
    /// count.
    pub fn capacity_report(&self) -> (i64, i64, usize) {
        let encoders = self.encoders.lock();
        let load: i64 = encoders.values().map(|e| e.load).sum();
        let capacity = if encoders.values().any(|e| e.capacity < 0) {
            -1
        } else {
            encoders.values().map(|e| e.capacity).sum()
        };
        (load, capacity, encoders.len())
    }

    /// Snapshot of every registered encoder, for `GET /commands/report`.
    pub fn list_encoders(&self) -> Vec<(EncoderId, i64, i64)> {
        self.encoders.lock().iter().map(|(id, e)| (*id, e.capacity, e.load)).collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        ChannelRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_a_closed_channel() {
        let registry = ChannelRegistry::new();
        let handle = registry.acquire("ch1");
        assert!(handle.with_state(|s| s.closed));
        registry.release(handle);
    }

    #[test]
    fn release_with_refcount_zero_and_closed_removes_the_entry() {
        let registry = ChannelRegistry::new();
        let handle = registry.acquire("ch1");
        registry.release(handle);

        assert_eq!(registry.channels.lock().len(), 0);
    }

    #[test]
    fn release_keeps_entry_while_open() {
        let registry = ChannelRegistry::new();
        let handle = registry.acquire("ch1");
        handle.with_state(|s| s.closed = false);
        registry.release(handle);

        assert_eq!(registry.channels.lock().len(), 1);
    }

    #[test]
    fn encoder_assignment_picks_least_loaded_with_first_seen_tiebreak() {
        let registry = ChannelRegistry::new();
        registry.register_encoder(EncoderId(1), 10);
        registry.register_encoder(EncoderId(2), 10);

        assert_eq!(registry.assign_available_encoder(), Some(EncoderId(1)));
        assert_eq!(registry.assign_available_encoder(), Some(EncoderId(2)));
        // Both now at load 1; id 1 was first-seen so it wins the tie again.
        assert_eq!(registry.assign_available_encoder(), Some(EncoderId(1)));
    }

    #[test]
    fn full_capacity_encoders_are_skipped() {
        let registry = ChannelRegistry::new();
        registry.register_encoder(EncoderId(1), 1);
        assert_eq!(registry.assign_available_encoder(), Some(EncoderId(1)));
        assert_eq!(registry.assign_available_encoder(), None);

        registry.release_encoder(EncoderId(1));
        assert_eq!(registry.assign_available_encoder(), Some(EncoderId(1)));
    }

    #[test]
    fn unbounded_capacity_encoder_is_always_available() {
        let registry = ChannelRegistry::new();
        registry.register_encoder(EncoderId(1), -1);
        for _ in 0..1000 {
            assert_eq!(registry.assign_available_encoder(), Some(EncoderId(1)));
        }
    }

    #[test]
    fn release_encoder_load_clamps_at_zero() {
        let registry = ChannelRegistry::new();
        registry.register_encoder(EncoderId(1), -1);
        registry.release_encoder(EncoderId(1));
        registry.release_encoder(EncoderId(1));
        assert_eq!(registry.assign_available_encoder(), Some(EncoderId(1)));
    }
}
