//! Local channel registry (C7): per-channel publisher/player bookkeeping
//! for this ingest process.
//!
//! Locking discipline mirrors the coordinator's `ChannelRegistry`: a
//! registry mutex guards the map of channel entries; each channel has its
//! own mutex guarding mutable state. `acquire` only holds the registry
//! lock long enough to find-or-create the entry and bump its refcount,
//! then drops it before the caller does any channel work. `release`
//! removes the entry once refcount is zero and the channel is both
//! unpublished and playerless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::gop_cache::GopCache;

/// A frame queued to a session's writer task.
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

pub type Outbox = mpsc::UnboundedSender<Frame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idling,
    Playing,
}

pub struct PlayerHandle {
    pub outbox: Outbox,
    pub key: String,
    pub state: PlayerState,
    pub gop_play_no: bool,
    pub clear_cache_on_play: bool,
    /// Fired to force-close a mismatched-key idler during idle promotion.
    pub kill: CancellationToken,
}

pub struct PublisherHandle {
    pub session_id: u64,
    pub key: String,
    pub stream_id: String,
    pub gop_cache: GopCache,
    pub kill: CancellationToken,
}

#[derive(Default)]
pub struct ChannelState {
    pub publisher: Option<PublisherHandle>,
    pub players: HashMap<u64, PlayerHandle>,
}

impl ChannelState {
    fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.players.is_empty()
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
        f(&mut self.entry.state.lock())
    }
}

pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<ChannelEntry>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry { channels: Mutex::new(HashMap::new()) }
    }

    pub fn acquire(&self, channel_id: &str) -> ChannelHandle {
        let mut channels = self.channels.lock();
        let entry = channels
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(ChannelEntry { refcount: AtomicU64::new(0), state: Mutex::new(ChannelState::default()) }))
            .clone();
        entry.refcount.fetch_add(1, Ordering::SeqCst);
        drop(channels);

        ChannelHandle { id: channel_id.to_string(), entry }
    }

    pub fn release(&self, handle: ChannelHandle) {
        let remaining = handle.entry.refcount.fetch_sub(1, Ordering::SeqCst) - 1;
        let empty = handle.entry.state.lock().is_empty();

        if remaining == 0 && empty {
            let mut channels = self.channels.lock();
            if let Some(current) = channels.get(&handle.id) {
                if Arc::ptr_eq(current, &handle.entry) && current.refcount.load(Ordering::SeqCst) == 0 {
                    channels.remove(&handle.id);
                }
            }
        }
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
    fn acquire_creates_an_empty_channel() {
        let registry = ChannelRegistry::new();
        let handle = registry.acquire("ch1");
        assert!(handle.with_state(|s| s.publisher.is_none() && s.players.is_empty()));
        registry.release(handle);
    }

    #[test]
    fn release_with_refcount_zero_and_no_occupants_removes_the_entry() {
        let registry = ChannelRegistry::new();
        let handle = registry.acquire("ch1");
        registry.release(handle);
        assert_eq!(registry.channels.lock().len(), 0);
    }

    #[test]
    fn release_keeps_entry_while_publisher_present() {
        let registry = ChannelRegistry::new();
        let handle = registry.acquire("ch1");
        handle.with_state(|s| {
            s.publisher = Some(PublisherHandle {
                session_id: 1,
                key: "k".to_string(),
                stream_id: "s".to_string(),
                gop_cache: GopCache::new(1024),
                kill: CancellationToken::new(),
            })
        });
        registry.release(handle);
        assert_eq!(registry.channels.lock().len(), 1);
    }
}
