//! Session registry (C10): control-connection bookkeeping for ingest (RTMP
//! and WS) and encoder (HLS) sessions, keyed by a process-local numeric id
//! handed out at connect time.
//!
//! Each session also tracks the set of channel ids it is currently
//! associated with (as publisher or as assigned encoder), so that when the
//! transport drops, disconnection cleanup (see `kill.rs`) knows exactly
//! which channels to revisit without scanning the whole channel registry.

use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::channel::EncoderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Rtmp,
    Wss,
    Hls,
}

/// Outbound frames queued to a control session's writer task.
pub type Outbox = mpsc::UnboundedSender<String>;

pub struct IngestRegistration {
    pub external_ip: String,
    pub external_port: u16,
    pub ssl: bool,
}

pub struct Session {
    pub kind: SessionKind,
    pub outbox: Outbox,
    pub ingest: Option<IngestRegistration>,
    pub encoder_id: Option<EncoderId>,
    pub channels: DashSet<String>,
}

/// Tracks every live control session by its assigned id, so a disconnected
/// transport can be mapped back to the channels it was responsible for.
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: DashMap<u64, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry { next_id: AtomicU64::new(1), sessions: DashMap::new() }
    }

    pub fn insert(&self, kind: SessionKind, outbox: Outbox, ingest: Option<IngestRegistration>, encoder_id: Option<EncoderId>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.insert(id, Session { kind, outbox, ingest, encoder_id, channels: DashSet::new() });
        id
    }

    pub fn remove(&self, id: u64) -> Option<Session> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    pub fn send(&self, id: u64, message: String) -> bool {
        self.sessions.get(&id).map(|s| s.outbox.send(message).is_ok()).unwrap_or(false)
    }

    pub fn ingest_uri_base(&self, id: u64) -> Option<(SessionKind, String, u16, bool)> {
        let session = self.sessions.get(&id)?;
        let ingest = session.ingest.as_ref()?;
        Some((session.kind, ingest.external_ip.clone(), ingest.external_port, ingest.ssl))
    }

    pub fn kind_of(&self, id: u64) -> Option<SessionKind> {
        self.sessions.get(&id).map(|s| s.kind)
    }

    /// Records that `session_id` is now associated with `channel_id`, so a
    /// later disconnect of this session revisits that channel.
    pub fn associate_channel(&self, session_id: u64, channel_id: &str) {
        if let Some(session) = self.sessions.get(&session_id) {
            session.channels.insert(channel_id.to_string());
        }
    }

    pub fn disassociate_channel(&self, session_id: u64, channel_id: &str) {
        if let Some(session) = self.sessions.get(&session_id) {
            session.channels.remove(channel_id);
        }
    }

    /// Returns the channels `session_id` was last known to be associated
    /// with. Used once, at disconnection time.
    pub fn channels_for(&self, session_id: u64) -> Vec<String> {
        self.sessions.get(&session_id).map(|s| s.channels.iter().map(|c| c.clone()).collect()).unwrap_or_default()
    }

    /// Snapshot of every registered ingest session, for the `/commands/report` surface.
    pub fn list_ingest(&self) -> Vec<(u64, SessionKind, String, u16, bool)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                let ingest = entry.value().ingest.as_ref()?;
                Some((*entry.key(), entry.value().kind, ingest.external_ip.clone(), ingest.external_port, ingest.ssl))
            })
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_increasing_ids() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let a = registry.insert(SessionKind::Rtmp, tx1, None, None);
        let b = registry.insert(SessionKind::Wss, tx2, None, None);
        assert!(b > a);
    }

    #[test]
    fn send_to_removed_session_fails() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.insert(SessionKind::Hls, tx, None, None);
        registry.remove(id);
        assert!(!registry.send(id, "HEARTBEAT".to_string()));
    }

    #[test]
    fn tracks_channel_associations_until_disconnect() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.insert(SessionKind::Wss, tx, None, None);

        registry.associate_channel(id, "ch1");
        registry.associate_channel(id, "ch2");
        let mut channels = registry.channels_for(id);
        channels.sort();
        assert_eq!(channels, vec!["ch1".to_string(), "ch2".to_string()]);

        registry.disassociate_channel(id, "ch1");
        assert_eq!(registry.channels_for(id), vec!["ch2".to_string()]);
    }
}
