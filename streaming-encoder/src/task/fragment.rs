//! Ordered fragment assembly and writer serialization for one rendition of
//! one encoding task (§4.6 "Ordered fragment assembly" / "Playlist writer
//! serialization").
//!
//! Two independent event streams arrive for the same fragment index: the
//! playlist parse (from the rewritten `.m3u8`, which can arrive out of
//! order across renditions but is monotonically increasing within one) and
//! the storage-write acknowledgement (`.ts` PUT completing). A fragment only
//! joins the live/VOD playlists once both have been observed, mirroring the
//! "committed prefix + two sparse sets" shape used for out-of-order
//! reordering elsewhere in this system (see the GOP cache's chunk
//! accounting for the nearest sibling pattern).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use streaming_hls::{Fragment, Playlist};
use streaming_storage::Storage;

/// What a sub-stream's promotion pass just produced, so the caller (which
/// holds the surrounding task's async context) can perform storage I/O and
/// fire STREAM-AVAILABLE without the fragment bookkeeping itself touching
/// the network.
#[derive(Default)]
pub struct PromotionOutcome {
    pub live_changed: bool,
    pub vod_rollover: Option<Playlist>,
    pub vod_changed: bool,
    pub to_delete: Vec<String>,
    pub should_kill: bool,
}

/// Per-rendition fragment bookkeeping. Owned by the task's state mutex, so
/// all mutation here is synchronous and single-threaded per task.
pub struct SubStream {
    pub label: String,
    pub record: bool,
    target_duration: u32,
    live_playlist_size: usize,
    vod_max_size: usize,
    fragment_count_limit: u64,

    parsed: BTreeMap<u64, Fragment>,
    ready: BTreeSet<u64>,
    /// Next fragment index expected to promote; equals the count of
    /// fragments promoted so far.
    fragment_count: u64,

    pub live: VecDeque<Fragment>,
    pub vod: Option<Playlist>,
    vod_count: usize,
    pub vod_index: u64,
    deleted_through: Option<u64>,

    pub live_available_fired: bool,
    pub vod_available_fired: bool,
}

impl SubStream {
    pub fn new(label: String, record: bool, target_duration: u32, live_playlist_size: usize, vod_max_size: usize, fragment_count_limit: u64) -> Self {
        SubStream {
            label,
            record,
            target_duration,
            live_playlist_size,
            vod_max_size,
            fragment_count_limit,
            parsed: BTreeMap::new(),
            ready: BTreeSet::new(),
            fragment_count: 0,
            live: VecDeque::new(),
            vod: None,
            vod_count: 0,
            vod_index: 0,
            deleted_through: None,
            live_available_fired: false,
            vod_available_fired: false,
        }
    }

    /// Records a parsed fragment from a playlist rewrite. Fragments already
    /// promoted (index below `fragment_count`) are ignored — the subprocess
    /// can rewrite a playlist that still names already-retired segments.
    pub fn on_parsed(&mut self, fragment: Fragment) {
        if fragment.index >= self.fragment_count {
            self.parsed.insert(fragment.index, fragment);
        }
    }

    /// Records that `index`'s bytes have been durably written.
    pub fn on_ready(&mut self, index: u64) {
        if index >= self.fragment_count {
            self.ready.insert(index);
        }
    }

    /// Promotes as many contiguous parsed-and-ready fragments as are
    /// available, maintaining the live window and (if recording) the VOD
    /// playlist, and returns what storage/network side-effects the caller
    /// must now perform.
    pub fn promote(&mut self) -> PromotionOutcome {
        let mut outcome = PromotionOutcome::default();

        loop {
            let i = self.fragment_count;
            if !self.ready.contains(&i) {
                break;
            }
            let Some(fragment) = self.parsed.get(&i).cloned() else { break };
            self.ready.remove(&i);
            self.parsed.remove(&i);
            self.fragment_count += 1;

            self.live.push_back(fragment.clone());
            if self.live.len() > self.live_playlist_size {
                self.live.pop_front();
            }
            outcome.live_changed = true;

            if self.record {
                let vod = self.vod.get_or_insert_with(|| Playlist::new_vod(self.target_duration));
                vod.fragments.push(fragment.clone());
                self.vod_count += 1;
                outcome.vod_changed = true;

                if self.vod_count >= self.vod_max_size {
                    if let Some(finished) = self.vod.take() {
                        outcome.vod_rollover = Some(finished);
                    }
                    self.vod_count = 0;
                    self.vod_index += 1;
                    self.vod_available_fired = false;
                }
            } else if self.fragment_count >= 2 * self.live_playlist_size as u64 {
                let retire_through = self.fragment_count - 2 * self.live_playlist_size as u64;
                let start = self.deleted_through.map(|d| d + 1).unwrap_or(0);
                for idx in start..=retire_through {
                    outcome.to_delete.push(format!("{idx}.ts"));
                }
                if retire_through >= start {
                    self.deleted_through = Some(retire_through);
                }
            }

            if self.fragment_count >= self.fragment_count_limit {
                outcome.should_kill = true;
                break;
            }
        }

        outcome
    }

    pub fn live_media_sequence(&self) -> u64 {
        self.live.front().map(|f| f.index).unwrap_or(0)
    }

    pub fn to_live_playlist(&self) -> Playlist {
        let mut p = Playlist::new_live(self.target_duration);
        p.media_sequence = self.live_media_sequence();
        p.fragments = self.live.iter().cloned().collect();
        p
    }

    /// Marks the live/VOD playlists ended, for the finalize-on-exit path.
    pub fn finalize(&mut self) -> (Playlist, Option<Playlist>) {
        let mut live = self.to_live_playlist();
        live.is_ended = true;
        let vod = self.vod.take();
        (live, vod)
    }
}

/// At most one write in flight per destination path; arrivals during a
/// write coalesce into a single pending snapshot (ties to
/// `streaming_coordinator::active_streams`'s writer pattern).
pub struct CoalescingWriter {
    storage: Arc<dyn Storage>,
    path: String,
    state: Arc<Mutex<WriterState>>,
}

struct WriterState {
    writing: bool,
    pending: Option<bytes::Bytes>,
}

impl CoalescingWriter {
    pub fn new(storage: Arc<dyn Storage>, path: String) -> Self {
        CoalescingWriter { storage, path, state: Arc::new(Mutex::new(WriterState { writing: false, pending: None })) }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Schedules `data` to be written, coalescing with any write already in
    /// flight. Callers track "first successful write" themselves via the
    /// owning `SubStream`'s `*_available_fired` flags.
    pub fn write(&self, data: bytes::Bytes) {
        let mut state = self.state.lock();
        if state.writing {
            state.pending = Some(data);
            return;
        }
        state.writing = true;
        drop(state);

        let storage = self.storage.clone();
        let path = self.path.clone();
        let writer_state = self.state.clone();
        tokio::spawn(async move {
            let mut to_write = data;
            loop {
                if let Err(e) = storage.write(&path, to_write.clone()).await {
                    tracing::warn!(path, error = %e, "failed to write HLS artifact");
                }

                let mut guard = writer_state.lock();
                match guard.pending.take() {
                    Some(next) => to_write = next,
                    None => {
                        guard.writing = false;
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(i: u64) -> Fragment {
        Fragment { index: i, duration: 6.0, name: format!("{i}.ts") }
    }

    #[test]
    fn promotes_only_when_both_parsed_and_ready() {
        let mut s = SubStream::new("ORIGINAL".to_string(), false, 6, 3, 60, 1_000_000);
        s.on_parsed(frag(0));
        let outcome = s.promote();
        assert!(!outcome.live_changed);

        s.on_ready(0);
        let outcome = s.promote();
        assert!(outcome.live_changed);
        assert_eq!(s.live.len(), 1);
    }

    #[test]
    fn out_of_order_ready_still_promotes_in_order() {
        let mut s = SubStream::new("ORIGINAL".to_string(), false, 6, 3, 60, 1_000_000);
        s.on_parsed(frag(0));
        s.on_parsed(frag(1));
        s.on_parsed(frag(2));
        s.on_ready(1);
        s.on_ready(2);
        let outcome = s.promote();
        assert!(!outcome.live_changed); // 0 still missing

        s.on_ready(0);
        let outcome = s.promote();
        assert!(outcome.live_changed);
        assert_eq!(s.live.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn live_window_evicts_oldest_and_advances_media_sequence() {
        let mut s = SubStream::new("ORIGINAL".to_string(), false, 6, 2, 60, 1_000_000);
        for i in 0..4 {
            s.on_parsed(frag(i));
            s.on_ready(i);
            s.promote();
        }
        assert_eq!(s.live.len(), 2);
        assert_eq!(s.live_media_sequence(), 2);
    }

    #[test]
    fn vod_rolls_over_at_cap() {
        let mut s = SubStream::new("ORIGINAL".to_string(), true, 6, 10, 2, 1_000_000);
        for i in 0..2 {
            s.on_parsed(frag(i));
            s.on_ready(i);
            let outcome = s.promote();
            if i == 1 {
                assert!(outcome.vod_rollover.is_some());
            }
        }
        assert_eq!(s.vod_index, 1);
        assert!(s.vod.is_none());
    }

    #[test]
    fn no_record_retires_segments_two_windows_back() {
        let mut s = SubStream::new("ORIGINAL".to_string(), false, 6, 2, 60, 1_000_000);
        let mut deletes = Vec::new();
        for i in 0..5 {
            s.on_parsed(frag(i));
            s.on_ready(i);
            let outcome = s.promote();
            deletes.extend(outcome.to_delete);
        }
        // live size 2: once fragment_count >= 4, index 0 is 2 windows back.
        assert!(deletes.contains(&"0.ts".to_string()));
    }

    #[test]
    fn kill_flag_set_at_fragment_count_limit() {
        let mut s = SubStream::new("ORIGINAL".to_string(), false, 6, 10, 60, 2);
        s.on_parsed(frag(0));
        s.on_ready(0);
        assert!(!s.promote().should_kill);
        s.on_parsed(frag(1));
        s.on_ready(1);
        assert!(s.promote().should_kill);
    }
}
