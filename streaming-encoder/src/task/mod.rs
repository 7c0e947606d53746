//! Per-stream transcode orchestration (C5): `EncodingTask` drives one
//! ENCODE-START end to end (probe, command, subprocess, source manager,
//! progress, fragment assembly), and `TaskRegistry` keeps the set of live
//! tasks keyed by `{channel, stream}` for the loopback sink and control
//! client to dispatch into.
//!
//! Module layout mirrors the responsibilities named in the engine: `probe`
//! (subprocess-provided source metadata), `cmd` (ffmpeg invocation),
//! `source` (WS-to-stdin bridge), `progress` (stderr line watcher),
//! `fragment` (ordered assembly + coalescing writer).

pub mod cmd;
pub mod fragment;
pub mod probe;
pub mod progress;
pub mod source;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use streaming_hls::{Playlist, PreviewsConfig, ResolutionList};
use streaming_storage::Storage;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use fragment::{CoalescingWriter, SubStream};

use crate::cdn::CdnPublisher;

/// Sink for the two events an `EncodingTask` emits over its lifetime.
/// Implemented by the encoder's control client; kept as a trait so this
/// module has no dependency on the control-plane wiring.
pub trait StreamEventSink: Send + Sync {
    fn stream_available(&self, channel: &str, stream_id: &str, stream_type: &str, resolution: &str, index_file: &str);
    fn stream_closed(&self, channel: &str, stream_id: &str);
}

struct RenditionEntry {
    sub: SubStream,
    live_writer: CoalescingWriter,
    vod_writer: Option<CoalescingWriter>,
    live_path: String,
    cdn: Option<Arc<CdnPublisher>>,
}

struct PreviewsState {
    ready: BTreeSet<u64>,
    count: u64,
    writer: CoalescingWriter,
    index_path: String,
    label: String,
    fired: bool,
}

struct TaskInner {
    renditions: HashMap<String, RenditionEntry>,
    previews: Option<PreviewsState>,
}

pub struct EncodingTask {
    pub channel: String,
    pub stream_id: String,
    record: bool,
    storage: Arc<dyn Storage>,
    events: Arc<dyn StreamEventSink>,
    inner: Mutex<TaskInner>,
    kill: CancellationToken,
    started: watch::Sender<bool>,
    /// Target segment duration, used as the duration label on CDN fragment
    /// pushes; the rewritten playlist's own EXTINF isn't threaded to the
    /// sink's segment-PUT path, and ffmpeg's actual segment durations track
    /// this target closely enough for the push protocol's purposes.
    target_duration: u32,
}

/// Storage path conventions, shared with the loopback sink (which writes
/// segment and preview bodies directly, before handing the index off to
/// the task).
pub(crate) fn fragment_path(channel: &str, stream_id: &str, label: &str, index: u64) -> String {
    format!("{channel}/{stream_id}/{label}/{index}.ts")
}

fn live_path(channel: &str, stream_id: &str, label: &str) -> String {
    format!("{channel}/{stream_id}/{label}/live.m3u8")
}

fn vod_path(channel: &str, stream_id: &str, label: &str, vod_index: u64) -> String {
    format!("{channel}/{stream_id}/{label}/vod-{vod_index}.m3u8")
}

pub(crate) fn preview_path(channel: &str, stream_id: &str, label: &str, index: u64) -> String {
    format!("{channel}/{stream_id}/previews/{label}/{index}.jpg")
}

fn previews_index_path(channel: &str, stream_id: &str, label: &str) -> String {
    format!("{channel}/{stream_id}/previews/{label}/index.json")
}

impl EncodingTask {
    fn new(
        channel: String,
        stream_id: String,
        record: bool,
        storage: Arc<dyn Storage>,
        events: Arc<dyn StreamEventSink>,
        kill: CancellationToken,
        target_duration: u32,
    ) -> Self {
        EncodingTask {
            channel,
            stream_id,
            record,
            storage,
            events,
            inner: Mutex::new(TaskInner { renditions: HashMap::new(), previews: None }),
            kill,
            started: watch::channel(false).0,
            target_duration,
        }
    }

    fn add_rendition(&self, label: String, target_duration: u32, live_size: usize, vod_max: usize, frag_limit: u64, cdn: Option<Arc<CdnPublisher>>) {
        let sub = SubStream::new(label.clone(), self.record, target_duration, live_size, vod_max, frag_limit);
        let live_writer = CoalescingWriter::new(self.storage.clone(), live_path(&self.channel, &self.stream_id, &label));
        let mut inner = self.inner.lock();
        inner.renditions.insert(label.clone(), RenditionEntry { sub, live_writer, vod_writer: None, live_path: live_path(&self.channel, &self.stream_id, &label), cdn });
    }

    /// Forwards a freshly-written segment body to this rendition's CDN
    /// publisher, if one is configured. Called directly from the loopback
    /// sink, which is the only place the raw segment bytes are in memory.
    pub fn cdn_push(&self, label: &str, body: Bytes) {
        let inner = self.inner.lock();
        if let Some(entry) = inner.renditions.get(label) {
            if let Some(cdn) = &entry.cdn {
                cdn.push(self.target_duration as f64, body);
            }
        }
    }

    fn enable_previews(&self, previews: &PreviewsConfig) {
        let label = format!("{}x{}", previews.width, previews.height);
        let index_path = previews_index_path(&self.channel, &self.stream_id, &label);
        let writer = CoalescingWriter::new(self.storage.clone(), index_path.clone());
        self.inner.lock().previews = Some(PreviewsState { ready: BTreeSet::new(), count: 0, writer, index_path, label, fired: false });
    }

    /// Called by the loopback sink when the subprocess rewrites a
    /// rendition's internal playlist.
    pub async fn on_playlist_put(&self, label: &str, raw: &str) {
        let Ok(playlist) = Playlist::parse(raw) else {
            tracing::warn!(task = %self.stream_id, label, "failed to parse rewritten playlist");
            return;
        };

        let outcome = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.renditions.get_mut(label) else { return };
            for fragment in playlist.fragments {
                entry.sub.on_parsed(fragment);
            }
            entry.sub.promote()
        };

        self.apply_promotion(label, outcome).await;
    }

    /// Called by the loopback sink after a `.ts` segment body has been
    /// durably written to storage.
    pub async fn on_segment_ready(&self, label: &str, index: u64) {
        let outcome = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.renditions.get_mut(label) else { return };
            entry.sub.on_ready(index);
            entry.sub.promote()
        };

        self.apply_promotion(label, outcome).await;
    }

    async fn apply_promotion(&self, label: &str, outcome: fragment::PromotionOutcome) {
        if outcome.should_kill {
            tracing::info!(task = %self.stream_id, label, "fragment count limit reached, killing task");
            self.kill.cancel();
        }

        for name in &outcome.to_delete {
            let index: u64 = name.trim_end_matches(".ts").parse().unwrap_or_default();
            let path = fragment_path(&self.channel, &self.stream_id, label, index);
            if let Err(e) = self.storage.remove(&path).await {
                tracing::warn!(path, error = %e, "failed to delete retired fragment");
            }
        }

        if outcome.live_changed {
            let (live_bytes, live_path, fire) = {
                let mut inner = self.inner.lock();
                let Some(entry) = inner.renditions.get_mut(label) else { return };
                let fire = !entry.sub.live_available_fired;
                entry.sub.live_available_fired = true;
                (Bytes::from(entry.sub.to_live_playlist().encode()), entry.live_path.clone(), fire)
            };
            self.inner.lock().renditions.get(label).unwrap().live_writer.write(live_bytes);
            if fire {
                self.events.stream_available(&self.channel, &self.stream_id, "HLS-LIVE", label, &live_path);
            }
        }

        if let Some(finished) = outcome.vod_rollover {
            self.write_vod(label, finished).await;
        } else if outcome.vod_changed {
            let current = {
                let inner = self.inner.lock();
                inner.renditions.get(label).and_then(|e| e.sub.vod.clone())
            };
            if let Some(vod) = current {
                self.write_vod(label, vod).await;
            }
        }
    }

    async fn write_vod(&self, label: &str, playlist: Playlist) {
        let (path, fire) = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.renditions.get_mut(label) else { return };
            let path = vod_path(&self.channel, &self.stream_id, label, entry.sub.vod_index);
            if entry.vod_writer.as_ref().map(|w| w.path() != path).unwrap_or(true) {
                entry.vod_writer = Some(CoalescingWriter::new(self.storage.clone(), path.clone()));
            }
            let fire = !entry.sub.vod_available_fired;
            entry.sub.vod_available_fired = true;
            (path, fire)
        };

        let bytes = Bytes::from(playlist.encode());
        if let Some(entry) = self.inner.lock().renditions.get(label) {
            if let Some(writer) = &entry.vod_writer {
                writer.write(bytes);
            }
        }
        if fire {
            self.events.stream_available(&self.channel, &self.stream_id, "HLS-VOD", label, &path);
        }
    }

    /// Called by the loopback sink after a preview JPEG has been durably
    /// written to storage.
    pub async fn on_preview_ready(&self, index: u64) {
        let mut inner = self.inner.lock();
        let Some(previews) = inner.previews.as_mut() else { return };

        previews.ready.insert(index);
        while previews.ready.remove(&previews.count) {
            previews.count += 1;
        }

        let json = serde_json::json!({ "index_start": 0, "count": previews.count, "pattern": "%d.jpg" });
        previews.writer.write(Bytes::from(json.to_string()));

        let fire = !previews.fired;
        previews.fired = true;
        if fire {
            let (label, path) = (previews.label.clone(), previews.index_path.clone());
            drop(inner);
            self.events.stream_available(&self.channel, &self.stream_id, "IMG-PREVIEW", &label, &path);
        }
    }

    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn started_sender(&self) -> watch::Sender<bool> {
        self.started.clone()
    }

    /// Whether the transcoder subprocess has emitted at least one progress
    /// line yet. A kill that races the probe/spawn kills the subprocess
    /// immediately; a kill arriving after encoding has started lets the
    /// subprocess drain to its own exit instead of severing it mid-segment.
    fn is_started(&self) -> bool {
        *self.started.borrow()
    }

    /// Marks every live/VOD playlist ended and flushes final writes. Called
    /// once the transcoder subprocess exits.
    async fn finalize(&self) {
        let finals: Vec<(String, Playlist, Option<Playlist>, String, Option<String>)> = {
            let mut inner = self.inner.lock();
            inner
                .renditions
                .iter_mut()
                .map(|(label, entry)| {
                    let (live, vod) = entry.sub.finalize();
                    (label.clone(), live, vod, entry.live_path.clone(), entry.vod_writer.as_ref().map(|w| w.path().to_string()))
                })
                .collect()
        };

        for (label, live, vod, live_path, vod_path) in finals {
            if let Err(e) = self.storage.write(&live_path, Bytes::from(live.encode())).await {
                tracing::warn!(path = %live_path, error = %e, "failed to write final live playlist");
            }
            if let (Some(vod), Some(vod_path)) = (vod, vod_path) {
                if let Err(e) = self.storage.write(&vod_path, Bytes::from(vod.encode())).await {
                    tracing::warn!(path = %vod_path, error = %e, "failed to write final vod playlist");
                }
            }
            tracing::debug!(task = %self.stream_id, label, "rendition finalized");
        }

        self.events.stream_closed(&self.channel, &self.stream_id);
    }
}

/// Keys and owns every task currently encoding on this process, so the
/// loopback sink and control client can look one up by `{channel, stream}`.
pub struct TaskRegistry {
    tasks: DashMap<(String, String), Arc<EncodingTask>>,
    /// Kill tokens for ENCODE-STARTs still probing or spawning, not yet in
    /// `tasks`. Lets an ENCODE-STOP that arrives mid-probe still take
    /// effect instead of racing the probe to completion (see `run_task`).
    pending: DashMap<(String, String), CancellationToken>,
    storage: Arc<dyn Storage>,
    sink_base: String,
    hls_time: u32,
    live_size: usize,
    vod_max: usize,
    frag_limit: u64,
    cdn_urls: Vec<String>,
    cdn_secret: Vec<u8>,
}

impl TaskRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        sink_base: String,
        hls_time: u32,
        live_size: usize,
        vod_max: usize,
        frag_limit: u64,
        cdn_urls: Vec<String>,
        cdn_secret: Vec<u8>,
    ) -> Arc<Self> {
        Arc::new(TaskRegistry { tasks: DashMap::new(), pending: DashMap::new(), storage, sink_base, hls_time, live_size, vod_max, frag_limit, cdn_urls, cdn_secret })
    }

    pub fn lookup(&self, channel: &str, stream_id: &str) -> Option<Arc<EncodingTask>> {
        self.tasks.get(&(channel.to_string(), stream_id.to_string())).map(|e| e.clone())
    }

    /// Force-stops every task currently tracked, including ones still
    /// probing. Called on (re)connect to the coordinator, since the
    /// coordinator may have lost track of what this encoder was doing
    /// across the disconnect.
    pub fn terminate_all(&self) {
        for entry in self.tasks.iter() {
            entry.value().kill_token().cancel();
        }
        for entry in self.pending.iter() {
            entry.value().cancel();
        }
    }

    pub fn stop(&self, channel: &str, stream_id: &str) {
        let key = (channel.to_string(), stream_id.to_string());
        if let Some(task) = self.tasks.get(&key) {
            task.kill_token().cancel();
        } else if let Some(token) = self.pending.get(&key) {
            token.cancel();
        }
    }

    /// Starts a new `EncodingTask` in the background: probes the source,
    /// plans renditions, spawns the transcoder, and wires up the source
    /// manager and progress watcher. Errors are logged; the coordinator
    /// never blocks on ENCODE-START's outcome.
    pub fn start(
        self: &Arc<Self>,
        events: Arc<dyn StreamEventSink>,
        channel: String,
        stream_id: String,
        source_type: String,
        source_uri: String,
        resolutions: ResolutionList,
        record: bool,
        previews: PreviewsConfig,
    ) {
        let key = (channel.clone(), stream_id.clone());
        let kill = CancellationToken::new();
        self.pending.insert(key.clone(), kill.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            let result = registry.run_task(events, channel.clone(), stream_id.clone(), source_type, source_uri, resolutions, record, previews, kill).await;
            registry.pending.remove(&key);
            if let Err(e) = result {
                tracing::warn!(channel, stream_id, error = %e, "encoding task failed to start");
            }
        });
    }

    async fn run_task(
        self: Arc<Self>,
        events: Arc<dyn StreamEventSink>,
        channel: String,
        stream_id: String,
        source_type: String,
        source_uri: String,
        resolutions: ResolutionList,
        record: bool,
        previews: PreviewsConfig,
        kill: CancellationToken,
    ) -> anyhow::Result<()> {
        let is_ws = source_type.eq_ignore_ascii_case("WS");

        let probe_info = tokio::select! {
            _ = kill.cancelled() => return Ok(()),
            result = async { if is_ws { probe::probe_ws(&source_uri).await } else { probe::probe_rtmp(&source_uri).await } } => result?,
        };

        let plan = cmd::plan_renditions(&resolutions, &probe_info);
        if plan.is_empty() {
            anyhow::bail!("no renditions to encode");
        }

        let input = if is_ws { "pipe:0".to_string() } else { source_uri.clone() };
        let mut command = cmd::build_command(&input, &plan, &previews, &self.sink_base, &channel, &stream_id, self.hls_time);

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().map(|s| Arc::new(tokio::sync::Mutex::new(s)));
        let stderr = child.stderr.take().expect("stderr piped in build_command");

        let task = Arc::new(EncodingTask::new(channel.clone(), stream_id.clone(), record, self.storage.clone(), events, kill.clone(), self.hls_time));
        for rendition in &plan {
            let cdn = (!self.cdn_urls.is_empty())
                .then(|| CdnPublisher::spawn(self.cdn_urls.clone(), self.cdn_secret.clone(), format!("{channel}/{stream_id}/{}", rendition.label())));
            task.add_rendition(rendition.label(), self.hls_time, self.live_size, self.vod_max, self.frag_limit, cdn);
        }
        if previews.enabled {
            task.enable_previews(&previews);
        }

        self.tasks.insert((channel.clone(), stream_id.clone()), task.clone());
        self.pending.remove(&(channel.clone(), stream_id.clone()));

        tokio::spawn(progress::watch_stderr(stderr, task.started_sender(), stream_id.clone()));

        if is_ws {
            if let Some(stdin) = stdin {
                let source_uri = source_uri.clone();
                tokio::spawn(async move {
                    if let Err(e) = source::run(&source_uri, stdin).await {
                        tracing::warn!(error = %e, "WS source manager ended");
                    }
                });
            }
        }

        tokio::select! {
            _ = kill.cancelled() => {
                if task.is_started() {
                    tracing::info!(channel, stream_id, "kill requested after encoding started; draining subprocess");
                    let _ = child.wait().await;
                } else {
                    tracing::info!(channel, stream_id, "kill requested before encoding started; killing subprocess immediately");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            status = child.wait() => {
                tracing::info!(channel, stream_id, status = ?status, "transcoder subprocess exited");
            }
        }

        task.finalize().await;
        self.tasks.remove(&(channel, stream_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        events: Mutex<Vec<(String, String, String, String, String)>>,
    }

    impl StreamEventSink for RecordingSink {
        fn stream_available(&self, channel: &str, stream_id: &str, stream_type: &str, resolution: &str, index_file: &str) {
            self.events.lock().push((channel.to_string(), stream_id.to_string(), stream_type.to_string(), resolution.to_string(), index_file.to_string()));
        }
        fn stream_closed(&self, channel: &str, stream_id: &str) {
            self.events.lock().push((channel.to_string(), stream_id.to_string(), "CLOSED".to_string(), String::new(), String::new()));
        }
    }

    fn memory_storage() -> Arc<dyn Storage> {
        Arc::new(streaming_storage::filesystem::FilesystemStorage::new(
            std::env::temp_dir().join(format!("encoder-test-{}", rand::random::<u64>())).to_string_lossy().to_string(),
        ))
    }

    #[tokio::test]
    async fn first_live_write_fires_stream_available_once() {
        let storage = memory_storage();
        let sink = Arc::new(RecordingSink { events: Mutex::new(Vec::new()) });
        let task = EncodingTask::new("ch1".to_string(), "s1".to_string(), false, storage, sink.clone(), CancellationToken::new(), 6);
        task.add_rendition("ORIGINAL".to_string(), 6, 3, 60, 1_000_000, None);

        task.on_playlist_put("ORIGINAL", "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:6.0,\n0.ts\n").await;
        task.on_segment_ready("ORIGINAL", 0).await;
        task.on_segment_ready("ORIGINAL", 0).await; // idempotent re-delivery

        let recorded = sink.events.lock();
        assert_eq!(recorded.iter().filter(|e| e.2 == "HLS-LIVE").count(), 1);
    }
}
