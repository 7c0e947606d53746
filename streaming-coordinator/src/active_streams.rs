//! Persistence for the active-streams set: every `{channel, streamId}` for
//! which a stream-available has been emitted and no stream-closed
//! acknowledged yet. Serialized as one `channel:streamId` line per entry,
//! written atomically (tmp file + rename) by a single writer; concurrent
//! mutations that arrive while a write is in flight are coalesced into one
//! pending snapshot rather than queued individually, so a burst of
//! publishes only costs one extra write at the tail.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActiveStream {
    pub channel: String,
    pub stream_id: String,
}

impl ActiveStream {
    fn to_line(&self) -> String {
        format!("{}:{}", self.channel, self.stream_id)
    }

    fn parse_line(line: &str) -> Option<ActiveStream> {
        let (channel, stream_id) = line.split_once(':')?;
        if channel.is_empty() || stream_id.is_empty() {
            return None;
        }
        Some(ActiveStream { channel: channel.to_string(), stream_id: stream_id.to_string() })
    }
}

struct WriterState {
    writing: bool,
    pending: Option<BTreeSet<ActiveStream>>,
}

pub struct ActiveStreamStore {
    path: PathBuf,
    set: Mutex<BTreeSet<ActiveStream>>,
    writer: Arc<Mutex<WriterState>>,
}

impl ActiveStreamStore {
    /// Loads the persisted set from `path`, if it exists. Malformed lines
    /// are skipped rather than failing startup.
    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let set = match fs::read_to_string(&path).await {
            Ok(contents) => contents.lines().filter_map(ActiveStream::parse_line).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(ActiveStreamStore { path, set: Mutex::new(set), writer: Arc::new(Mutex::new(WriterState { writing: false, pending: None })) })
    }

    pub fn snapshot(&self) -> Vec<ActiveStream> {
        self.set.lock().iter().cloned().collect()
    }

    pub fn contains(&self, entry: &ActiveStream) -> bool {
        self.set.lock().contains(entry)
    }

    pub fn insert(&self, entry: ActiveStream) {
        self.set.lock().insert(entry);
        self.schedule_write();
    }

    pub fn remove(&self, entry: &ActiveStream) {
        self.set.lock().remove(entry);
        self.schedule_write();
    }

    fn schedule_write(&self) {
        let snapshot: BTreeSet<ActiveStream> = self.set.lock().clone();

        let mut writer = self.writer.lock();
        if writer.writing {
            writer.pending = Some(snapshot);
            return;
        }
        writer.writing = true;
        drop(writer);

        let path = self.path.clone();
        let writer_state = self.writer.clone();
        tokio::spawn(async move {
            let mut to_write = snapshot;
            loop {
                if let Err(e) = write_atomically(&path, &to_write).await {
                    tracing::warn!(error = %e, "failed to persist active-streams file");
                }

                let mut guard = writer_state.lock();
                match guard.pending.take() {
                    Some(next) => {
                        to_write = next;
                    }
                    None => {
                        guard.writing = false;
                        break;
                    }
                }
            }
        });
    }
}

async fn write_atomically(path: &std::path::Path, set: &BTreeSet<ActiveStream>) -> anyhow::Result<()> {
    let body: String = set.iter().map(|e| e.to_line()).collect::<Vec<_>>().join("\n");
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&tmp, body).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_through_the_persisted_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("active-streams.txt");

        let store = ActiveStreamStore::load(path.clone()).await.unwrap();
        store.insert(ActiveStream { channel: "ch1".to_string(), stream_id: "s1".to_string() });

        // Give the spawned writer task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reloaded = ActiveStreamStore::load(path).await.unwrap();
        assert_eq!(reloaded.snapshot(), vec![ActiveStream { channel: "ch1".to_string(), stream_id: "s1".to_string() }]);
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let store = ActiveStreamStore::load(dir.path().join("nope.txt")).await.unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        assert_eq!(ActiveStream::parse_line("not-a-valid-line"), None);
        assert_eq!(ActiveStream::parse_line("ch1:s1"), Some(ActiveStream { channel: "ch1".to_string(), stream_id: "s1".to_string() }));
    }
}
