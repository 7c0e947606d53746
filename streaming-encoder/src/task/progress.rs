//! ffmpeg stderr progress parsing: an encoding task is considered "started"
//! the first time a `frame=`/`time=` progress line appears, separate from
//! the first playlist PUT (which can lag behind by one segment duration).

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::sync::watch;

fn is_progress_line(line: &str) -> bool {
    line.contains("frame=") && line.contains("time=")
}

/// Reads `stderr` line by line until the process exits, flipping `started`
/// to `true` on the first line containing both `frame=` and `time=`.
/// Remaining lines are logged at debug level and otherwise discarded.
pub async fn watch_stderr(stderr: ChildStderr, started: watch::Sender<bool>, label: String) {
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if !*started.borrow() && is_progress_line(&line) {
            let _ = started.send(true);
        }
        tracing::debug!(task = %label, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_ffmpeg_progress_lines() {
        assert!(is_progress_line("frame=   10 fps=0.0 q=-1.0 size=0kB time=00:00:00.40 bitrate=N/A"));
    }

    #[test]
    fn ignores_unrelated_stderr_lines() {
        assert!(!is_progress_line("Stream mapping:"));
        assert!(!is_progress_line("  Stream #0:0 -> #0:0 (h264 (native) -> h264 (libx264))"));
    }
}
