//! Source probing (§4.6 step 1): "subprocess-provided metadata" means
//! exactly that here — probing is delegated to `ffprobe` rather than
//! hand-rolled container parsing, the same way the transcode itself is
//! delegated to `ffmpeg` in `cmd.rs`. RTMP sources are probed directly by
//! URI; WS sources are probed against the one binary chunk the ingest
//! `/probe` endpoint hands back before closing (see
//! `streaming-ingest::session::run_probe_writer`).

use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TaskError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_codec: String,
    pub audio_codec: String,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

fn parse_frame_rate(s: &str) -> Option<u32> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some((num / den).round() as u32)
}

fn parse_ffprobe_json(raw: &[u8]) -> Option<ProbeInfo> {
    let parsed: FfprobeOutput = serde_json::from_slice(raw).ok()?;

    let video = parsed.streams.iter().find(|s| s.codec_type == "video")?;
    let audio = parsed.streams.iter().find(|s| s.codec_type == "audio");

    Some(ProbeInfo {
        width: video.width?,
        height: video.height?,
        fps: video.r_frame_rate.as_deref().and_then(parse_frame_rate).unwrap_or(30),
        video_codec: video.codec_name.clone().unwrap_or_default(),
        audio_codec: audio.and_then(|a| a.codec_name.clone()).unwrap_or_default(),
    })
}

async fn run_ffprobe(input: &str, stdin_feed: Option<Vec<u8>>) -> Result<ProbeInfo, TaskError> {
    let target = if stdin_feed.is_some() { "pipe:0" } else { input };

    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_streams", target]);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::null());
    cmd.stdin(if stdin_feed.is_some() { std::process::Stdio::piped() } else { std::process::Stdio::null() });

    let mut child = cmd.spawn()?;

    if let Some(chunk) = stdin_feed {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&chunk).await;
            let _ = stdin.shutdown().await;
        }
    }

    let output = timeout(PROBE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| TaskError::ProbeFailed)?
        .map_err(TaskError::SpawnFailed)?;

    parse_ffprobe_json(&output.stdout).ok_or(TaskError::ProbeFailed)
}

/// Probes an RTMP source directly: ffmpeg/ffprobe pull RTMP natively, so no
/// custom client is needed here (unlike the WS path below).
pub async fn probe_rtmp(source_uri: &str) -> Result<ProbeInfo, TaskError> {
    run_ffprobe(source_uri, None).await
}

/// Probes a WS source by dialing `{source_uri}/probe`, reading frames until
/// the first binary chunk arrives (the ingest probe contract closes the
/// socket right after sending it), and handing that chunk to ffprobe over
/// stdin.
pub async fn probe_ws(source_uri: &str) -> Result<ProbeInfo, TaskError> {
    let url = format!("{}/probe", source_uri.trim_end_matches('/'));

    let chunk = timeout(PROBE_TIMEOUT, async {
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.map_err(|_| TaskError::ProbeFailed)?;
        let (_, mut read) = ws.split();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Binary(data)) => return Ok(data.to_vec()),
                Ok(_) => continue,
                Err(_) => return Err(TaskError::ProbeFailed),
            }
        }
        Err(TaskError::ProbeFailed)
    })
    .await
    .map_err(|_| TaskError::ProbeFailed)??;

    run_ffprobe(source_uri, Some(chunk)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_rate_fraction() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(30));
        assert_eq!(parse_frame_rate("25/1"), Some(25));
        assert_eq!(parse_frame_rate("bogus"), None);
    }

    #[test]
    fn parses_ffprobe_json_with_video_and_audio() {
        let raw = br#"{"streams":[
            {"codec_type":"video","codec_name":"h264","width":1280,"height":720,"r_frame_rate":"30/1"},
            {"codec_type":"audio","codec_name":"aac"}
        ]}"#;
        let info = parse_ffprobe_json(raw).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.fps, 30);
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.audio_codec, "aac");
    }

    #[test]
    fn missing_video_stream_fails_to_parse() {
        let raw = br#"{"streams":[{"codec_type":"audio","codec_name":"aac"}]}"#;
        assert!(parse_ffprobe_json(raw).is_none());
    }

    #[test]
    fn missing_dimensions_fails_to_parse() {
        let raw = br#"{"streams":[{"codec_type":"video","codec_name":"h264"}]}"#;
        assert!(parse_ffprobe_json(raw).is_none());
    }
}
