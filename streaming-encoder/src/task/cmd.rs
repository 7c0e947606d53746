//! Transcode command construction (§4.6 step 2): turns probed source
//! dimensions and a requested resolution list into concrete ffmpeg output
//! specs, one per rendition plus an optional previews output, all pushed via
//! HTTP PUT to the encoder's own loopback sink.

use streaming_hls::{PreviewsConfig, Resolution, ResolutionList};
use tokio::process::Command;

use super::probe::ProbeInfo;

pub const INTERNAL_PLAYLIST_SIZE: u32 = 5;

/// One concrete output rendition after fitting the requested box to the
/// source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendition {
    pub label_width: u32,
    pub label_height: u32,
    pub fps: u32,
    pub passthrough: bool,
}

impl Rendition {
    pub fn label(&self) -> String {
        format!("{}x{}-{}", self.label_width, self.label_height, self.fps)
    }
}

fn round_up_even(n: u32) -> u32 {
    if n % 2 == 0 {
        n
    } else {
        n + 1
    }
}

/// Fits `requested` inside the source aspect ratio, rounding each dimension
/// up to the nearest even value (required by most H.264 profiles) and
/// capping FPS to the source's.
fn fit(requested: Resolution, source: &ProbeInfo) -> Rendition {
    let source_ar = source.width as f64 / source.height as f64;
    let box_ar = requested.width as f64 / requested.height as f64;

    let (w, h) = if box_ar > source_ar {
        let h = requested.height as f64;
        (h * source_ar, h)
    } else {
        let w = requested.width as f64;
        (w, w / source_ar)
    };

    let fps = requested.fps.map(|f| f.min(source.fps)).unwrap_or(source.fps);
    Rendition { label_width: round_up_even(w.round() as u32), label_height: round_up_even(h.round() as u32), fps, passthrough: false }
}

/// Builds the deduplicated list of renditions to encode: the source
/// resolution unchanged (passthrough eligible) when `ORIGINAL` is requested,
/// plus one fitted rendition per explicit entry. Duplicates (same w/h/fps
/// after fitting) are dropped, keeping the first occurrence.
pub fn plan_renditions(requested: &ResolutionList, source: &ProbeInfo) -> Vec<Rendition> {
    let mut renditions = Vec::new();

    if requested.has_original {
        renditions.push(Rendition {
            label_width: source.width,
            label_height: source.height,
            fps: source.fps,
            passthrough: source.video_codec == "h264" && source.audio_codec == "aac",
        });
    }

    for resolution in &requested.resolutions {
        let candidate = fit(*resolution, source);
        if !renditions.iter().any(|r| r.label_width == candidate.label_width && r.label_height == candidate.label_height && r.fps == candidate.fps) {
            renditions.push(candidate);
        }
    }

    renditions
}

/// Appends one rendition's HLS output arguments to `cmd`, targeting the
/// loopback sink at `sink_base` (e.g. `http://127.0.0.1:8090`).
fn append_hls_output(cmd: &mut Command, rendition: &Rendition, sink_base: &str, channel: &str, stream_id: &str, hls_time: u32) {
    let label = rendition.label();
    let playlist_url = format!("{sink_base}/hls/{channel}/{stream_id}/{label}/stream.m3u8");
    let segment_url = format!("{sink_base}/hls/{channel}/{stream_id}/{label}/%d.ts");

    if rendition.passthrough {
        cmd.args(["-map", "0:v:0", "-map", "0:a:0", "-c:v", "copy", "-c:a", "copy"]);
    } else {
        cmd.args([
            "-map",
            "0:v:0",
            "-map",
            "0:a:0",
            "-c:v",
            "libx264",
            "-c:a",
            "aac",
            "-vf",
            &format!("scale={}:{}", rendition.label_width, rendition.label_height),
            "-r",
            &rendition.fps.to_string(),
            "-force_key_frames",
            &format!("expr:gte(t,n_forced*{hls_time})"),
        ]);
    }

    cmd.args([
        "-f",
        "hls",
        "-hls_time",
        &hls_time.to_string(),
        "-hls_list_size",
        &INTERNAL_PLAYLIST_SIZE.to_string(),
        "-hls_flags",
        "delete_segments+append_list",
        "-method",
        "PUT",
        "-hls_segment_filename",
        &segment_url,
        &playlist_url,
    ]);
}

fn append_previews_output(cmd: &mut Command, previews: &PreviewsConfig, sink_base: &str, channel: &str, stream_id: &str) {
    let label = format!("{}x{}", previews.width, previews.height);
    let image_url = format!("{sink_base}/img-preview/{channel}/{stream_id}/{label}/%d.jpg");
    let fps = format!("1/{}", previews.delay_seconds);

    cmd.args([
        "-map",
        "0:v:0",
        "-vf",
        &format!("fps={fps},scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2", previews.width, previews.height, previews.width, previews.height),
        "-f",
        "image2",
        "-method",
        "PUT",
        &image_url,
    ]);
}

/// Builds the full ffmpeg invocation for a task: one `-i` input plus one
/// HLS output per rendition and, if enabled, one previews output. `input`
/// is either the source URI directly (RTMP) or `pipe:0` (WS source, fed by
/// the source manager).
pub fn build_command(
    input: &str,
    renditions: &[Rendition],
    previews: &PreviewsConfig,
    sink_base: &str,
    channel: &str,
    stream_id: &str,
    hls_time: u32,
) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-loglevel", "info", "-i", input]);

    for rendition in renditions {
        append_hls_output(&mut cmd, rendition, sink_base, channel, stream_id, hls_time);
    }
    if previews.enabled {
        append_previews_output(&mut cmd, previews, sink_base, channel, stream_id);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::piped());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(width: u32, height: u32, fps: u32) -> ProbeInfo {
        ProbeInfo { width, height, fps, video_codec: "h264".to_string(), audio_codec: "aac".to_string() }
    }

    #[test]
    fn fits_wider_box_by_height() {
        let r = fit(Resolution::new(1920, 480), &source(1280, 720, 30));
        assert_eq!(r.label_height, 480);
        assert_eq!(r.label_width, round_up_even((480.0 * (1280.0 / 720.0)).round() as u32));
    }

    #[test]
    fn rounds_dimensions_up_to_even() {
        assert_eq!(round_up_even(719), 720);
        assert_eq!(round_up_even(720), 720);
    }

    #[test]
    fn fps_is_capped_to_source() {
        let mut requested = Resolution::new(640, 360);
        requested.fps = Some(60);
        let r = fit(requested, &source(1280, 720, 30));
        assert_eq!(r.fps, 30);
    }

    #[test]
    fn original_is_passthrough_only_when_h264_aac() {
        let list = ResolutionList { has_original: true, resolutions: vec![] };
        let plan = plan_renditions(&list, &source(1280, 720, 30));
        assert!(plan[0].passthrough);

        let mut other = source(1280, 720, 30);
        other.video_codec = "hevc".to_string();
        let plan = plan_renditions(&list, &other);
        assert!(!plan[0].passthrough);
    }

    #[test]
    fn duplicate_renditions_after_fitting_are_deduplicated() {
        let list = ResolutionList {
            has_original: false,
            resolutions: vec![Resolution::new(1280, 720), Resolution::new(1280, 721)],
        };
        let plan = plan_renditions(&list, &source(1280, 720, 30));
        assert_eq!(plan.len(), 1);
    }
}
