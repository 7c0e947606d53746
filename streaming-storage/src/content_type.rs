//! Content-type and cache-control selection by file extension, shared by
//! every backend that speaks HTTP (object storage and the HTTP backend;
//! the filesystem backend has no use for either).

/// Default: `max-age=31536000` (segments and images are immutable once
/// written — a stream id never reuses a fragment index).
const DEFAULT_CACHE_CONTROL: &str = "max-age=31536000";
const NO_CACHE: &str = "no-cache";

pub struct ContentType {
    pub mime: &'static str,
    pub cache_control: &'static str,
}

/// Picks content-type and cache-control by the path's extension.
/// Playlists (`.m3u8`) and metadata (`.json`) are mutable and must never be
/// cached; everything else, including unrecognized extensions, is treated
/// as an immutable artifact.
pub fn content_type_for(path: &str) -> ContentType {
    let extension = path.rsplit('.').next().unwrap_or("");
    match extension {
        "m3u8" => ContentType { mime: "application/x-mpegURL", cache_control: NO_CACHE },
        "json" => ContentType { mime: "application/json", cache_control: NO_CACHE },
        "ts" => ContentType { mime: "video/mp2t", cache_control: DEFAULT_CACHE_CONTROL },
        "jpg" | "jpeg" => ContentType { mime: "image/jpg", cache_control: DEFAULT_CACHE_CONTROL },
        _ => ContentType { mime: "application/octet-stream", cache_control: DEFAULT_CACHE_CONTROL },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlists_are_never_cached() {
        let ct = content_type_for("hls/ch1/s1/720x480-30/live.m3u8");
        assert_eq!(ct.mime, "application/x-mpegURL");
        assert_eq!(ct.cache_control, "no-cache");
    }

    #[test]
    fn segments_are_cached_forever() {
        let ct = content_type_for("hls/ch1/s1/720x480-30/42.ts");
        assert_eq!(ct.mime, "video/mp2t");
        assert_eq!(ct.cache_control, "max-age=31536000");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let ct = content_type_for("hls/ch1/s1/notes");
        assert_eq!(ct.mime, "application/octet-stream");
        assert_eq!(ct.cache_control, "max-age=31536000");
    }

    #[test]
    fn previews_use_default_cache_control() {
        let ct = content_type_for("hls/ch1/s1/previews/3.jpg");
        assert_eq!(ct.mime, "image/jpg");
        assert_eq!(ct.cache_control, "max-age=31536000");
    }
}
