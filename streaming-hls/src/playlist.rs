//! M3U8 live/VOD playlist parse and emit.

use thiserror::Error;

pub const DEFAULT_VERSION: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("#EXTINF line without a following segment URI")]
    DanglingExtInf,
    #[error("segment URI has no numeric index: {0:?}")]
    UnindexedSegment(String),
    #[error("invalid #EXTINF duration: {0:?}")]
    InvalidDuration(String),
}

/// One media segment in a playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Sequence index, recovered from the segment filename (`{index}.ts`).
    pub index: u64,
    pub duration: f64,
    pub name: String,
}

/// A live or VOD HLS playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub version: u32,
    pub target_duration: u32,
    pub media_sequence: u64,
    pub is_vod: bool,
    pub is_ended: bool,
    pub fragments: Vec<Fragment>,
}

impl Playlist {
    pub fn new_live(target_duration: u32) -> Self {
        Playlist {
            version: DEFAULT_VERSION,
            target_duration,
            media_sequence: 0,
            is_vod: false,
            is_ended: false,
            fragments: Vec::new(),
        }
    }

    pub fn new_vod(target_duration: u32) -> Self {
        Playlist {
            version: DEFAULT_VERSION,
            target_duration,
            media_sequence: 0,
            is_vod: true,
            is_ended: true,
            fragments: Vec::new(),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", self.target_duration));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));

        if self.is_vod {
            out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
        }

        for fragment in &self.fragments {
            out.push_str(&format!("#EXTINF:{:.3},\n", fragment.duration));
            out.push_str(&fragment.name);
            out.push('\n');
        }

        if self.is_ended {
            out.push_str("#EXT-X-ENDLIST\n");
        }

        out
    }

    /// Parses a playlist as emitted by the transcoder subprocess. Fragment
    /// indexes are recovered from the numeric stem of each segment's
    /// filename (`"7.ts"` → index 7), which is how the encoder correlates
    /// playlist pushes against storage-write acknowledgements for the same
    /// fragment (see the ordered fragment assembly in the encoder task
    /// engine).
    pub fn parse(raw: &str) -> Result<Playlist, PlaylistError> {
        let mut lines = raw.lines();

        let header = lines.next().unwrap_or("").trim();
        if header != "#EXTM3U" {
            return Err(PlaylistError::MissingHeader);
        }

        let mut version = DEFAULT_VERSION;
        let mut target_duration = 0u32;
        let mut media_sequence = 0u64;
        let mut is_vod = false;
        let mut is_ended = false;
        let mut fragments = Vec::new();

        let mut pending_duration: Option<f64> = None;

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix("#EXT-X-VERSION:") {
                version = rest.trim().parse().unwrap_or(DEFAULT_VERSION);
            } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                target_duration = rest.trim().parse().unwrap_or(0);
            } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                media_sequence = rest.trim().parse().unwrap_or(0);
            } else if line == "#EXT-X-PLAYLIST-TYPE:VOD" {
                is_vod = true;
            } else if line == "#EXT-X-ENDLIST" {
                is_ended = true;
            } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
                let duration_str = rest.trim_end_matches(',').trim();
                let duration = duration_str
                    .parse::<f64>()
                    .map_err(|_| PlaylistError::InvalidDuration(duration_str.to_string()))?;
                pending_duration = Some(duration);
            } else if line.starts_with('#') {
                // Unrecognized tag: ignored. The transcoder's playlist may
                // carry tags (e.g. #EXT-X-INDEPENDENT-SEGMENTS) this codec
                // has no use for.
            } else {
                let duration = pending_duration.take().ok_or(PlaylistError::DanglingExtInf)?;
                let index = segment_index(line)?;
                fragments.push(Fragment { index, duration, name: line.to_string() });
            }
        }

        Ok(Playlist { version, target_duration, media_sequence, is_vod, is_ended, fragments })
    }
}

fn segment_index(name: &str) -> Result<u64, PlaylistError> {
    let stem = name.rsplit('/').next().unwrap_or(name);
    let stem = stem.strip_suffix(".ts").unwrap_or(stem);
    stem.parse::<u64>().map_err(|_| PlaylistError::UnindexedSegment(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_empty_live_playlist() {
        let p = Playlist::new_live(6);
        let wire = p.encode();
        assert!(wire.starts_with("#EXTM3U\n"));
        assert!(wire.contains("#EXT-X-TARGETDURATION:6"));
        assert!(!wire.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn encodes_vod_with_endlist_and_type() {
        let mut p = Playlist::new_vod(6);
        p.fragments.push(Fragment { index: 0, duration: 6.006, name: "0.ts".to_string() });
        let wire = p.encode();
        assert!(wire.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(wire.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn round_trips_live_playlist_with_fragments() {
        let mut p = Playlist::new_live(6);
        p.media_sequence = 3;
        p.fragments.push(Fragment { index: 3, duration: 6.0, name: "3.ts".to_string() });
        p.fragments.push(Fragment { index: 4, duration: 5.5, name: "4.ts".to_string() });

        let wire = p.encode();
        let parsed = Playlist::parse(&wire).unwrap();

        assert_eq!(parsed.media_sequence, 3);
        assert_eq!(parsed.fragments.len(), 2);
        assert_eq!(parsed.fragments[0].index, 3);
        assert_eq!(parsed.fragments[1].index, 4);
    }

    #[test]
    fn rejects_playlist_without_header() {
        assert_eq!(Playlist::parse("not a playlist"), Err(PlaylistError::MissingHeader));
    }

    #[test]
    fn rejects_segment_uri_missing_numeric_index() {
        let raw = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:6.0,\nsegment.ts\n";
        assert!(matches!(Playlist::parse(raw), Err(PlaylistError::UnindexedSegment(_))));
    }

    #[test]
    fn ignores_unrecognized_tags() {
        let raw = "#EXTM3U\n#EXT-X-INDEPENDENT-SEGMENTS\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:6.0,\n0.ts\n";
        let p = Playlist::parse(raw).unwrap();
        assert_eq!(p.fragments.len(), 1);
    }
}
