//! String encoding for output resolutions and preview configuration, as
//! carried by the `Resolutions`/`Previews` control-message parameters and
//! the `x-resolutions`/`x-previews` key-verification response headers.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("invalid resolution string: {0:?}")]
    InvalidFormat(String),
    #[error("invalid integer in resolution string: {0:?}")]
    InvalidInteger(String),
}

/// A single requested output rendition.
///
/// `fps` and `bitrate_kbps` of `None` mean "unbounded" / "match source",
/// mirroring the wire encoding where omitting the suffix means the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub fps: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height, fps: None, bitrate_kbps: None }
    }

    /// Decodes `WxH[-FPS][~BITRATEkbps]`, e.g. `720x480-30~2500`.
    pub fn decode(s: &str) -> Result<Resolution, ResolutionError> {
        let s = s.trim();

        let (dims_and_fps, bitrate_kbps) = match s.split_once('~') {
            Some((left, right)) => {
                let bitrate = right
                    .parse::<u32>()
                    .map_err(|_| ResolutionError::InvalidInteger(right.to_string()))?;
                (left, Some(bitrate))
            }
            None => (s, None),
        };

        let (dims, fps) = match dims_and_fps.trim().split_once('-') {
            Some((left, right)) => {
                let fps = right
                    .parse::<u32>()
                    .map_err(|_| ResolutionError::InvalidInteger(right.to_string()))?;
                (left, Some(fps))
            }
            None => (dims_and_fps, None),
        };

        let (width_str, height_str) = dims
            .trim()
            .split_once('x')
            .ok_or_else(|| ResolutionError::InvalidFormat(s.to_string()))?;

        let width = width_str
            .parse::<u32>()
            .map_err(|_| ResolutionError::InvalidInteger(width_str.to_string()))?;
        let height = height_str
            .parse::<u32>()
            .map_err(|_| ResolutionError::InvalidInteger(height_str.to_string()))?;

        Ok(Resolution { width, height, fps, bitrate_kbps })
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{}x{}", self.width, self.height);
        if let Some(fps) = self.fps {
            out.push('-');
            out.push_str(&fps.to_string());
        }
        if let Some(bitrate) = self.bitrate_kbps {
            out.push('~');
            out.push_str(&bitrate.to_string());
        }
        out
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// A requested set of renditions: optionally the source resolution
/// unmodified (`ORIGINAL`), plus zero or more explicit renditions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolutionList {
    pub has_original: bool,
    pub resolutions: Vec<Resolution>,
}

impl ResolutionList {
    /// Decodes a comma-separated list. An empty string means `ORIGINAL`
    /// only (the absence of `x-resolutions` on a 200 key-verification
    /// response carries the same meaning). Elements that fail to parse are
    /// skipped rather than failing the whole list — one malformed rendition
    /// request should not deny the entire publish.
    pub fn decode(s: &str) -> ResolutionList {
        if s.trim().is_empty() {
            return ResolutionList { has_original: true, resolutions: Vec::new() };
        }

        let mut list = ResolutionList::default();

        for part in s.split(',') {
            if part.trim().eq_ignore_ascii_case("ORIGINAL") {
                list.has_original = true;
                continue;
            }

            if let Ok(resolution) = Resolution::decode(part) {
                list.resolutions.push(resolution);
            }
        }

        list
    }

    pub fn encode(&self) -> String {
        let mut parts = Vec::with_capacity(self.resolutions.len() + 1);
        if self.has_original {
            parts.push("ORIGINAL".to_string());
        }
        parts.extend(self.resolutions.iter().map(Resolution::encode));
        parts.join(",")
    }
}

/// Image-preview generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviewsConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub delay_seconds: u32,
}

impl PreviewsConfig {
    pub fn disabled() -> Self {
        PreviewsConfig::default()
    }

    /// Decodes `WxH,DELAYSECS` or `False` (case-insensitive). Any
    /// unparseable variant is treated as disabled rather than erroring —
    /// previews are an optional enhancement, never required for a publish
    /// to proceed.
    pub fn decode(s: &str) -> PreviewsConfig {
        let s = s.trim();

        if s.eq_ignore_ascii_case("false") {
            return PreviewsConfig::disabled();
        }

        let Some((dims, delay_str)) = s.split_once(',') else {
            return PreviewsConfig::disabled();
        };

        let Ok(delay_seconds) = delay_str.trim().parse::<u32>() else {
            return PreviewsConfig::disabled();
        };
        if delay_seconds < 1 {
            return PreviewsConfig::disabled();
        }

        let Some((width_str, height_str)) = dims.trim().split_once('x') else {
            return PreviewsConfig::disabled();
        };

        let (Ok(width), Ok(height)) = (width_str.trim().parse::<u32>(), height_str.trim().parse::<u32>()) else {
            return PreviewsConfig::disabled();
        };

        PreviewsConfig { enabled: true, width, height, delay_seconds }
    }

    pub fn encode(&self) -> String {
        if self.enabled {
            format!("{}x{},{}", self.width, self.height, self.delay_seconds)
        } else {
            "False".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_dimensions() {
        let r = Resolution::decode("720x480").unwrap();
        assert_eq!(r, Resolution { width: 720, height: 480, fps: None, bitrate_kbps: None });
    }

    #[test]
    fn decodes_dimensions_with_fps_and_bitrate() {
        let r = Resolution::decode("720x480-30~2500").unwrap();
        assert_eq!(r.fps, Some(30));
        assert_eq!(r.bitrate_kbps, Some(2500));
    }

    #[test]
    fn round_trips_encode_decode() {
        let r = Resolution { width: 1280, height: 720, fps: Some(60), bitrate_kbps: Some(4000) };
        assert_eq!(Resolution::decode(&r.encode()).unwrap(), r);
    }

    #[test]
    fn rejects_malformed_dimensions() {
        assert!(Resolution::decode("not-a-resolution").is_err());
    }

    #[test]
    fn empty_resolutions_list_means_original_only() {
        let list = ResolutionList::decode("");
        assert!(list.has_original);
        assert!(list.resolutions.is_empty());
    }

    #[test]
    fn decodes_mixed_original_and_explicit_renditions() {
        let list = ResolutionList::decode("ORIGINAL,720x480-30,256x144");
        assert!(list.has_original);
        assert_eq!(list.resolutions.len(), 2);
        assert_eq!(list.resolutions[0].width, 720);
        assert_eq!(list.resolutions[1].width, 256);
    }

    #[test]
    fn malformed_element_is_skipped_not_fatal() {
        let list = ResolutionList::decode("720x480,garbage,256x144");
        assert_eq!(list.resolutions.len(), 2);
    }

    #[test]
    fn previews_false_is_disabled() {
        assert_eq!(PreviewsConfig::decode("False"), PreviewsConfig::disabled());
        assert_eq!(PreviewsConfig::decode("false"), PreviewsConfig::disabled());
    }

    #[test]
    fn previews_decodes_dimensions_and_delay() {
        let p = PreviewsConfig::decode("256x144,10");
        assert_eq!(p, PreviewsConfig { enabled: true, width: 256, height: 144, delay_seconds: 10 });
    }

    #[test]
    fn previews_round_trips() {
        let p = PreviewsConfig { enabled: true, width: 320, height: 180, delay_seconds: 5 };
        assert_eq!(PreviewsConfig::decode(&p.encode()), p);
    }

    #[test]
    fn previews_zero_delay_is_disabled() {
        assert_eq!(PreviewsConfig::decode("256x144,0"), PreviewsConfig::disabled());
    }
}
