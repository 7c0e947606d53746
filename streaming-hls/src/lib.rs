//! HLS-facing codecs: output-resolution/preview string encoding and the
//! M3U8 playlist format written by live and VOD encoding tasks.

pub mod playlist;
pub mod resolution;

pub use playlist::{Fragment, Playlist, PlaylistError};
pub use resolution::{PreviewsConfig, Resolution, ResolutionError, ResolutionList};
