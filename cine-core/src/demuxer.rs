//! Container facade: what a demuxer hands to the playback engine.
//!
//! The engine never parses containers itself. It takes a [`ContainerInfo`]
//! (track table plus the ordered list of blocks with their byte ranges) and a
//! [`ByteSource`] to read those ranges from.

use std::path::Path;

use crate::error::Result;
use crate::mkv::WebmDemuxer;
use crate::reader::ByteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Byte range of one still-compressed frame inside the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub offset: u64,
    pub len: u64,
}

/// One demuxed block, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerBlock {
    pub track_number: u64,
    /// Absolute presentation timestamp in nanoseconds.
    pub timestamp_ns: i64,
    pub keyframe: bool,
    /// Laced blocks carry more than one frame.
    pub frames: Vec<FrameRange>,
}

impl ContainerBlock {
    pub fn byte_len(&self) -> u64 {
        self.frames.iter().map(|f| f.len).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub number: u64,
    pub kind: TrackKind,
    /// Matroska codec id, e.g. `V_MPEG4/ISO/AVC` or `A_VORBIS`.
    pub codec_id: String,
    pub codec_private: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u32,
}

impl TrackInfo {
    pub fn video(number: u64, codec_id: &str, width: u32, height: u32) -> Self {
        Self {
            number,
            kind: TrackKind::Video,
            codec_id: codec_id.to_string(),
            codec_private: Vec::new(),
            width,
            height,
            sample_rate: 0,
            channels: 0,
        }
    }

    pub fn audio(number: u64, codec_id: &str, sample_rate: u32, channels: u32) -> Self {
        Self {
            number,
            kind: TrackKind::Audio,
            codec_id: codec_id.to_string(),
            codec_private: Vec::new(),
            width: 0,
            height: 0,
            sample_rate,
            channels,
        }
    }

    pub fn with_codec_private(mut self, data: Vec<u8>) -> Self {
        self.codec_private = data;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    pub display_width: u32,
    pub display_height: u32,
    pub tracks: Vec<TrackInfo>,
    pub blocks: Vec<ContainerBlock>,
}

impl ContainerInfo {
    pub fn first_track(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == kind)
    }
}

/// A parsed container ready for playback.
pub struct Container {
    pub info: ContainerInfo,
    pub source: Box<dyn ByteSource>,
}

impl Container {
    pub fn new(info: ContainerInfo, source: impl ByteSource + 'static) -> Self {
        Self {
            info,
            source: Box::new(source),
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("tracks", &self.info.tracks.len())
            .field("blocks", &self.info.blocks.len())
            .finish()
    }
}

pub trait Demuxer {
    fn open(&self, path: &Path) -> Result<Container>;
}

/// Pick a demuxer by file extension.
pub fn open_container(path: &Path) -> Result<Container> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "mkv" | "webm" | "mka" | "" => WebmDemuxer.open(path),
        other => Err(crate::error::PlayerError::ContainerOpen(format!(
            "Unsupported container: {}",
            other
        ))),
    }
}
