//! Per-track block sequences built from a parsed container.
//!
//! Only the first video and first audio track are indexed. Each kept block
//! gets an inferred per-frame duration: the gap to the next kept block of
//! the same track, split evenly across the block's laced frames. The last
//! block of a track has no successor and lasts zero.

use std::sync::Arc;
use std::time::Duration;

use crate::demuxer::{ContainerBlock, ContainerInfo, FrameRange, TrackInfo, TrackKind};
use crate::error::{PlayerError, Result};

/// One indexed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub frames: Vec<FrameRange>,
    pub timestamp_ns: i64,
    pub keyframe: bool,
    /// Duration of each frame in the block
    pub frame_duration: Duration,
}

impl BlockRef {
    /// Total media time covered by the block.
    pub fn duration(&self) -> Duration {
        self.frame_duration * self.frames.len() as u32
    }
}

#[derive(Debug, Clone)]
pub struct BlockIndex {
    video_track: TrackInfo,
    audio_track: Option<TrackInfo>,
    video: Arc<[BlockRef]>,
    audio: Arc<[BlockRef]>,
}

impl BlockIndex {
    pub fn build(info: &ContainerInfo) -> Result<Self> {
        let video_track = info
            .first_track(TrackKind::Video)
            .cloned()
            .ok_or(PlayerError::NoVideoTrack)?;
        let audio_track = info.first_track(TrackKind::Audio).cloned();

        let video = collect_blocks(&info.blocks, video_track.number);
        let audio = match &audio_track {
            Some(track) => collect_blocks(&info.blocks, track.number),
            None => Vec::new(),
        };

        tracing::debug!(
            video_track = video_track.number,
            video_blocks = video.len(),
            audio_blocks = audio.len(),
            "Block index built"
        );

        Ok(Self {
            video_track,
            audio_track,
            video: video.into(),
            audio: audio.into(),
        })
    }

    /// Shared handle to one track's blocks.
    pub fn blocks(&self, kind: TrackKind) -> Arc<[BlockRef]> {
        match kind {
            TrackKind::Video => Arc::clone(&self.video),
            TrackKind::Audio => Arc::clone(&self.audio),
        }
    }

    pub fn len(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Video => self.video.len(),
            TrackKind::Audio => self.audio.len(),
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio_track.is_some()
    }

    /// Sum of the inferred frame durations of a track.
    pub fn duration(&self, kind: TrackKind) -> Duration {
        let blocks = match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        };
        blocks.iter().map(BlockRef::duration).sum()
    }

    pub fn video_track(&self) -> &TrackInfo {
        &self.video_track
    }

    pub fn audio_track(&self) -> Option<&TrackInfo> {
        self.audio_track.as_ref()
    }
}

fn collect_blocks(blocks: &[ContainerBlock], track_number: u64) -> Vec<BlockRef> {
    let kept: Vec<&ContainerBlock> = blocks
        .iter()
        .filter(|b| b.track_number == track_number && b.byte_len() > 0)
        .collect();

    kept.iter()
        .enumerate()
        .map(|(i, block)| {
            let next = kept.get(i + 1).map(|n| n.timestamp_ns);
            BlockRef {
                frames: block.frames.clone(),
                timestamp_ns: block.timestamp_ns,
                keyframe: block.keyframe,
                frame_duration: frame_duration(block.timestamp_ns, next, block.frames.len()),
            }
        })
        .collect()
}

/// Out-of-order timestamps give a negative gap, which saturates to zero.
fn frame_duration(timestamp_ns: i64, next_ns: Option<i64>, frames: usize) -> Duration {
    let Some(next) = next_ns else {
        return Duration::ZERO;
    };
    let gap = next.saturating_sub(timestamp_ns);
    if gap <= 0 || frames == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(gap as u64 / frames as u64)
}
