//! Delivery sinks: where decoded frames and samples go.
//!
//! Sinks run synchronously on the session thread. The views they receive
//! point into the session's scratch buffers and are only valid for the call.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::PackedFormat;

/// One converted video frame.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PackedFormat,
    /// Tightly packed rows, `width * 4` bytes each
    pub pixels: &'a [u8],
    /// Media time of the frame
    pub position: Duration,
}

/// Interleaved decoded audio.
#[derive(Debug, Clone, Copy)]
pub struct AudioChunk<'a> {
    pub samples: &'a [f32],
    pub channels: u32,
    pub sample_rate: u32,
    pub position: Duration,
}

impl AudioChunk<'_> {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: VideoFrame<'_>);
}

pub trait AudioSink: Send + Sync {
    fn on_samples(&self, chunk: AudioChunk<'_>);
}

impl<F> VideoSink for F
where
    F: Fn(VideoFrame<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: VideoFrame<'_>) {
        self(frame)
    }
}

impl<F> AudioSink for F
where
    F: Fn(AudioChunk<'_>) + Send + Sync,
{
    fn on_samples(&self, chunk: AudioChunk<'_>) {
        self(chunk)
    }
}

/// Replaceable sink registration, shared between the controller and a
/// session. Sessions clone the `Arc` out per frame and call it unlocked.
pub type SinkSlot<S> = Arc<RwLock<Option<Arc<S>>>>;

pub type VideoSinkSlot = SinkSlot<dyn VideoSink>;
pub type AudioSinkSlot = SinkSlot<dyn AudioSink>;

pub fn empty_slot<S: ?Sized>() -> SinkSlot<S> {
    Arc::new(RwLock::new(None))
}
