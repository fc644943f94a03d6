//! # Cine Core
//!
//! Dual-stream timed decode-and-deliver engine for WebM/Matroska files.
//!
//! A [`Player`] indexes the first video and first audio track of a
//! container, then runs one paced loop per track on its own thread. Video
//! frames are converted to packed RGBA/BGRA and handed to a [`VideoSink`];
//! decoded audio goes to an [`AudioSink`] as interleaved `f32`.

// ============================================================================
// Container
// ============================================================================
pub mod demuxer;
pub mod ebml;
pub mod mkv;
pub mod reader;

// ============================================================================
// Decoders
// ============================================================================
pub mod decode;
#[cfg(feature = "h264")]
pub mod h264_utils;
#[cfg(feature = "vorbis")]
pub mod audio;

// ============================================================================
// Media Processing
// ============================================================================
pub mod buffer;
pub mod pixel_convert;
pub mod sync;

// ============================================================================
// Playback
// ============================================================================
pub mod block_index;
pub mod player;
pub mod session;
pub mod sink;

// ============================================================================
// Support
// ============================================================================
pub mod config;
pub mod error;

pub use block_index::{BlockIndex, BlockRef};
pub use config::{PackedFormat, PlayerConfig};
pub use decode::{AudioDecoder, CodecRegistry, I420Frame, VideoDecoder, YuvImage};
pub use demuxer::{Container, ContainerBlock, ContainerInfo, FrameRange, TrackInfo, TrackKind};
pub use error::{DecodeError, PlayerError};
pub use player::Player;
pub use session::{SessionState, TrackSession};
pub use sink::{AudioChunk, AudioSink, VideoFrame, VideoSink};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
