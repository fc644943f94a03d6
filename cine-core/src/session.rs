//! Track sessions
//!
//! One session per media type. A session owns everything its loop touches
//! (decoder, staging buffer, output buffer, pacer) inside a worker value
//! that moves onto the session thread and comes back on join. The
//! controller only sees the atomics in [`SessionShared`].
//!
//! Loop, per block (stop flag checked once, at the top), per frame:
//! deadline, read, decode, catch-up check, convert + deliver, pace,
//! advance position.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::block_index::BlockRef;
use crate::buffer::StagingBuffer;
use crate::config::PlayerConfig;
use crate::decode::{AudioDecoder, VideoDecoder};
use crate::demuxer::{FrameRange, TrackInfo, TrackKind};
use crate::error::{DecodeError, PlayerError, Result};
use crate::pixel_convert::PixelConverter;
use crate::reader::SharedReader;
use crate::sink::{AudioChunk, AudioSinkSlot, VideoFrame, VideoSinkSlot};
use crate::sync::FramePacer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// State the controller reads while the loop runs.
#[derive(Debug, Default)]
struct SessionShared {
    stop: AtomicBool,
    running: AtomicBool,
    cursor: AtomicUsize,
    position_ns: AtomicU64,
    frames_decoded: AtomicU64,
    frames_delivered: AtomicU64,
    frames_skipped: AtomicU64,
    frames_failed: AtomicU64,
    /// Audio gain as `f32` bits.
    gain: AtomicU32,
}

// ============================================================================
// Worker
// ============================================================================

enum Stage {
    Video {
        decoder: Box<dyn VideoDecoder>,
        converter: PixelConverter,
        pixels: Vec<u8>,
        sink: VideoSinkSlot,
    },
    Audio {
        decoder: Box<dyn AudioDecoder>,
        samples: Vec<f32>,
        sink: AudioSinkSlot,
    },
}

impl Stage {
    /// Returns the number of samples written; always 0 for video.
    fn decode(&mut self, data: &[u8]) -> std::result::Result<usize, DecodeError> {
        match self {
            Stage::Video { decoder, .. } => decoder.decode(data).map(|()| 0),
            Stage::Audio { decoder, samples, .. } => decoder.decode(data, samples),
        }
    }
}

struct SessionWorker {
    kind: TrackKind,
    blocks: Arc<[BlockRef]>,
    reader: SharedReader,
    staging: StagingBuffer,
    pacer: FramePacer,
    stage: Stage,
    cursor: usize,
    position: Duration,
    shared: Arc<SessionShared>,
}

impl SessionWorker {
    fn run(mut self: Box<Self>) -> Box<Self> {
        let blocks = Arc::clone(&self.blocks);
        debug!(
            kind = ?self.kind,
            cursor = self.cursor,
            blocks = blocks.len(),
            "Session loop started"
        );

        while self.cursor < blocks.len() {
            if self.shared.stop.load(Ordering::Relaxed) {
                break;
            }

            let block = &blocks[self.cursor];
            for &range in &block.frames {
                self.play_frame(range, block.frame_duration);
            }

            self.cursor += 1;
            self.shared.cursor.store(self.cursor, Ordering::Relaxed);
        }

        debug!(
            kind = ?self.kind,
            cursor = self.cursor,
            position_ms = self.position.as_millis() as u64,
            late = self.pacer.frames_late(),
            "Session loop ended"
        );
        self.shared.running.store(false, Ordering::Release);
        self
    }

    fn play_frame(&mut self, range: FrameRange, duration: Duration) {
        let deadline = self.pacer.deadline(Instant::now(), duration);
        let Self {
            kind,
            reader,
            staging,
            pacer,
            stage,
            position,
            shared,
            ..
        } = &mut *self;

        let bytes = staging.prepare(range.len as usize);
        let decoded = match reader.read_frame(range, bytes) {
            Ok(()) => stage.decode(bytes).map_err(PlayerError::from),
            Err(e) => Err(PlayerError::Io(e)),
        };
        match &decoded {
            Ok(_) => {
                shared.frames_decoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(kind = ?kind, offset = range.offset, len = range.len, "Skipping frame: {}", e);
                shared.frames_failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        match stage {
            Stage::Video {
                decoder,
                converter,
                pixels,
                sink,
            } => {
                // Makeup drains by media time, whether or not this frame decoded
                if !pacer.should_deliver(duration) {
                    shared.frames_skipped.fetch_add(1, Ordering::Relaxed);
                } else if decoded.is_ok() {
                    match deliver_video(&mut **decoder, converter, pixels, sink, *position) {
                        Ok(true) => {
                            shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {}
                        Err(e) => warn!("Video frame not delivered: {}", e),
                    }
                }
            }
            Stage::Audio {
                decoder,
                samples,
                sink,
            } => {
                let count = decoded.unwrap_or(0);
                if count > 0 {
                    let gain = f32::from_bits(shared.gain.load(Ordering::Relaxed));
                    if gain != 1.0 {
                        samples[..count].iter_mut().for_each(|s| *s *= gain);
                    }
                    if let Some(target) = sink.read().clone() {
                        target.on_samples(AudioChunk {
                            samples: &samples[..count],
                            channels: decoder.channels(),
                            sample_rate: decoder.sample_rate(),
                            position: *position,
                        });
                        shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        pacer.wait_until(deadline);

        *position += duration;
        shared
            .position_ns
            .store(position.as_nanos() as u64, Ordering::Relaxed);
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.position = Duration::ZERO;
        self.pacer.reset();
    }
}

/// Retrieve, convert and hand over the decoder's picture. `Ok(false)` when
/// there was nothing to deliver or nobody to deliver it to.
fn deliver_video(
    decoder: &mut dyn VideoDecoder,
    converter: &PixelConverter,
    pixels: &mut Vec<u8>,
    sink: &VideoSinkSlot,
    position: Duration,
) -> std::result::Result<bool, DecodeError> {
    let Some(image) = decoder.take_image() else {
        return Ok(false);
    };
    let Some(target) = sink.read().clone() else {
        return Ok(false);
    };

    let needed = converter.format().buffer_size(image.width, image.height);
    if pixels.len() != needed {
        pixels.resize(needed, 0);
    }
    converter.convert(&image, pixels)?;

    target.on_frame(VideoFrame {
        width: image.width,
        height: image.height,
        format: converter.format(),
        pixels,
        position,
    });
    Ok(true)
}

// ============================================================================
// Session handle
// ============================================================================

enum WorkerSlot {
    Idle(Box<SessionWorker>),
    Running(JoinHandle<Box<SessionWorker>>),
    /// The worker died with its thread.
    Lost,
}

pub struct TrackSession {
    kind: TrackKind,
    block_count: usize,
    shared: Arc<SessionShared>,
    worker: Mutex<WorkerSlot>,
}

impl TrackSession {
    pub fn video(
        blocks: Arc<[BlockRef]>,
        reader: SharedReader,
        decoder: Box<dyn VideoDecoder>,
        sink: VideoSinkSlot,
        track: &TrackInfo,
        config: &PlayerConfig,
    ) -> Self {
        let format = config.output.format;
        let stage = Stage::Video {
            decoder,
            converter: PixelConverter::new(format),
            pixels: vec![0u8; format.buffer_size(track.width, track.height)],
            sink,
        };
        Self::new(TrackKind::Video, blocks, reader, FramePacer::video(&config.pacing), stage)
    }

    pub fn audio(
        blocks: Arc<[BlockRef]>,
        reader: SharedReader,
        decoder: Box<dyn AudioDecoder>,
        sink: AudioSinkSlot,
        config: &PlayerConfig,
    ) -> Self {
        let channels = decoder.channels().max(1) as usize;
        let stage = Stage::Audio {
            samples: vec![0.0; config.audio_buffer_frames * channels],
            decoder,
            sink,
        };
        let session = Self::new(TrackKind::Audio, blocks, reader, FramePacer::audio(&config.pacing), stage);
        session.set_gain(config.audio_gain);
        session
    }

    fn new(kind: TrackKind, blocks: Arc<[BlockRef]>, reader: SharedReader, pacer: FramePacer, stage: Stage) -> Self {
        let shared = Arc::new(SessionShared {
            gain: AtomicU32::new(1.0f32.to_bits()),
            ..SessionShared::default()
        });
        let worker = SessionWorker {
            kind,
            blocks: Arc::clone(&blocks),
            reader,
            staging: StagingBuffer::new(),
            pacer,
            stage,
            cursor: 0,
            position: Duration::ZERO,
            shared: Arc::clone(&shared),
        };
        Self {
            kind,
            block_count: blocks.len(),
            shared,
            worker: Mutex::new(WorkerSlot::Idle(Box::new(worker))),
        }
    }

    /// Start the loop from the current cursor. No-op while running.
    pub fn resume(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        let worker = match std::mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Running(handle) if !handle.is_finished() => {
                *slot = WorkerSlot::Running(handle);
                return Ok(());
            }
            WorkerSlot::Running(handle) => handle.join().map_err(|_| self.lost())?,
            WorkerSlot::Idle(worker) => worker,
            WorkerSlot::Lost => return Err(self.lost()),
        };

        self.shared.stop.store(false, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::Release);

        let name = match self.kind {
            TrackKind::Video => "cine-video",
            TrackKind::Audio => "cine-audio",
        };
        match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                *slot = WorkerSlot::Running(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(PlayerError::Io(e))
            }
        }
    }

    /// Ask the loop to exit at the next block boundary and wait for it.
    /// Cursor and position are kept.
    pub fn pause(&self) {
        self.request_stop();
        self.join();
    }

    /// Raise the stop flag without waiting. The loop finishes its current
    /// block first.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the loop thread to exit. Returns at once when idle; a loop
    /// without a stop request runs to the last block first.
    pub fn join(&self) {
        let mut slot = self.worker.lock();
        *slot = match std::mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Running(handle) => match handle.join() {
                Ok(worker) => WorkerSlot::Idle(worker),
                Err(_) => {
                    error!(kind = ?self.kind, "Session thread panicked");
                    WorkerSlot::Lost
                }
            },
            other => other,
        };
        self.shared.running.store(false, Ordering::Release);
    }

    /// Pause, then rewind to the first block.
    pub fn stop(&self) {
        self.pause();

        let mut slot = self.worker.lock();
        if let WorkerSlot::Idle(worker) = &mut *slot {
            worker.rewind();
        }
        self.shared.cursor.store(0, Ordering::Relaxed);
        self.shared.position_ns.store(0, Ordering::Relaxed);
    }

    fn lost(&self) -> PlayerError {
        let name = match self.kind {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        };
        PlayerError::SessionLost(name.to_string())
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        if self.is_running() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// Index of the next block to play.
    pub fn cursor(&self) -> usize {
        self.shared.cursor.load(Ordering::Relaxed)
    }

    /// Media time played so far.
    pub fn position(&self) -> Duration {
        Duration::from_nanos(self.shared.position_ns.load(Ordering::Relaxed))
    }

    /// Scale applied to decoded audio samples before delivery. Takes
    /// effect from the next frame; ignored by video sessions.
    pub fn set_gain(&self, gain: f32) {
        self.shared.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.shared.gain.load(Ordering::Relaxed))
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn frames_decoded(&self) -> u64 {
        self.shared.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames_delivered.load(Ordering::Relaxed)
    }

    /// Video frames decoded but not presented while catching up.
    pub fn frames_skipped(&self) -> u64 {
        self.shared.frames_skipped.load(Ordering::Relaxed)
    }

    /// Frames whose read or decode failed.
    pub fn frames_failed(&self) -> u64 {
        self.shared.frames_failed.load(Ordering::Relaxed)
    }
}

impl Drop for TrackSession {
    fn drop(&mut self) {
        self.pause();
    }
}

impl std::fmt::Debug for TrackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackSession")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .field("block_count", &self.block_count)
            .finish()
    }
}
