//! Controller-level playback tests over in-memory containers and
//! deterministic decoders.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cine_core::{
    AudioChunk, AudioDecoder, CodecRegistry, Container, ContainerBlock, ContainerInfo, DecodeError, FrameRange,
    I420Frame, Player, PlayerConfig, SessionState, TrackInfo, VideoDecoder, VideoFrame, YuvImage,
};

const VIDEO_TRACK: u64 = 1;
const AUDIO_TRACK: u64 = 2;
const AUDIO_BASE: u64 = 1000;

// ============================================================================
// Test decoders
// ============================================================================

/// Records the first payload byte of every frame; every frame yields a
/// mid-grey picture.
struct MockVideo {
    seen: Arc<Mutex<Vec<u8>>>,
    frame: I420Frame,
    ready: bool,
}

impl VideoDecoder for MockVideo {
    fn name(&self) -> &str {
        "mock-video"
    }

    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.seen.lock().push(data[0]);
        self.ready = true;
        Ok(())
    }

    fn take_image(&mut self) -> Option<YuvImage<'_>> {
        if !std::mem::take(&mut self.ready) {
            return None;
        }
        Some(self.frame.as_image())
    }
}

/// Stereo, four frames per packet, every sample set to the payload byte.
struct MockAudio;

impl AudioDecoder for MockAudio {
    fn name(&self) -> &str {
        "mock-audio"
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn channels(&self) -> u32 {
        2
    }

    fn decode(&mut self, data: &[u8], out: &mut [f32]) -> Result<usize, DecodeError> {
        let value = data[0] as f32;
        out[..8].fill(value);
        Ok(8)
    }
}

fn registry(seen: &Arc<Mutex<Vec<u8>>>) -> CodecRegistry {
    let mut registry = CodecRegistry::empty();
    let seen = seen.clone();
    registry.register_video("V_MOCK", "Mock Video", move |track| {
        let mut frame = I420Frame::new(track.width, track.height);
        frame.fill(126, 128, 128);
        Ok(Box::new(MockVideo {
            seen: seen.clone(),
            frame,
            ready: false,
        }) as Box<dyn VideoDecoder>)
    });
    registry.register_audio("A_MOCK", "Mock Audio", |_| Ok(Box::new(MockAudio) as Box<dyn AudioDecoder>));
    registry
}

// ============================================================================
// Containers
// ============================================================================

fn block(track: u64, offset: u64, ts_ms: i64) -> ContainerBlock {
    ContainerBlock {
        track_number: track,
        timestamp_ns: ts_ms * 1_000_000,
        keyframe: true,
        frames: vec![FrameRange { offset, len: 1 }],
    }
}

/// Video blocks at `video_ms`, payload byte = block index. Optional audio
/// track with blocks at `audio_ms` and the given codec id.
fn container(video_ms: &[i64], audio: Option<(&str, &[i64])>) -> Container {
    let mut tracks = vec![TrackInfo::video(VIDEO_TRACK, "V_MOCK", 4, 2)];
    let mut blocks: Vec<ContainerBlock> = video_ms
        .iter()
        .enumerate()
        .map(|(i, &ts)| block(VIDEO_TRACK, i as u64, ts))
        .collect();

    if let Some((codec, audio_ms)) = audio {
        tracks.push(TrackInfo::audio(AUDIO_TRACK, codec, 48_000, 2));
        blocks.extend(
            audio_ms
                .iter()
                .enumerate()
                .map(|(i, &ts)| block(AUDIO_TRACK, AUDIO_BASE + i as u64, ts)),
        );
    }

    let mut bytes: Vec<u8> = (0..=255u8).cycle().take(AUDIO_BASE as usize + 256).collect();
    bytes[AUDIO_BASE as usize..].iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);

    Container::new(
        ContainerInfo {
            display_width: 4,
            display_height: 2,
            tracks,
            blocks,
        },
        Cursor::new(bytes),
    )
}

fn evenly_spaced(count: usize, step_ms: i64) -> Vec<i64> {
    (0..count as i64).map(|i| i * step_ms).collect()
}

fn wait_until_idle(player: &Player) {
    let start = Instant::now();
    while player.is_playing() && start.elapsed() < Duration::from_secs(10) {
        thread::sleep(Duration::from_millis(2));
    }
    player.pause();
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_three_block_playback() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&[0, 33, 66], None),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    let frames = Arc::new(AtomicUsize::new(0));
    let counter = frames.clone();
    player.set_video_sink(move |frame: VideoFrame<'_>| {
        assert_eq!((frame.width, frame.height), (4, 2));
        assert!(frame.pixels.chunks(4).all(|p| p == [128, 128, 128, 255]));
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(player.duration(), Duration::from_millis(66));
    player.play().unwrap();
    wait_until_idle(&player);

    let delivered = frames.load(Ordering::SeqCst);
    assert!(delivered >= 1 && delivered <= 3);
    assert_eq!(player.state(), SessionState::Idle);
    assert_eq!(player.video_session().cursor(), 3);
    assert_eq!(player.position(), Duration::from_millis(66));
    assert_eq!(*seen.lock(), vec![0, 1, 2]);
}

#[test]
fn test_pause_preserves_and_stop_resets() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&evenly_spaced(10, 20), None),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    player.play().unwrap();
    thread::sleep(Duration::from_millis(50));
    player.pause();
    assert!(!player.is_playing());

    let cursor = player.video_session().cursor();
    assert!(cursor < 10);
    // one frame per block, stop checked between blocks
    assert_eq!(seen.lock().len(), cursor);
    assert_eq!(player.position(), Duration::from_millis(20 * cursor as u64));

    // pausing again changes nothing
    player.pause();
    assert_eq!(player.video_session().cursor(), cursor);

    player.resume().unwrap();
    wait_until_idle(&player);
    assert_eq!(*seen.lock(), (0..10).collect::<Vec<u8>>());
    assert_eq!(player.video_session().cursor(), 10);

    player.stop();
    assert_eq!(player.video_session().cursor(), 0);
    assert_eq!(player.position(), Duration::ZERO);
    assert_eq!(player.state(), SessionState::Idle);
}

#[test]
fn test_play_restarts_from_zero() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&[0, 5, 10], None),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    player.play().unwrap();
    wait_until_idle(&player);
    player.play().unwrap();
    wait_until_idle(&player);
    assert_eq!(*seen.lock(), vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_no_audio_track() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&[0, 10], None),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    assert!(!player.has_audio());
    assert_eq!(player.audio_sample_rate(), 0);
    assert_eq!(player.audio_channels(), 0);
    assert!(player.audio_codec_name().is_none());
    assert!(player.audio_session().is_none());
    assert!(player.audio_position().is_none());

    player.play().unwrap();
    wait_until_idle(&player);
    assert_eq!(player.video_session().cursor(), 2);
}

#[test]
fn test_unsupported_audio_codec_degrades() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&[0, 10], Some(("A_OPUS", &[0, 10][..]))),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    assert!(!player.has_audio());
    assert_eq!(player.audio_sample_rate(), 0);
    assert_eq!(player.audio_codec_name(), Some("Unsupported Codec A_OPUS"));
    assert_eq!(player.video_codec_name(), "Mock Video");

    player.play().unwrap();
    wait_until_idle(&player);
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_audio_and_video_both_deliver() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&[0, 10, 20], Some(("A_MOCK", &[0, 10, 20, 30][..]))),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    assert!(player.has_audio());
    assert_eq!(player.audio_sample_rate(), 48_000);
    assert_eq!(player.audio_channels(), 2);
    assert_eq!(player.audio_codec_name(), Some("Mock Audio"));

    let chunks = Arc::new(Mutex::new(Vec::new()));
    let sink_chunks = chunks.clone();
    player.set_audio_sink(move |chunk: AudioChunk<'_>| {
        assert_eq!(chunk.channels, 2);
        assert_eq!(chunk.frames(), 4);
        sink_chunks.lock().push((chunk.samples[0], chunk.position));
    });

    player.play().unwrap();
    wait_until_idle(&player);

    let chunks = chunks.lock();
    let ms = Duration::from_millis;
    assert_eq!(
        *chunks,
        vec![(0.0, ms(0)), (1.0, ms(10)), (2.0, ms(20)), (3.0, ms(30))]
    );
    assert_eq!(player.audio_session().map(|s| s.cursor()), Some(4));
    assert_eq!(player.audio_position(), Some(ms(30)));
    assert_eq!(player.position(), ms(20));
}

#[test]
fn test_audio_decoder_setup_failure_degrades() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = registry(&seen);
    registry.register_audio("A_BROKEN", "Broken Audio", |_| {
        Err(DecodeError::Init("malformed codec private".into()))
    });
    let player = Player::from_container(
        container(&[0, 10], Some(("A_BROKEN", &[0, 10][..]))),
        &registry,
        &PlayerConfig::default(),
    )
    .unwrap();

    assert!(!player.has_audio());
    assert_eq!(player.audio_codec_name(), Some("Unsupported Codec A_BROKEN"));
    assert!(player.audio_gain().is_none());

    player.play().unwrap();
    wait_until_idle(&player);
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_audio_gain_applies_to_delivered_samples() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut config = PlayerConfig::default();
    config.audio_gain = 0.5;
    let player = Player::from_container(
        container(&[0, 10], Some(("A_MOCK", &[0, 10, 20][..]))),
        &registry(&seen),
        &config,
    )
    .unwrap();
    assert_eq!(player.audio_gain(), Some(0.5));

    let firsts = Arc::new(Mutex::new(Vec::new()));
    let sink_firsts = firsts.clone();
    player.set_audio_sink(move |chunk: AudioChunk<'_>| {
        sink_firsts.lock().push(chunk.samples[0]);
    });

    player.play().unwrap();
    wait_until_idle(&player);
    assert_eq!(*firsts.lock(), vec![0.0, 0.5, 1.0]);

    player.set_audio_gain(-3.0);
    assert_eq!(player.audio_gain(), Some(0.0));
    player.play().unwrap();
    wait_until_idle(&player);
    assert!(firsts.lock()[3..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_pause_halts_audio_while_video_finishes_its_block() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut config = PlayerConfig::default();
    config.pacing.audio_wait = true;
    let player = Player::from_container(
        container(&evenly_spaced(50, 20), Some(("A_MOCK", &evenly_spaced(100, 10)[..]))),
        &registry(&seen),
        &config,
    )
    .unwrap();

    // The first video frame holds its thread well past the pause request
    let first = Arc::new(AtomicUsize::new(0));
    let counter = first.clone();
    player.set_video_sink(move |_: VideoFrame<'_>| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(150));
        }
    });
    let chunks = Arc::new(AtomicUsize::new(0));
    let chunk_counter = chunks.clone();
    player.set_audio_sink(move |_: AudioChunk<'_>| {
        chunk_counter.fetch_add(1, Ordering::SeqCst);
    });

    player.play().unwrap();
    thread::sleep(Duration::from_millis(30));
    let before = chunks.load(Ordering::SeqCst);
    player.pause();
    let after = chunks.load(Ordering::SeqCst);

    assert!(!player.is_playing());
    assert!(before > 0);
    assert!(after - before <= 2, "audio kept going: {} -> {}", before, after);
}

#[test]
fn test_cleared_sinks_receive_nothing() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&[0, 5, 10], None),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    let frames = Arc::new(AtomicUsize::new(0));
    let counter = frames.clone();
    player.set_video_sink(move |_: VideoFrame<'_>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    player.clear_sinks();

    player.play().unwrap();
    wait_until_idle(&player);
    assert_eq!(frames.load(Ordering::SeqCst), 0);
    // decode still ran for every block
    assert_eq!(seen.lock().len(), 3);
}

#[test]
fn test_drop_joins_session_threads() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let player = Player::from_container(
        container(&evenly_spaced(50, 20), Some(("A_MOCK", &evenly_spaced(50, 20)[..]))),
        &registry(&seen),
        &PlayerConfig::default(),
    )
    .unwrap();

    player.play().unwrap();
    thread::sleep(Duration::from_millis(30));
    assert!(player.is_playing());
    drop(player);

    // the registry is long gone; the decoder's reference went down with
    // its thread
    assert_eq!(Arc::strong_count(&seen), 1);
    let decoded = seen.lock().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(seen.lock().len(), decoded);
}
