//! Playback controller
//!
//! Owns the two track sessions and the sink registrations. Video and audio
//! each run off the wall clock; nothing here pulls one towards the other.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::block_index::BlockIndex;
use crate::config::PlayerConfig;
use crate::decode::CodecRegistry;
use crate::demuxer::{open_container, Container, TrackKind};
use crate::error::{DecodeError, PlayerError, Result};
use crate::reader::SharedReader;
use crate::session::{SessionState, TrackSession};
use crate::sink::{empty_slot, AudioSink, AudioSinkSlot, VideoSink, VideoSinkSlot};

pub struct Player {
    width: u32,
    height: u32,
    video_codec_name: String,
    audio_codec_name: Option<String>,
    audio_sample_rate: u32,
    audio_channels: u32,
    duration: Duration,
    video_sink: VideoSinkSlot,
    audio_sink: AudioSinkSlot,
    // Declared last: sessions join their threads on drop
    video: TrackSession,
    audio: Option<TrackSession>,
}

impl Player {
    /// Open a container from disk with the codecs named in `config`.
    pub fn open(path: impl AsRef<Path>, config: &PlayerConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;
        let container = open_container(path)?;
        let registry = CodecRegistry::from_config(&config.codecs);
        let player = Self::from_container(container, &registry, config)?;
        info!(
            "Opened {}: {}x{} {}, audio: {}",
            path.display(),
            player.width,
            player.height,
            player.video_codec_name,
            player.audio_codec_name().unwrap_or("none")
        );
        Ok(player)
    }

    /// Build a player over an already parsed container.
    ///
    /// An audio track whose codec is not registered, or whose decoder cannot
    /// be set up from the track header, is dropped; playback goes ahead with
    /// video only.
    pub fn from_container(container: Container, registry: &CodecRegistry, config: &PlayerConfig) -> Result<Self> {
        let Container { info, source } = container;
        let index = BlockIndex::build(&info)?;
        let reader = SharedReader::new(source);

        let video_track = index.video_track();
        let video_decoder = registry.create_video(video_track)?;
        let video_codec_name = registry
            .video_codec_name(&video_track.codec_id)
            .unwrap_or(video_decoder.name())
            .to_string();

        let (width, height) = match (info.display_width, info.display_height) {
            (0, _) | (_, 0) => (video_track.width, video_track.height),
            size => size,
        };

        let video_sink: VideoSinkSlot = empty_slot();
        let audio_sink: AudioSinkSlot = empty_slot();

        let video = TrackSession::video(
            index.blocks(TrackKind::Video),
            reader.clone(),
            video_decoder,
            video_sink.clone(),
            video_track,
            config,
        );

        let mut audio = None;
        let mut audio_codec_name = None;
        let mut audio_sample_rate = 0;
        let mut audio_channels = 0;
        if let Some(track) = index.audio_track() {
            match registry.create_audio(track) {
                Ok(decoder) => {
                    audio_codec_name = Some(
                        registry
                            .audio_codec_name(&track.codec_id)
                            .unwrap_or(decoder.name())
                            .to_string(),
                    );
                    audio_sample_rate = decoder.sample_rate();
                    audio_channels = decoder.channels();
                    audio = Some(TrackSession::audio(
                        index.blocks(TrackKind::Audio),
                        reader,
                        decoder,
                        audio_sink.clone(),
                        config,
                    ));
                }
                Err(e) if !e.is_fatal() || matches!(e, PlayerError::Decode(DecodeError::Init(_))) => {
                    warn!("{}; playing without audio", e);
                    audio_codec_name = Some(format!("Unsupported Codec {}", track.codec_id));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            width,
            height,
            video_codec_name,
            audio_codec_name,
            audio_sample_rate,
            audio_channels,
            duration: index.duration(TrackKind::Video),
            video_sink,
            audio_sink,
            video,
            audio,
        })
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Restart from the beginning.
    pub fn play(&self) -> Result<()> {
        self.stop();
        self.resume()
    }

    /// Halt both loops and rewind them.
    pub fn stop(&self) {
        self.pause();
        self.video.stop();
        if let Some(audio) = &self.audio {
            audio.stop();
        }
        info!("Playback stopped");
    }

    /// Halt both loops, keeping their positions. Returns once both threads
    /// have exited.
    pub fn pause(&self) {
        self.video.request_stop();
        if let Some(audio) = &self.audio {
            audio.request_stop();
        }
        self.video.join();
        if let Some(audio) = &self.audio {
            audio.join();
        }
    }

    /// Start whichever loops are idle, from where they left off.
    pub fn resume(&self) -> Result<()> {
        self.video.resume()?;
        if let Some(audio) = &self.audio {
            if let Err(e) = audio.resume() {
                self.video.pause();
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.video.is_running() || self.audio.as_ref().is_some_and(TrackSession::is_running)
    }

    pub fn state(&self) -> SessionState {
        if self.is_playing() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// 0 when there is no playable audio.
    pub fn audio_sample_rate(&self) -> u32 {
        self.audio_sample_rate
    }

    pub fn audio_channels(&self) -> u32 {
        self.audio_channels
    }

    pub fn video_codec_name(&self) -> &str {
        &self.video_codec_name
    }

    /// `None` without an audio track. `"Unsupported Codec <id>"` when the
    /// track exists but could not be decoded.
    pub fn audio_codec_name(&self) -> Option<&str> {
        self.audio_codec_name.as_deref()
    }

    /// Video clock.
    pub fn position(&self) -> Duration {
        self.video.position()
    }

    pub fn audio_position(&self) -> Option<Duration> {
        self.audio.as_ref().map(TrackSession::position)
    }

    /// Audio gain, `None` without playable audio.
    pub fn audio_gain(&self) -> Option<f32> {
        self.audio.as_ref().map(TrackSession::gain)
    }

    /// Change the audio gain, also while playing. Negative values mute.
    pub fn set_audio_gain(&self, gain: f32) {
        if let Some(audio) = &self.audio {
            audio.set_gain(gain.max(0.0));
        }
    }

    /// Length of the video track as inferred from block timestamps.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    // ========================================================================
    // Sinks
    // ========================================================================

    pub fn set_video_sink(&self, sink: impl VideoSink + 'static) {
        *self.video_sink.write() = Some(Arc::new(sink));
    }

    pub fn set_audio_sink(&self, sink: impl AudioSink + 'static) {
        *self.audio_sink.write() = Some(Arc::new(sink));
    }

    pub fn clear_sinks(&self) {
        *self.video_sink.write() = None;
        *self.audio_sink.write() = None;
    }

    pub fn video_session(&self) -> &TrackSession {
        &self.video
    }

    pub fn audio_session(&self) -> Option<&TrackSession> {
        self.audio.as_ref()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.pause();
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("video_codec", &self.video_codec_name)
            .field("audio_codec", &self.audio_codec_name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::{ContainerInfo, TrackInfo};
    use std::io::Cursor;

    fn container(tracks: Vec<TrackInfo>) -> Container {
        Container::new(
            ContainerInfo {
                display_width: 0,
                display_height: 0,
                tracks,
                blocks: Vec::new(),
            },
            Cursor::new(Vec::<u8>::new()),
        )
    }

    #[test]
    fn test_unknown_video_codec_is_fatal() {
        let err = Player::from_container(
            container(vec![TrackInfo::video(1, "V_VP9", 16, 16)]),
            &CodecRegistry::empty(),
            &PlayerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedVideoCodec(ref id) if id == "V_VP9"));
        assert_eq!(err.code(), 3);
    }

    #[test]
    fn test_factory_failure_is_fatal() {
        let mut registry = CodecRegistry::empty();
        registry.register_video("V_TEST", "Test", |_| Err(DecodeError::Init("broken".into())));
        let err = Player::from_container(
            container(vec![TrackInfo::video(1, "V_TEST", 16, 16)]),
            &registry,
            &PlayerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlayerError::Decode(_)));
    }

    #[test]
    fn test_open_missing_file() {
        let err = Player::open("/definitely/not/here.webm", &PlayerConfig::default()).unwrap_err();
        assert!(matches!(err, PlayerError::ContainerOpen(_)));
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let mut config = PlayerConfig::default();
        config.pacing.overrun_factor = 0;
        let err = Player::open("/definitely/not/here.webm", &config).unwrap_err();
        assert!(matches!(err, PlayerError::Config(_)));
    }
}
