//! Player configuration.
//!
//! Everything has a default, so an empty JSON object (or no file at all) gives
//! a working player with every compiled-in codec enabled.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decode::{compiled_audio_codecs, compiled_video_codecs};
use crate::error::{PlayerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub codecs: CodecConfig,
    pub pacing: PacingConfig,
    pub output: OutputConfig,
    /// Per-channel capacity of each audio session's output buffer.
    pub audio_buffer_frames: usize,
    /// Scale applied to every decoded audio sample. 1.0 leaves them as is.
    pub audio_gain: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            codecs: CodecConfig::default(),
            pacing: PacingConfig::default(),
            output: OutputConfig::default(),
            audio_buffer_frames: default_audio_buffer_frames(),
            audio_gain: 1.0,
        }
    }
}

fn default_audio_buffer_frames() -> usize {
    // Largest Vorbis block
    8192
}

impl PlayerConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlayerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: Self =
            serde_json::from_str(text).map_err(|e| PlayerError::Config(e.to_string()))?;
        if config.audio_buffer_frames == 0 {
            config.audio_buffer_frames = default_audio_buffer_frames();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pacing.overrun_factor == 0 {
            return Err(PlayerError::Config("pacing.overrun_factor must be at least 1".into()));
        }
        if !(self.audio_gain.is_finite() && self.audio_gain >= 0.0) {
            return Err(PlayerError::Config(format!("audio_gain {} out of range", self.audio_gain)));
        }
        Ok(())
    }
}

/// Which codecs the registry should enable, by Matroska codec id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub video: Vec<String>,
    pub audio: Vec<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            video: compiled_video_codecs().iter().map(|s| s.to_string()).collect(),
            audio: compiled_audio_codecs().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Frame pacing knobs for the two session loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Subtracted from every video deadline to avoid chronic one-tick lateness.
    pub video_epsilon_ms: u64,
    /// Audio is scheduled this much early; underrun is worse than earliness.
    pub audio_lead_ms: u64,
    /// Drop video deliveries while behind schedule.
    pub catch_up: bool,
    /// Overrun is charged to the makeup budget this many times over.
    pub overrun_factor: u32,
    /// Let the audio loop sleep until its deadline. Off: waiting stutters.
    pub audio_wait: bool,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            video_epsilon_ms: 1,
            audio_lead_ms: 1,
            catch_up: true,
            overrun_factor: 2,
            audio_wait: false,
        }
    }
}

impl PacingConfig {
    pub fn video_epsilon(&self) -> Duration {
        Duration::from_millis(self.video_epsilon_ms)
    }

    pub fn audio_lead(&self) -> Duration {
        Duration::from_millis(self.audio_lead_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: PackedFormat,
}

/// Channel order of converted video frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackedFormat {
    #[default]
    Rgba,
    Bgra,
}

impl PackedFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }

    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}
