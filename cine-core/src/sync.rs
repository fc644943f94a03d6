//! Frame pacing
//!
//! Each track runs off the wall clock on its own; nothing here compares
//! audio to video. Video sleeps until each frame's deadline and, when it
//! falls behind, stops presenting frames until the lateness is repaid.
//! Audio never waits and never skips.

use std::time::{Duration, Instant};

use crate::config::PacingConfig;
use crate::demuxer::TrackKind;

/// Per-session pacing state.
#[derive(Debug, Clone)]
pub struct FramePacer {
    kind: TrackKind,
    /// Subtracted from every frame duration (video epsilon / audio lead)
    slack: Duration,
    catch_up: bool,
    overrun_factor: u32,
    wait: bool,
    /// Lateness still to be repaid by skipping presentation
    makeup: Duration,
    frames_late: u64,
}

impl FramePacer {
    pub fn video(config: &PacingConfig) -> Self {
        Self {
            kind: TrackKind::Video,
            slack: config.video_epsilon(),
            catch_up: config.catch_up,
            overrun_factor: config.overrun_factor,
            wait: true,
            makeup: Duration::ZERO,
            frames_late: 0,
        }
    }

    pub fn audio(config: &PacingConfig) -> Self {
        Self {
            kind: TrackKind::Audio,
            slack: config.audio_lead(),
            catch_up: false,
            overrun_factor: config.overrun_factor,
            wait: config.audio_wait,
            makeup: Duration::ZERO,
            frames_late: 0,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Wall-clock deadline of a frame that starts at `start`.
    pub fn deadline(&self, start: Instant, duration: Duration) -> Instant {
        start + duration.saturating_sub(self.slack)
    }

    /// Whether the current frame should be presented. While lateness is
    /// outstanding the frame is skipped and its duration repays it.
    pub fn should_deliver(&mut self, duration: Duration) -> bool {
        if !self.catch_up || self.makeup.is_zero() {
            return true;
        }
        self.makeup = self.makeup.saturating_sub(duration);
        false
    }

    /// Account for the frame that just finished at `now`.
    ///
    /// Returns how long the loop should sleep, or `None` when it must go
    /// straight on to the next frame.
    pub fn settle(&mut self, now: Instant, deadline: Instant) -> Option<Duration> {
        if now > deadline {
            let overrun = now - deadline;
            self.frames_late += 1;
            if self.catch_up {
                self.makeup += overrun * self.overrun_factor;
            }
            tracing::trace!(
                kind = ?self.kind,
                overrun_us = overrun.as_micros() as u64,
                makeup_us = self.makeup.as_micros() as u64,
                "Frame late"
            );
            return None;
        }

        if self.wait {
            Some(deadline - now)
        } else {
            None
        }
    }

    /// Settle and sleep until the deadline if there is time left.
    pub fn wait_until(&mut self, deadline: Instant) {
        if let Some(wait) = self.settle(Instant::now(), deadline) {
            std::thread::sleep(wait);
        }
    }

    pub fn makeup(&self) -> Duration {
        self.makeup
    }

    pub fn frames_late(&self) -> u64 {
        self.frames_late
    }

    pub fn reset(&mut self) {
        self.makeup = Duration::ZERO;
        self.frames_late = 0;
    }
}
