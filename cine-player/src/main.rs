//! # Cine Player
//!
//! Headless host for cine-core: opens a WebM/Matroska file, plays it to
//! completion through counting sinks and reports what was delivered.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cine_core::{AudioChunk, Player, PlayerConfig, VideoFrame};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Command Line
// ============================================================================

#[derive(Debug, PartialEq)]
struct CliOptions {
    input: PathBuf,
    config: Option<PathBuf>,
    looping: bool,
}

const USAGE: &str = "usage: cine <file> [--config <json>] [--loop]";

fn parse_args(args: &[String]) -> Result<CliOptions> {
    let mut input: Option<PathBuf> = None;
    let mut config: Option<PathBuf> = None;
    let mut looping = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                config = Some(PathBuf::from(value));
                i += 2;
            }
            "--loop" | "-l" => {
                looping = true;
                i += 1;
            }
            "--help" | "-h" => {
                return Err(anyhow::anyhow!(USAGE));
            }
            other if other.starts_with('-') => {
                return Err(anyhow::anyhow!("Unknown option {}\n{}", other, USAGE));
            }
            other => {
                if input.is_some() {
                    return Err(anyhow::anyhow!("Only one input file is supported\n{}", USAGE));
                }
                input = Some(PathBuf::from(other));
                i += 1;
            }
        }
    }

    let input = input.ok_or_else(|| anyhow::anyhow!("No input file\n{}", USAGE))?;
    Ok(CliOptions {
        input,
        config,
        looping,
    })
}

// ============================================================================
// Delivery Counters
// ============================================================================

#[derive(Default)]
struct Counters {
    video_frames: AtomicU64,
    audio_chunks: AtomicU64,
    audio_samples: AtomicU64,
}

fn attach_sinks(player: &Player, counters: &Arc<Counters>) {
    let video = counters.clone();
    player.set_video_sink(move |frame: VideoFrame<'_>| {
        let n = video.video_frames.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 100 == 0 {
            tracing::debug!(
                "Video frame {} at {:.3}s ({}x{})",
                n,
                frame.position.as_secs_f64(),
                frame.width,
                frame.height
            );
        }
    });

    let audio = counters.clone();
    player.set_audio_sink(move |chunk: AudioChunk<'_>| {
        audio.audio_chunks.fetch_add(1, Ordering::Relaxed);
        audio
            .audio_samples
            .fetch_add(chunk.frames() as u64, Ordering::Relaxed);
    });
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cine=info,cine_core=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;

    tracing::info!("Cine Player v{}", cine_core::VERSION);

    let config = match &options.config {
        Some(path) => PlayerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    let player = Player::open(&options.input, &config)
        .map_err(|e| anyhow::anyhow!("{} (code {})", e, e.code()))?;
    let player = Arc::new(player);

    tracing::info!(
        "{}x{} {}, audio: {} ({} Hz, {} ch), duration {:.2}s",
        player.width(),
        player.height(),
        player.video_codec_name(),
        player.audio_codec_name().unwrap_or("none"),
        player.audio_sample_rate(),
        player.audio_channels(),
        player.duration().as_secs_f64()
    );

    let counters = Arc::new(Counters::default());
    attach_sinks(&player, &counters);

    let started = Instant::now();
    let mut passes = 0u64;
    loop {
        player.play()?;
        passes += 1;

        let interrupted = tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            _ = wait_finished(&player) => false,
        };
        if interrupted {
            tracing::info!("Interrupted");
            break;
        }
        if !options.looping {
            break;
        }
    }

    // Joins both session threads off the async runtime
    let stopper = player.clone();
    tokio::task::spawn_blocking(move || stopper.pause()).await?;

    let video_session = player.video_session();
    tracing::info!(
        "Playback complete: passes={}, video_frames={}, skipped={}, failed={}, audio_chunks={}, audio_samples={}, elapsed_ms={}",
        passes,
        counters.video_frames.load(Ordering::Relaxed),
        video_session.frames_skipped(),
        video_session.frames_failed(),
        counters.audio_chunks.load(Ordering::Relaxed),
        counters.audio_samples.load(Ordering::Relaxed),
        started.elapsed().as_millis()
    );

    Ok(())
}

async fn wait_finished(player: &Player) {
    while player.is_playing() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
