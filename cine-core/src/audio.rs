// Vorbis audio backend
// symphonia (decode) - pure Rust, no C dependencies

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_VORBIS};
use symphonia::core::formats::Packet;

use crate::decode::AudioDecoder;
use crate::demuxer::TrackInfo;
use crate::ebml::split_xiph_packets;
use crate::error::DecodeError;

// ============================================================================
// Header conversion
// ============================================================================

/// Convert Matroska `A_VORBIS` codec private data (three Xiph-laced header
/// packets) into the identification + setup pair symphonia expects as extra
/// data. The comment header carries nothing the decoder needs.
pub fn vorbis_extra_data(codec_private: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let packets = split_xiph_packets(codec_private)
        .map_err(|e| DecodeError::Init(format!("Vorbis headers: {}", e)))?;
    if packets.len() != 3 {
        return Err(DecodeError::Init(format!(
            "Vorbis headers: expected 3 packets, found {}",
            packets.len()
        )));
    }

    let mut extra = Vec::with_capacity(packets[0].len() + packets[2].len());
    extra.extend_from_slice(packets[0]);
    extra.extend_from_slice(packets[2]);
    Ok(extra)
}

fn channel_layout(count: u32) -> Channels {
    let mask = (1u64 << count.min(32)) - 1;
    Channels::from_bits_truncate(mask as u32)
}

// ============================================================================
// Decoder
// ============================================================================

pub struct VorbisDecoder {
    decoder: Box<dyn Decoder>,
    sample_rate: u32,
    channels: u32,
    samples: Option<SampleBuffer<f32>>,
    /// Running timestamp in frames, only used to label packets.
    ts: u64,
}

impl VorbisDecoder {
    pub fn new(track: &TrackInfo) -> Result<Self, DecodeError> {
        let extra = vorbis_extra_data(&track.codec_private)?;

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_VORBIS)
            .with_sample_rate(track.sample_rate)
            .with_channels(channel_layout(track.channels))
            .with_extra_data(extra.into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Init(format!("Vorbis: {}", e)))?;

        tracing::info!(
            "Vorbis decoder: {} Hz, {} channels",
            track.sample_rate,
            track.channels
        );

        Ok(Self {
            decoder,
            sample_rate: track.sample_rate,
            channels: track.channels,
            samples: None,
            ts: 0,
        })
    }
}

impl AudioDecoder for VorbisDecoder {
    fn name(&self) -> &str {
        "Vorbis"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u32 {
        self.channels
    }

    fn decode(&mut self, data: &[u8], out: &mut [f32]) -> Result<usize, DecodeError> {
        let packet = Packet::new_from_slice(0, self.ts, 0, data);
        let decoded = self
            .decoder
            .decode(&packet)
            .map_err(|e| DecodeError::DecodeFailed(format!("Vorbis: {}", e)))?;

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(0);
        }

        let needed = frames * spec.channels.count();
        if needed > out.len() {
            return Err(DecodeError::OutputTooSmall {
                needed,
                capacity: out.len(),
            });
        }

        let capacity = decoded.capacity();
        if self.samples.as_ref().is_some_and(|b| b.capacity() < capacity) {
            self.samples = None;
        }
        let buf = self
            .samples
            .get_or_insert_with(|| SampleBuffer::new(capacity as u64, spec));
        buf.copy_interleaved_ref(decoded);
        out[..needed].copy_from_slice(&buf.samples()[..needed]);

        self.ts += frames as u64;
        Ok(needed)
    }
}
