//! # Video Decode Module
//!
//! Uniform decode contract over the compiled-in codec backends, plus the
//! registry that maps Matroska codec ids to decoder factories.
//!
//! ## Backends
//! 1. FFmpeg (libavcodec) - `V_VP8` and `V_VP9`, feature `vpx`
//! 2. OpenH264 (Cisco) - `V_MPEG4/ISO/AVC`, feature `h264`
//! 3. dav1d (VideoLAN) - `V_AV1`, feature `av1`
//! 4. symphonia - `A_VORBIS`, feature `vorbis` (see `audio.rs`)
//!
//! Reordering decoders may swallow a packet without producing a picture, so
//! feeding and fetching are separate calls: [`VideoDecoder::decode`] then
//! [`VideoDecoder::take_image`]. `None` there is not an error.

use std::collections::HashMap;

use crate::config::CodecConfig;
use crate::demuxer::TrackInfo;
use crate::error::{DecodeError, PlayerError};

pub const CODEC_VP8: &str = "V_VP8";
pub const CODEC_VP9: &str = "V_VP9";
pub const CODEC_H264: &str = "V_MPEG4/ISO/AVC";
pub const CODEC_AV1: &str = "V_AV1";
pub const CODEC_VORBIS: &str = "A_VORBIS";

/// Video codec ids with a backend compiled into this build.
#[allow(unused_mut)]
pub fn compiled_video_codecs() -> Vec<&'static str> {
    let mut codecs = Vec::new();
    #[cfg(feature = "vpx")]
    codecs.extend([CODEC_VP8, CODEC_VP9]);
    #[cfg(feature = "h264")]
    codecs.push(CODEC_H264);
    #[cfg(feature = "av1")]
    codecs.push(CODEC_AV1);
    codecs
}

/// Audio codec ids with a backend compiled into this build.
#[allow(unused_mut)]
pub fn compiled_audio_codecs() -> Vec<&'static str> {
    let mut codecs = Vec::new();
    #[cfg(feature = "vorbis")]
    codecs.push(CODEC_VORBIS);
    codecs
}

// ============================================================================
// Decoded pictures
// ============================================================================

/// Borrowed 4:2:0 planar picture. Chroma planes are half size, rounded up.
#[derive(Debug, Clone, Copy)]
pub struct YuvImage<'a> {
    pub width: u32,
    pub height: u32,
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_stride: usize,
    pub uv_stride: usize,
}

/// Owned, tightly packed I420 picture, reused across decodes.
#[derive(Debug, Clone, Default)]
pub struct I420Frame {
    pub width: u32,
    pub height: u32,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

impl I420Frame {
    pub fn new(width: u32, height: u32) -> Self {
        let mut frame = Self::default();
        frame.resize(width, height);
        frame
    }

    pub fn chroma_size(width: u32, height: u32) -> (usize, usize) {
        (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
    }

    fn resize(&mut self, width: u32, height: u32) {
        let (cw, ch) = Self::chroma_size(width, height);
        self.width = width;
        self.height = height;
        self.y.resize(width as usize * height as usize, 0);
        self.u.resize(cw * ch, 0);
        self.v.resize(cw * ch, 0);
    }

    /// Fill every plane with a constant value.
    pub fn fill(&mut self, y: u8, u: u8, v: u8) {
        self.y.fill(y);
        self.u.fill(u);
        self.v.fill(v);
    }

    /// Copy a strided picture in, dropping the row padding.
    pub fn copy_from(&mut self, image: &YuvImage<'_>) {
        self.resize(image.width, image.height);
        let (w, h) = (image.width as usize, image.height as usize);
        let (cw, ch) = Self::chroma_size(image.width, image.height);

        copy_plane(&mut self.y, image.y, w, h, image.y_stride);
        copy_plane(&mut self.u, image.u, cw, ch, image.uv_stride);
        copy_plane(&mut self.v, image.v, cw, ch, image.uv_stride);
    }

    pub fn as_image(&self) -> YuvImage<'_> {
        YuvImage {
            width: self.width,
            height: self.height,
            y: &self.y,
            u: &self.u,
            v: &self.v,
            y_stride: self.width as usize,
            uv_stride: self.width.div_ceil(2) as usize,
        }
    }
}

fn copy_plane(dst: &mut [u8], src: &[u8], width: usize, height: usize, stride: usize) {
    if width == 0 {
        return;
    }
    for (row, out) in dst.chunks_exact_mut(width).take(height).enumerate() {
        let start = row * stride;
        if let Some(line) = src.get(start..start + width) {
            out.copy_from_slice(line);
        }
    }
}

// ============================================================================
// Decoder traits
// ============================================================================

pub trait VideoDecoder: Send {
    /// Decoder name for diagnostics
    fn name(&self) -> &str;

    /// Feed one compressed frame.
    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError>;

    /// The picture produced by the last `decode`, if any. Each picture is
    /// handed out once.
    fn take_image(&mut self) -> Option<YuvImage<'_>>;
}

pub trait AudioDecoder: Send {
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u32;

    /// Decode one compressed frame into `out` as interleaved samples.
    /// Returns the number of samples written (frames x channels).
    fn decode(&mut self, data: &[u8], out: &mut [f32]) -> Result<usize, DecodeError>;
}

// ============================================================================
// Codec registry
// ============================================================================

type VideoFactory = Box<dyn Fn(&TrackInfo) -> Result<Box<dyn VideoDecoder>, DecodeError> + Send + Sync>;
type AudioFactory = Box<dyn Fn(&TrackInfo) -> Result<Box<dyn AudioDecoder>, DecodeError> + Send + Sync>;

struct Entry<F> {
    name: String,
    factory: F,
}

/// Table from Matroska codec id to decoder factory.
#[derive(Default)]
pub struct CodecRegistry {
    video: HashMap<String, Entry<VideoFactory>>,
    audio: HashMap<String, Entry<AudioFactory>>,
}

impl CodecRegistry {
    /// A registry with nothing in it; fill it with `register_*`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register the compiled-in backends named by `config`.
    pub fn from_config(config: &CodecConfig) -> Self {
        let mut registry = Self::empty();

        for id in &config.video {
            if !registry.register_builtin_video(id) {
                tracing::warn!("Video codec {} is not compiled in", id);
            }
        }
        for id in &config.audio {
            if !registry.register_builtin_audio(id) {
                tracing::warn!("Audio codec {} is not compiled in", id);
            }
        }

        tracing::debug!(
            video = ?registry.video_codecs(),
            audio = ?registry.audio_codecs(),
            "Codec registry built"
        );
        registry
    }

    #[allow(unused_variables)]
    fn register_builtin_video(&mut self, id: &str) -> bool {
        match id {
            #[cfg(feature = "vpx")]
            CODEC_VP8 => {
                self.register_video(CODEC_VP8, "VP8 (FFmpeg)", |track| {
                    Ok(Box::new(VpxDecoder::new(track, ffmpeg_next::codec::Id::VP8)?) as Box<dyn VideoDecoder>)
                });
                true
            }
            #[cfg(feature = "vpx")]
            CODEC_VP9 => {
                self.register_video(CODEC_VP9, "VP9 (FFmpeg)", |track| {
                    Ok(Box::new(VpxDecoder::new(track, ffmpeg_next::codec::Id::VP9)?) as Box<dyn VideoDecoder>)
                });
                true
            }
            #[cfg(feature = "h264")]
            CODEC_H264 => {
                self.register_video(CODEC_H264, "H.264 (OpenH264)", |track| {
                    Ok(Box::new(OpenH264Decoder::new(track)?) as Box<dyn VideoDecoder>)
                });
                true
            }
            #[cfg(feature = "av1")]
            CODEC_AV1 => {
                self.register_video(CODEC_AV1, "AV1 (dav1d)", |track| {
                    Ok(Box::new(Dav1dDecoder::new(track)?) as Box<dyn VideoDecoder>)
                });
                true
            }
            _ => false,
        }
    }

    #[allow(unused_variables)]
    fn register_builtin_audio(&mut self, id: &str) -> bool {
        match id {
            #[cfg(feature = "vorbis")]
            CODEC_VORBIS => {
                self.register_audio(CODEC_VORBIS, "Vorbis", |track| {
                    Ok(Box::new(crate::audio::VorbisDecoder::new(track)?) as Box<dyn AudioDecoder>)
                });
                true
            }
            _ => false,
        }
    }

    pub fn register_video<F>(&mut self, codec_id: &str, name: &str, factory: F)
    where
        F: Fn(&TrackInfo) -> Result<Box<dyn VideoDecoder>, DecodeError> + Send + Sync + 'static,
    {
        self.video.insert(
            codec_id.to_string(),
            Entry {
                name: name.to_string(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn register_audio<F>(&mut self, codec_id: &str, name: &str, factory: F)
    where
        F: Fn(&TrackInfo) -> Result<Box<dyn AudioDecoder>, DecodeError> + Send + Sync + 'static,
    {
        self.audio.insert(
            codec_id.to_string(),
            Entry {
                name: name.to_string(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn video_codecs(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.video.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn audio_codecs(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.audio.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn video_codec_name(&self, codec_id: &str) -> Option<&str> {
        self.video.get(codec_id).map(|e| e.name.as_str())
    }

    pub fn audio_codec_name(&self, codec_id: &str) -> Option<&str> {
        self.audio.get(codec_id).map(|e| e.name.as_str())
    }

    pub fn create_video(&self, track: &TrackInfo) -> Result<Box<dyn VideoDecoder>, PlayerError> {
        let entry = self
            .video
            .get(&track.codec_id)
            .ok_or_else(|| PlayerError::UnsupportedVideoCodec(track.codec_id.clone()))?;
        Ok((entry.factory)(track)?)
    }

    pub fn create_audio(&self, track: &TrackInfo) -> Result<Box<dyn AudioDecoder>, PlayerError> {
        let entry = self
            .audio
            .get(&track.codec_id)
            .ok_or_else(|| PlayerError::UnsupportedAudioCodec(track.codec_id.clone()))?;
        Ok((entry.factory)(track)?)
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("video", &self.video_codecs())
            .field("audio", &self.audio_codecs())
            .finish()
    }
}

// ============================================================================
// FFmpeg VP8/VP9 Decoder
// ============================================================================

#[cfg(feature = "vpx")]
pub struct VpxDecoder {
    decoder: ffmpeg_next::decoder::Video,
    picture: ffmpeg_next::frame::Video,
    name: &'static str,
    fresh: bool,
}

#[cfg(feature = "vpx")]
impl VpxDecoder {
    pub fn new(track: &TrackInfo, codec_id: ffmpeg_next::codec::Id) -> Result<Self, DecodeError> {
        use ffmpeg_next as ffmpeg;

        // Idempotent
        ffmpeg::init().map_err(|e| DecodeError::Init(format!("FFmpeg: {}", e)))?;

        let codec = ffmpeg::codec::decoder::find(codec_id)
            .ok_or_else(|| DecodeError::Init(format!("FFmpeg has no {:?} decoder", codec_id)))?;
        let decoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .decoder()
            .video()
            .map_err(|e| DecodeError::Init(format!("FFmpeg {:?}: {}", codec_id, e)))?;

        tracing::debug!(
            codec = ?codec_id,
            width = track.width,
            height = track.height,
            "FFmpeg decoder opened"
        );

        Ok(Self {
            decoder,
            picture: ffmpeg::frame::Video::empty(),
            name: if codec_id == ffmpeg::codec::Id::VP8 { "FFmpeg VP8" } else { "FFmpeg VP9" },
            fresh: false,
        })
    }
}

#[cfg(feature = "vpx")]
impl VideoDecoder for VpxDecoder {
    fn name(&self) -> &str {
        self.name
    }

    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        use ffmpeg_next as ffmpeg;

        self.fresh = false;
        let packet = ffmpeg::codec::packet::Packet::copy(data);
        self.decoder
            .send_packet(&packet)
            .map_err(|e| DecodeError::DecodeFailed(format!("FFmpeg send_packet: {}", e)))?;

        match self.decoder.receive_frame(&mut self.picture) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => return Ok(()),
            Err(e) => return Err(DecodeError::DecodeFailed(format!("FFmpeg receive_frame: {}", e))),
        }

        if self.picture.format() != ffmpeg::format::Pixel::YUV420P {
            return Err(DecodeError::UnsupportedLayout(format!("{:?}", self.picture.format())));
        }
        self.fresh = true;
        Ok(())
    }

    fn take_image(&mut self) -> Option<YuvImage<'_>> {
        if !std::mem::take(&mut self.fresh) {
            return None;
        }
        let picture = &self.picture;
        Some(YuvImage {
            width: picture.width(),
            height: picture.height(),
            y: picture.data(0),
            u: picture.data(1),
            v: picture.data(2),
            y_stride: picture.stride(0),
            uv_stride: picture.stride(1),
        })
    }
}

// ============================================================================
// OpenH264 Software Decoder
// ============================================================================

#[cfg(feature = "h264")]
pub struct OpenH264Decoder {
    decoder: openh264::decoder::Decoder,
    /// AVCC length prefix size; 0 when the stream is already Annex B.
    nal_length_size: usize,
    frame: I420Frame,
    ready: bool,
}

#[cfg(feature = "h264")]
impl OpenH264Decoder {
    pub fn new(track: &TrackInfo) -> Result<Self, DecodeError> {
        let mut decoder = openh264::decoder::Decoder::new()
            .map_err(|e| DecodeError::Init(format!("OpenH264: {:?}", e)))?;

        let mut nal_length_size = 0;
        if let Some((parameter_sets, length_size)) =
            crate::h264_utils::parse_avcc_extradata(&track.codec_private)
        {
            nal_length_size = length_size;
            if !parameter_sets.is_empty() {
                decoder
                    .decode(&parameter_sets)
                    .map_err(|e| DecodeError::Init(format!("OpenH264 SPS/PPS: {:?}", e)))?;
            }
        }

        Ok(Self {
            decoder,
            nal_length_size,
            frame: I420Frame::new(track.width, track.height),
            ready: false,
        })
    }
}

#[cfg(feature = "h264")]
impl VideoDecoder for OpenH264Decoder {
    fn name(&self) -> &str {
        "OpenH264"
    }

    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        use openh264::formats::YUVSource;
        use std::borrow::Cow;

        let packet: Cow<'_, [u8]> = if self.nal_length_size == 0 {
            Cow::Borrowed(data)
        } else {
            Cow::Owned(crate::h264_utils::avcc_to_annexb(data, self.nal_length_size))
        };

        self.ready = false;
        match self.decoder.decode(&packet) {
            Ok(Some(yuv)) => {
                let (width, height) = yuv.dimensions();
                let (y_stride, uv_stride, _) = yuv.strides();
                self.frame.copy_from(&YuvImage {
                    width: width as u32,
                    height: height as u32,
                    y: yuv.y(),
                    u: yuv.u(),
                    v: yuv.v(),
                    y_stride,
                    uv_stride,
                });
                self.ready = true;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(DecodeError::DecodeFailed(format!("OpenH264: {:?}", e))),
        }
    }

    fn take_image(&mut self) -> Option<YuvImage<'_>> {
        if !std::mem::take(&mut self.ready) {
            return None;
        }
        Some(self.frame.as_image())
    }
}

// ============================================================================
// dav1d AV1 Decoder
// ============================================================================

#[cfg(feature = "av1")]
struct Dav1dPicture {
    width: u32,
    height: u32,
    y: dav1d::Plane,
    u: dav1d::Plane,
    v: dav1d::Plane,
    y_stride: usize,
    uv_stride: usize,
}

#[cfg(feature = "av1")]
pub struct Dav1dDecoder {
    decoder: dav1d::Decoder,
    picture: Option<Dav1dPicture>,
    fresh: bool,
}

#[cfg(feature = "av1")]
impl Dav1dDecoder {
    pub fn new(_track: &TrackInfo) -> Result<Self, DecodeError> {
        let decoder = dav1d::Decoder::new().map_err(|e| DecodeError::Init(format!("dav1d: {:?}", e)))?;
        Ok(Self {
            decoder,
            picture: None,
            fresh: false,
        })
    }

    fn fetch_picture(&mut self) -> Result<(), DecodeError> {
        use dav1d::PlanarImageComponent as Component;

        let picture = match self.decoder.get_picture() {
            Ok(p) => p,
            Err(dav1d::Error::Again) => return Ok(()),
            Err(e) => return Err(DecodeError::DecodeFailed(format!("dav1d: {:?}", e))),
        };
        if picture.pixel_layout() != dav1d::PixelLayout::I420 || picture.bit_depth() != 8 {
            return Err(DecodeError::UnsupportedLayout(format!(
                "{:?} {}-bit",
                picture.pixel_layout(),
                picture.bit_depth()
            )));
        }

        self.picture = Some(Dav1dPicture {
            width: picture.width(),
            height: picture.height(),
            y_stride: picture.stride(Component::Y) as usize,
            uv_stride: picture.stride(Component::U) as usize,
            y: picture.plane(Component::Y),
            u: picture.plane(Component::U),
            v: picture.plane(Component::V),
        });
        self.fresh = true;
        Ok(())
    }
}

#[cfg(feature = "av1")]
impl VideoDecoder for Dav1dDecoder {
    fn name(&self) -> &str {
        "dav1d"
    }

    fn decode(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.fresh = false;
        match self.decoder.send_data(data.to_vec(), None, None, None) {
            Ok(()) => self.fetch_picture(),
            Err(dav1d::Error::Again) => {
                // Decoder is full: drain one picture, then push the rest in.
                self.fetch_picture()?;
                match self.decoder.send_pending_data() {
                    Ok(()) | Err(dav1d::Error::Again) => Ok(()),
                    Err(e) => Err(DecodeError::DecodeFailed(format!("dav1d: {:?}", e))),
                }
            }
            Err(e) => Err(DecodeError::DecodeFailed(format!("dav1d: {:?}", e))),
        }
    }

    fn take_image(&mut self) -> Option<YuvImage<'_>> {
        if !std::mem::take(&mut self.fresh) {
            return None;
        }
        self.picture.as_ref().map(|p| YuvImage {
            width: p.width,
            height: p.height,
            y: p.y.as_ref(),
            u: p.u.as_ref(),
            v: p.v.as_ref(),
            y_stride: p.y_stride,
            uv_stride: p.uv_stride,
        })
    }
}
