//! H.264 encoding via FFmpeg
//!
//! BGRA canvas frames are converted to YUV420P and encoded with the first
//! H.264 encoder that opens. Output is Annex-B with parameter sets repeated
//! on every keyframe, which is what the RTP packetizer expects.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::{self, encoder};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{self, Flags};
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Dictionary, Rational};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use webrtc::media::Sample;

use crate::error::{Result, WhipcastError};
use crate::output::SampleEncoder;
use crate::types::{MediaSample, VideoFrame};

/// Candidate encoders, most preferred first
pub const H264_ENCODERS: &[&str] = &["libx264", "libopenh264", "h264_nvenc"];

/// H.264 encoder for one video sender
pub struct H264Encoder {
    encoder: encoder::Video,
    name: &'static str,
    /// BGRA -> YUV420P, rebuilt when the input size changes
    scaler: Option<scaling::Context>,
    /// BGRA staging frame matching the scaler input
    source: Option<Video>,
    frame: Video,
    packet: ffmpeg::Packet,
    frame_count: u64,
    frame_duration: Duration,
}

impl H264Encoder {
    /// Open the first usable H.264 encoder at the given output size
    pub fn new(width: u32, height: u32, fps: u32, bitrate_kbps: u32) -> Result<Self> {
        ffmpeg::init().map_err(|e| WhipcastError::encoder(format!("FFmpeg init failed: {}", e)))?;

        let mut last_error = None;
        for name in H264_ENCODERS {
            match Self::open(name, width, height, fps, bitrate_kbps) {
                Ok(encoder) => return Ok(encoder),
                Err(e) => {
                    debug!("{} not usable: {}", name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| WhipcastError::encoder("No H.264 encoder found")))
    }

    fn open(
        name: &'static str,
        width: u32,
        height: u32,
        fps: u32,
        bitrate_kbps: u32,
    ) -> Result<Self> {
        let codec = encoder::find_by_name(name)
            .ok_or_else(|| WhipcastError::encoder(format!("Encoder {} not found", name)))?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| WhipcastError::encoder(format!("Failed to create {} context: {}", name, e)))?;

        let fps = fps.max(1);
        let bitrate = bitrate_kbps as usize * 1000;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(Rational::new(1, fps as i32));
        encoder.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        encoder.set_bit_rate(bitrate);
        encoder.set_max_bit_rate(bitrate * 2);
        // One keyframe per second so late joiners recover quickly
        encoder.set_gop(fps);
        encoder.set_max_b_frames(0);

        let mut opts = Dictionary::new();
        match name {
            "libx264" => {
                opts.set("preset", "ultrafast");
                opts.set("tune", "zerolatency");
                opts.set("profile", "baseline");
            }
            "h264_nvenc" => {
                opts.set("preset", "p1");
                opts.set("tune", "ll");
                opts.set("zerolatency", "1");
                opts.set("profile", "baseline");
            }
            _ => {}
        }

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| WhipcastError::encoder(format!("Failed to open {}: {}", name, e)))?;

        info!(
            "H.264 encoder opened: {} {}x{} @ {}fps, {}kbps",
            name, width, height, fps, bitrate_kbps
        );

        Ok(Self {
            encoder,
            name,
            scaler: None,
            source: None,
            frame: Video::new(Pixel::YUV420P, width, height),
            packet: ffmpeg::Packet::empty(),
            frame_count: 0,
            frame_duration: Duration::from_secs(1) / fps,
        })
    }

    /// Name of the FFmpeg encoder in use
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Encode one BGRA frame, returning whatever packets are ready
    pub fn encode_frame(&mut self, input: &VideoFrame) -> Result<Vec<Sample>> {
        if input.width == 0 || input.height == 0 {
            return Ok(Vec::new());
        }
        self.ensure_scaler(input.width, input.height)?;

        let (Some(scaler), Some(source)) = (self.scaler.as_mut(), self.source.as_mut()) else {
            return Err(WhipcastError::encoder("No scaler configured"));
        };
        copy_bgra(input, source);
        scaler
            .run(source, &mut self.frame)
            .map_err(|e| WhipcastError::encoder(format!("Scaling failed: {}", e)))?;

        self.frame.set_pts(Some(self.frame_count as i64));
        self.frame_count += 1;

        self.encoder
            .send_frame(&self.frame)
            .map_err(|e| WhipcastError::encoder(format!("Failed to send frame: {}", e)))?;
        self.receive_samples()
    }

    fn ensure_scaler(&mut self, width: u32, height: u32) -> Result<()> {
        let current = self.scaler.as_ref().map(|s| (s.input().width, s.input().height));
        if current == Some((width, height)) {
            return Ok(());
        }

        debug!(
            "Creating scaler: BGRA {}x{} -> YUV420P {}x{}",
            width,
            height,
            self.encoder.width(),
            self.encoder.height()
        );
        let scaler = scaling::Context::get(
            Pixel::BGRA,
            width,
            height,
            Pixel::YUV420P,
            self.encoder.width(),
            self.encoder.height(),
            Flags::BILINEAR,
        )
        .map_err(|e| WhipcastError::encoder(format!("Failed to create scaler: {}", e)))?;

        self.scaler = Some(scaler);
        self.source = Some(Video::new(Pixel::BGRA, width, height));
        Ok(())
    }

    fn receive_samples(&mut self) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        loop {
            match self.encoder.receive_packet(&mut self.packet) {
                Ok(()) => {
                    let Some(data) = self.packet.data() else {
                        continue;
                    };
                    trace!(
                        "Encoded video packet: pts={:?}, size={}, keyframe={}",
                        self.packet.pts(),
                        data.len(),
                        self.packet.is_key()
                    );
                    samples.push(Sample {
                        data: Bytes::copy_from_slice(data),
                        duration: self.frame_duration,
                        ..Default::default()
                    });
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(WhipcastError::encoder(format!("Failed to receive packet: {}", e)));
                }
            }
        }
        Ok(samples)
    }
}

impl SampleEncoder for H264Encoder {
    fn encode(&mut self, sample: &MediaSample) -> Vec<Sample> {
        match sample {
            MediaSample::Video(frame) => self.encode_frame(frame).unwrap_or_else(|e| {
                warn!("{} dropped a frame: {}", self.name, e);
                Vec::new()
            }),
            MediaSample::Audio(_) => Vec::new(),
        }
    }
}

/// Copy tightly packed BGRA rows into a frame that may have padded rows
fn copy_bgra(input: &VideoFrame, target: &mut Video) {
    let row = input.width as usize * 4;
    let stride = target.stride(0);
    let plane = target.data_mut(0);
    for (y, src) in input
        .data
        .chunks_exact(row)
        .take(input.height as usize)
        .enumerate()
    {
        let start = y * stride;
        if let Some(dst) = plane.get_mut(start..start + row) {
            dst.copy_from_slice(src);
        }
    }
}

/// Name of the first H.264 encoder FFmpeg knows about
pub fn h264_encoder_available() -> Option<&'static str> {
    ffmpeg::init().ok();
    H264_ENCODERS
        .iter()
        .copied()
        .find(|name| encoder::find_by_name(name).is_some())
}
