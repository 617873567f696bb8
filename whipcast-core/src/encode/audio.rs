//! Opus encoding via FFmpeg

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::{self, encoder};
use ffmpeg_next::format::Sample as SampleFormat;
use ffmpeg_next::format::sample::Type;
use ffmpeg_next::util::frame::audio::Audio;
use ffmpeg_next::{ChannelLayout, Dictionary, Rational};
use std::time::Duration;
use tracing::{info, trace, warn};
use webrtc::media::Sample;

use crate::error::{Result, WhipcastError};
use crate::output::SampleEncoder;
use crate::types::{AudioFrame, MediaSample};

const OPUS_ENCODER: &str = "libopus";

/// Opus encoder for a fixed input format
pub struct OpusEncoder {
    encoder: encoder::Audio,
    frame: Audio,
    packet: ffmpeg::Packet,
    sample_rate: u32,
    channels: u16,
    /// Samples per channel in one Opus frame
    frame_size: usize,
    /// Interleaved samples waiting for a full frame
    buffer: Vec<f32>,
    sample_count: u64,
}

impl OpusEncoder {
    pub fn new(sample_rate: u32, channels: u16, bitrate_kbps: u32) -> Result<Self> {
        ffmpeg::init().map_err(|e| WhipcastError::encoder(format!("FFmpeg init failed: {}", e)))?;

        let codec = encoder::find_by_name(OPUS_ENCODER)
            .ok_or_else(|| WhipcastError::encoder(format!("Audio encoder {} not found", OPUS_ENCODER)))?;

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| WhipcastError::encoder(format!("Failed to create audio encoder: {}", e)))?;

        let channel_layout = match channels {
            1 => ChannelLayout::MONO,
            2 => ChannelLayout::STEREO,
            _ => {
                return Err(WhipcastError::encoder(format!(
                    "Opus needs mono or stereo input, got {} channels",
                    channels
                )));
            }
        };

        encoder.set_rate(sample_rate as i32);
        encoder.set_bit_rate(bitrate_kbps as usize * 1000);
        encoder.set_format(SampleFormat::F32(Type::Packed));
        encoder.set_time_base(Rational::new(1, sample_rate as i32));
        encoder.set_channel_layout(channel_layout);

        let mut opts = Dictionary::new();
        opts.set("application", "lowdelay");
        opts.set("frame_duration", "20");

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| WhipcastError::encoder(format!("Failed to open audio encoder: {}", e)))?;

        let frame_size = match encoder.frame_size() as usize {
            0 => sample_rate as usize / 50,
            n => n,
        };

        info!(
            "Opus encoder opened: {}ch @ {}Hz, {}kbps, frame_size={}",
            channels, sample_rate, bitrate_kbps, frame_size
        );

        Ok(Self {
            encoder,
            frame: Audio::new(SampleFormat::F32(Type::Packed), frame_size, channel_layout),
            packet: ffmpeg::Packet::empty(),
            sample_rate,
            channels,
            frame_size,
            buffer: Vec::with_capacity(frame_size * channels as usize * 2),
            sample_count: 0,
        })
    }

    /// Buffer a PCM frame and encode every complete Opus frame
    pub fn encode_frame(&mut self, input: &AudioFrame) -> Result<Vec<Sample>> {
        if input.sample_rate != self.sample_rate || input.channels != self.channels {
            return Err(WhipcastError::encoder(format!(
                "Audio format changed from {}ch @ {}Hz to {}ch @ {}Hz",
                self.channels, self.sample_rate, input.channels, input.sample_rate
            )));
        }

        self.buffer
            .extend(input.samples.iter().map(|&s| f32::from(s) / 32768.0));

        let per_frame = self.frame_size * self.channels as usize;
        let mut samples = Vec::new();
        while self.buffer.len() >= per_frame {
            let chunk: Vec<f32> = self.buffer.drain(..per_frame).collect();
            self.send(&chunk)?;
            samples.extend(self.receive_samples()?);
        }
        Ok(samples)
    }

    fn send(&mut self, samples: &[f32]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(samples);
        let data = self.frame.data_mut(0);
        let len = data.len().min(bytes.len());
        data[..len].copy_from_slice(&bytes[..len]);

        self.frame.set_pts(Some(self.sample_count as i64));
        self.sample_count += self.frame_size as u64;

        self.encoder
            .send_frame(&self.frame)
            .map_err(|e| WhipcastError::encoder(format!("Failed to send audio frame: {}", e)))
    }

    fn receive_samples(&mut self) -> Result<Vec<Sample>> {
        let duration =
            Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.sample_rate));
        let mut samples = Vec::new();
        loop {
            match self.encoder.receive_packet(&mut self.packet) {
                Ok(()) => {
                    let Some(data) = self.packet.data() else {
                        continue;
                    };
                    trace!("Encoded audio packet: pts={:?}, size={}", self.packet.pts(), data.len());
                    samples.push(Sample {
                        data: Bytes::copy_from_slice(data),
                        duration,
                        ..Default::default()
                    });
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(WhipcastError::encoder(format!(
                        "Failed to receive audio packet: {}",
                        e
                    )));
                }
            }
        }
        Ok(samples)
    }
}

enum OpusState {
    Pending,
    Ready(Box<OpusEncoder>),
    Failed,
}

/// Opens an `OpusEncoder` on the first frame, using that frame's format
pub struct OpusSampleEncoder {
    bitrate_kbps: u32,
    state: OpusState,
}

impl OpusSampleEncoder {
    pub fn new(bitrate_kbps: u32) -> Self {
        Self {
            bitrate_kbps,
            state: OpusState::Pending,
        }
    }
}

impl SampleEncoder for OpusSampleEncoder {
    fn encode(&mut self, sample: &MediaSample) -> Vec<Sample> {
        let MediaSample::Audio(frame) = sample else {
            return Vec::new();
        };

        if matches!(self.state, OpusState::Pending) {
            self.state = match OpusEncoder::new(frame.sample_rate, frame.channels, self.bitrate_kbps) {
                Ok(encoder) => OpusState::Ready(Box::new(encoder)),
                Err(e) => {
                    warn!("Audio sender will be silent: {}", e);
                    OpusState::Failed
                }
            };
        }

        match &mut self.state {
            OpusState::Ready(encoder) => encoder.encode_frame(frame).unwrap_or_else(|e| {
                warn!("Dropped audio frame: {}", e);
                Vec::new()
            }),
            OpusState::Pending | OpusState::Failed => Vec::new(),
        }
    }
}

/// Whether FFmpeg was built with libopus
pub fn opus_available() -> bool {
    ffmpeg::init().ok();
    encoder::find_by_name(OPUS_ENCODER).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn silence(samples_per_channel: usize) -> AudioFrame {
        AudioFrame {
            samples: vec![0; samples_per_channel * 2],
            sample_rate: 48000,
            channels: 2,
            pts: 0,
        }
    }

    #[test]
    fn test_buffers_until_full_frame() {
        if !opus_available() {
            eprintln!("libopus not available, skipping");
            return;
        }
        let mut encoder = OpusEncoder::new(48000, 2, 64).unwrap();

        // 10ms is half an Opus frame
        assert!(encoder.encode_frame(&silence(480)).unwrap().is_empty());

        let mut samples = encoder.encode_frame(&silence(480)).unwrap();
        for _ in 0..4 {
            samples.extend(encoder.encode_frame(&silence(960)).unwrap());
        }
        assert!(!samples.is_empty());
        assert_eq!(samples[0].duration, Duration::from_millis(20));
    }

    #[test]
    fn test_format_change_rejected() {
        if !opus_available() {
            return;
        }
        let mut encoder = OpusEncoder::new(48000, 2, 64).unwrap();
        let mono = AudioFrame {
            samples: vec![0; 960],
            sample_rate: 48000,
            channels: 1,
            pts: 0,
        };
        assert!(encoder.encode_frame(&mono).is_err());
    }

    #[test]
    fn test_surround_rejected() {
        if !opus_available() {
            return;
        }
        assert!(OpusEncoder::new(48000, 6, 64).is_err());
    }

    #[test]
    fn test_sample_encoder_opens_lazily() {
        let mut encoder = OpusSampleEncoder::new(64);
        assert!(matches!(encoder.state, OpusState::Pending));

        for _ in 0..5 {
            encoder.encode(&MediaSample::Audio(Arc::new(silence(960))));
        }
        if opus_available() {
            assert!(matches!(encoder.state, OpusState::Ready(_)));
        } else {
            assert!(matches!(encoder.state, OpusState::Failed));
        }
    }
}
