//! Media encoding for the publish senders
//!
//! The default `EncoderFactory`: H.264 for the composite video and Opus for
//! the microphone, both through FFmpeg.

pub mod audio;
pub mod video;

pub use audio::{OpusEncoder, OpusSampleEncoder, opus_available};
pub use video::{H264Encoder, h264_encoder_available};

use tracing::warn;

use crate::compositor::CompositorLayout;
use crate::output::{EncoderFactory, SampleEncoder};
use crate::types::TrackKind;

pub const DEFAULT_VIDEO_BITRATE_KBPS: u32 = 2500;
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 64;

/// FFmpeg-backed encoders sized for the publish canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfmpegEncoders {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl FfmpegEncoders {
    pub fn new(layout: &CompositorLayout) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            fps: layout.fps,
            video_bitrate_kbps: DEFAULT_VIDEO_BITRATE_KBPS,
            audio_bitrate_kbps: DEFAULT_AUDIO_BITRATE_KBPS,
        }
    }
}

impl EncoderFactory for FfmpegEncoders {
    fn encoder(&self, kind: TrackKind) -> Option<Box<dyn SampleEncoder>> {
        match kind {
            TrackKind::Video => {
                match H264Encoder::new(self.width, self.height, self.fps, self.video_bitrate_kbps) {
                    Ok(encoder) => Some(Box::new(encoder)),
                    Err(e) => {
                        warn!("H.264 encoding unavailable: {}", e);
                        None
                    }
                }
            }
            TrackKind::Audio => {
                if opus_available() {
                    Some(Box::new(OpusSampleEncoder::new(self.audio_bitrate_kbps)))
                } else {
                    warn!("Opus encoding unavailable: FFmpeg has no libopus");
                    None
                }
            }
        }
    }
}
