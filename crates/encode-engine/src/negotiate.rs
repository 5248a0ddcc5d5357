//! Codec negotiation.
//!
//! Each container has an ordered list of candidate codecs. Candidates are
//! probed against the platform in order and the first supported one is
//! committed. Nothing after the committed candidate is probed.

use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::{BitrateMode, Container, EncoderConfig, MuxCodec};
use maplapse_platform_core::CodecPlatform;

/// Bitrate ceiling in bits per second.
pub const MAX_BITRATE: u64 = 10_000_000;

/// A codec string the platform may support, with the muxer codec that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecCandidate {
    pub codec: &'static str,
    pub mux_codec: MuxCodec,
}

const MP4_CANDIDATES: &[CodecCandidate] = &[CodecCandidate {
    codec: "avc1.640028",
    mux_codec: MuxCodec::Avc,
}];

const WEBM_CANDIDATES: &[CodecCandidate] = &[
    CodecCandidate {
        codec: "vp09.00.10.08",
        mux_codec: MuxCodec::Vp9,
    },
    CodecCandidate {
        codec: "vp8",
        mux_codec: MuxCodec::Vp8,
    },
];

/// Candidates for `container`, highest priority first.
pub fn candidates(container: Container) -> &'static [CodecCandidate] {
    match container {
        Container::Mp4 => MP4_CANDIDATES,
        Container::Webm => WEBM_CANDIDATES,
    }
}

/// `width * height * fps / 8`, clamped to [`MAX_BITRATE`].
pub fn compute_bitrate(width: u32, height: u32, fps: u32) -> u64 {
    let raw = width as u64 * height as u64 * fps as u64 / 8;
    raw.min(MAX_BITRATE)
}

/// The committed encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCodec {
    pub config: EncoderConfig,
    pub mux_codec: MuxCodec,
}

/// Probe candidates for `container` and commit to the first supported one.
pub async fn negotiate(
    platform: &dyn CodecPlatform,
    container: Container,
    width: u32,
    height: u32,
    fps: u32,
) -> MaplapseResult<NegotiatedCodec> {
    for candidate in candidates(container) {
        let config = EncoderConfig {
            codec: candidate.codec.to_string(),
            width,
            height,
            bitrate: compute_bitrate(width, height, fps),
            bitrate_mode: BitrateMode::Variable,
            framerate: fps,
        };
        let supported = platform.is_config_supported(&config).await;
        tracing::debug!(
            platform = platform.name(),
            codec = candidate.codec,
            bitrate = config.bitrate,
            supported,
            "Probed codec candidate"
        );
        if supported {
            tracing::info!(
                %container,
                codec = candidate.codec,
                mux_codec = %candidate.mux_codec,
                width,
                height,
                fps,
                bitrate = config.bitrate,
                "Codec negotiated"
            );
            return Ok(NegotiatedCodec {
                config,
                mux_codec: candidate.mux_codec,
            });
        }
    }
    Err(MaplapseError::negotiation(format!(
        "no supported codec for {container} at {width}x{height}@{fps}fps on {}",
        platform.name()
    )))
}
