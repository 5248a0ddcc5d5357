//! Maplapse platform core contracts.
//!
//! This crate defines the seams between the timelapse pipeline and the
//! collaborators it does not own: the codec platform that probes and creates
//! encoders, the encoders themselves, and the map renderer surface. Concrete
//! backends (ffmpeg, software tile renderer, test fakes) implement these
//! traits without the pipeline knowing which one it is driving.

use std::sync::Arc;

use maplapse_common::{FrameTick, MaplapseResult};
use maplapse_history_model::{EncodedPacket, EncoderConfig, MapState};
use serde::{Deserialize, Serialize};

pub use image::RgbaImage;

/// An encoded chunk as delivered by an encoder's output callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub is_keyframe: bool,
    /// Codec configuration record (e.g. `avcC`), typically only on the first chunk.
    pub decoder_config: Option<Vec<u8>>,
}

impl EncodedChunk {
    /// Split into the packet handed to the muxer and the optional decoder config.
    pub fn into_packet(self) -> (EncodedPacket, Option<Vec<u8>>) {
        let packet = EncodedPacket {
            data: self.data,
            timestamp_us: self.timestamp_us,
            duration_us: self.duration_us,
            is_keyframe: self.is_keyframe,
        };
        (packet, self.decoder_config)
    }
}

/// Called with every encoded chunk, possibly after `encode` has returned.
pub type OutputHandler = Arc<dyn Fn(EncodedChunk) + Send + Sync>;

/// Called when the encoder fails outside of a direct call.
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Output and error callbacks registered with an encoder at creation.
#[derive(Clone)]
pub struct EncoderCallbacks {
    pub output: OutputHandler,
    pub error: ErrorHandler,
}

impl EncoderCallbacks {
    pub fn new(
        output: impl Fn(EncodedChunk) + Send + Sync + 'static,
        error: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        Self {
            output: Arc::new(output),
            error: Arc::new(error),
        }
    }
}

impl std::fmt::Debug for EncoderCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderCallbacks").finish_non_exhaustive()
    }
}

/// A configured video encoder.
#[async_trait::async_trait]
pub trait VideoEncoder: Send {
    /// Submit one frame. `tick.keyframe` is a hint.
    async fn encode(&mut self, frame: &RgbaImage, tick: FrameTick) -> MaplapseResult<()>;

    /// Wait until every submitted frame has been delivered to the output callback.
    async fn flush(&mut self) -> MaplapseResult<()>;

    /// Release encoder resources. Further `encode` calls fail.
    fn close(&mut self);
}

/// Probes encoder support and creates encoders.
#[async_trait::async_trait]
pub trait CodecPlatform: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Whether `config` can be encoded on this platform.
    async fn is_config_supported(&self, config: &EncoderConfig) -> bool;

    /// Configure a new encoder.
    async fn create_encoder(
        &self,
        config: &EncoderConfig,
        callbacks: EncoderCallbacks,
    ) -> MaplapseResult<Box<dyn VideoEncoder>>;
}

/// The map drawing surface. Owned by the caller, borrowed by the pipeline.
#[async_trait::async_trait]
pub trait MapRenderer: Send {
    /// Replace the visible map state.
    fn apply(&mut self, state: &MapState) -> MaplapseResult<()>;

    /// Complete a redraw of the current state.
    async fn redraw(&mut self) -> MaplapseResult<()>;

    /// Copy of the most recently drawn surface.
    fn snapshot(&self) -> MaplapseResult<RgbaImage>;
}

/// Summary of what a codec platform can encode, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlatformCapabilities {
    pub name: String,
    pub codecs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_chunk_into_packet() {
        let chunk = EncodedChunk {
            data: vec![1, 2, 3],
            timestamp_us: 125_000,
            duration_us: 125_000,
            is_keyframe: true,
            decoder_config: Some(vec![9]),
        };
        let (packet, config) = chunk.into_packet();
        assert_eq!(packet.data, vec![1, 2, 3]);
        assert_eq!(packet.timestamp_us, 125_000);
        assert!(packet.is_keyframe);
        assert_eq!(config, Some(vec![9]));
    }

    #[test]
    fn test_callbacks_are_shared_between_clones() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callbacks = EncoderCallbacks::new(
            move |chunk: EncodedChunk| sink.lock().unwrap().push(chunk.timestamp_us),
            |_| {},
        );
        let clone = callbacks.clone();
        for ts in [0, 125_000] {
            (clone.output)(EncodedChunk {
                data: vec![0],
                timestamp_us: ts,
                duration_us: 125_000,
                is_keyframe: false,
                decoder_config: None,
            });
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 125_000]);
    }
}
