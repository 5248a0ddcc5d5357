//! Encoder session: one frame in flight.
//!
//! Every submitted frame is stamped by the session's [`FrameClock`], handed
//! to the encoder, and followed by a flush, so the next frame is not prepared
//! until the encoder has delivered this one. Encoder output goes straight to
//! the [`PacketSink`]. Errors reported through the encoder's error callback
//! are latched and fail the next submission.

use std::sync::{Arc, OnceLock};

use maplapse_common::{FrameClock, FrameTick, MaplapseError, MaplapseResult};
use maplapse_history_model::EncoderConfig;
use maplapse_platform_core::{CodecPlatform, EncoderCallbacks, RgbaImage, VideoEncoder};

use crate::output::PacketSink;

/// First-error-wins slot shared with encoder and writer callbacks.
#[derive(Debug, Clone, Default)]
pub struct ErrorLatch(Arc<OnceLock<String>>);

impl ErrorLatch {
    /// Record `message` unless an error is already latched. Returns whether it was recorded.
    pub fn latch(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        if self.0.set(message.clone()).is_ok() {
            tracing::warn!(error = %message, "Encoder error latched");
            true
        } else {
            tracing::debug!(error = %message, "Ignoring error after the first");
            false
        }
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    /// Fail with the latched error, if any.
    pub fn check(&self) -> MaplapseResult<()> {
        match self.get() {
            Some(message) => Err(MaplapseError::encoder(message)),
            None => Ok(()),
        }
    }
}

/// A configured encoder plus the timeline it is writing.
pub struct EncoderSession {
    encoder: Option<Box<dyn VideoEncoder>>,
    clock: FrameClock,
    errors: ErrorLatch,
}

impl EncoderSession {
    /// Configure an encoder on `platform` that feeds `packets`.
    pub async fn open(
        platform: &dyn CodecPlatform,
        config: &EncoderConfig,
        packets: PacketSink,
        errors: ErrorLatch,
    ) -> MaplapseResult<Self> {
        let latch = errors.clone();
        let callbacks = EncoderCallbacks::new(
            move |chunk| packets.push(chunk),
            move |message| {
                latch.latch(message);
            },
        );
        let encoder = platform.create_encoder(config, callbacks).await?;
        tracing::info!(
            platform = platform.name(),
            codec = %config.codec,
            width = config.width,
            height = config.height,
            fps = config.framerate,
            "Encoder session started"
        );
        Ok(Self {
            encoder: Some(encoder),
            clock: FrameClock::new(config.framerate),
            errors,
        })
    }

    /// Encode one frame and wait until the encoder has delivered it.
    pub async fn submit(&mut self, frame: &RgbaImage) -> MaplapseResult<FrameTick> {
        self.errors.check()?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| MaplapseError::invalid_state("encoder session is closed"))?;
        let tick = self.clock.advance();
        if tick.keyframe {
            tracing::debug!(index = tick.index, "Requesting keyframe");
        }
        encoder.encode(frame, tick).await?;
        encoder.flush().await?;
        Ok(tick)
    }

    /// Flush remaining output, then close the encoder.
    pub async fn finish(&mut self) -> MaplapseResult<()> {
        let flushed = match self.encoder.as_mut() {
            Some(encoder) => encoder.flush().await,
            None => Ok(()),
        };
        self.close();
        flushed?;
        self.errors.check()
    }

    /// Close the encoder. Later calls do nothing.
    pub fn close(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.close();
            tracing::debug!(frames = self.clock.frame_count(), "Encoder session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.encoder.is_none()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.clock.frame_count()
    }

    pub fn frame_duration_us(&self) -> u64 {
        self.clock.frame_duration_us()
    }

    pub fn last_timestamp_us(&self) -> Option<u64> {
        self.clock.last_timestamp_us()
    }

    pub fn errors(&self) -> &ErrorLatch {
        &self.errors
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        self.close();
    }
}
