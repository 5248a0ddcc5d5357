//! Timelapse recorder.
//!
//! Lifecycle: `create` (Idle) → `encode_timelapse` (Encoding) → `finish`
//! (Finishing → Finished). Any failure moves the recorder to Errored.
//! `finish` may still be called after a stop request or a producer failure
//! to recover the frames encoded so far.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use maplapse_common::{
    freeze_duration_us, freeze_frame_count, EncodeClock, MaplapseError, MaplapseResult,
    TimelapseDefaults,
};
use maplapse_history_model::{Container, FrameSource, HistoryQuery, OutputArtifact};
use maplapse_platform_core::{CodecPlatform, MapRenderer};
use maplapse_render_engine::{FrameCompositor, LabelFont, LabelStyle, SurfaceSize};

use crate::negotiate::{negotiate, NegotiatedCodec};
use crate::output::OutputSink;
use crate::session::{EncoderSession, ErrorLatch};

/// Inputs for a single timelapse.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderOptions {
    pub container: Container,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Seconds to hold the last frame after the history runs out.
    pub freeze_seconds: f64,
    pub query: HistoryQuery,
    /// Resolution the label style is designed for.
    pub reference_width: u32,
    pub reference_height: u32,
}

impl RecorderOptions {
    pub fn new(container: Container, query: HistoryQuery) -> Self {
        let defaults = TimelapseDefaults::default();
        Self {
            container,
            fps: defaults.fps,
            width: defaults.width,
            height: defaults.height,
            freeze_seconds: defaults.freeze_seconds,
            query,
            reference_width: defaults.reference_width,
            reference_height: defaults.reference_height,
        }
    }

    /// Options from configured defaults.
    pub fn from_defaults(defaults: &TimelapseDefaults, query: HistoryQuery) -> MaplapseResult<Self> {
        Ok(Self {
            container: defaults.container.parse()?,
            fps: defaults.fps,
            width: defaults.width,
            height: defaults.height,
            freeze_seconds: defaults.freeze_seconds,
            query,
            reference_width: defaults.reference_width,
            reference_height: defaults.reference_height,
        })
    }

    pub fn validate(&self) -> MaplapseResult<()> {
        if self.fps == 0 {
            return Err(MaplapseError::config("fps must be positive"));
        }
        if !self.freeze_seconds.is_finite() || self.freeze_seconds < 0.0 {
            return Err(MaplapseError::config(format!(
                "freeze seconds must be a non-negative number, got {}",
                self.freeze_seconds
            )));
        }
        if self.width < 2 || self.height < 2 {
            return Err(MaplapseError::config(format!(
                "resolution {}x{} is too small",
                self.width, self.height
            )));
        }
        if self.reference_width == 0 || self.reference_height == 0 {
            return Err(MaplapseError::config("reference resolution must be non-zero"));
        }
        Ok(())
    }

    /// Width and height rounded down to even values.
    pub fn aligned_dimensions(&self) -> (u32, u32) {
        (align_even(self.width), align_even(self.height))
    }
}

/// Round down to an even value, never below 2.
pub fn align_even(value: u32) -> u32 {
    (value & !1).max(2)
}

/// Cooperative stop flag, observed between frames.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback for timelapse encoding.
pub type ProgressCallback = Box<dyn Fn(EncodeProgress) + Send>;

/// Encode progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeProgress {
    pub stage: EncodeStage,

    /// Frames submitted so far, freeze frames included.
    pub frames_encoded: u64,

    /// Timestamp of the most recent frame.
    pub timestamp_us: u64,

    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStage {
    Encoding,
    Freezing,
    Finalizing,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Encoding,
    Finishing,
    Finished,
    Errored,
}

/// Renders a history query into a video.
pub struct TimelapseRecorder {
    options: RecorderOptions,
    negotiated: NegotiatedCodec,
    compositor: FrameCompositor,
    session: EncoderSession,
    sink: Option<OutputSink>,
    stop: StopHandle,
    state: RecorderState,
    progress: Option<ProgressCallback>,
    clock: EncodeClock,
}

impl TimelapseRecorder {
    /// Negotiate a codec, allocate the recording surface, open the container,
    /// and configure the encoder. Must run inside a tokio runtime.
    pub async fn create(
        platform: &dyn CodecPlatform,
        mut options: RecorderOptions,
        label: LabelStyle,
        font: Option<Arc<dyn LabelFont>>,
    ) -> MaplapseResult<Self> {
        options.validate()?;
        let (width, height) = options.aligned_dimensions();
        if (width, height) != (options.width, options.height) {
            tracing::info!(
                requested_width = options.width,
                requested_height = options.height,
                width,
                height,
                "Rounded resolution down to even dimensions"
            );
            options.width = width;
            options.height = height;
        }

        let negotiated = negotiate(platform, options.container, width, height, options.fps).await?;
        let size = SurfaceSize::new(width, height)
            .with_reference(options.reference_width, options.reference_height);
        let compositor = FrameCompositor::new(size, label, font);

        let errors = ErrorLatch::default();
        let sink = OutputSink::open(
            options.container,
            negotiated.mux_codec,
            width,
            height,
            options.fps,
            errors.clone(),
        )?;
        let session =
            EncoderSession::open(platform, &negotiated.config, sink.packet_sink(), errors).await?;

        Ok(Self {
            options,
            negotiated,
            compositor,
            session,
            sink: Some(sink),
            stop: StopHandle::default(),
            state: RecorderState::Idle,
            progress: None,
            clock: EncodeClock::start(),
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Pull every frame from `source`, composite it through `renderer`, and
    /// encode it, then append freeze frames.
    ///
    /// `renderer` is left showing the last frame's state.
    pub async fn encode_timelapse(
        &mut self,
        source: &mut dyn FrameSource,
        renderer: &mut dyn MapRenderer,
    ) -> MaplapseResult<()> {
        if self.state != RecorderState::Idle {
            return Err(MaplapseError::invalid_state(format!(
                "encode_timelapse called in state {:?}",
                self.state
            )));
        }
        self.state = RecorderState::Encoding;
        tracing::info!(
            kind = self.options.query.kind.as_str(),
            interval = self.options.query.interval.as_str(),
            start = ?self.options.query.start,
            started = self.clock.started_wall(),
            "Timelapse encode started"
        );

        match self.run(source, renderer).await {
            Ok(()) => {
                self.state = RecorderState::Finishing;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    frames = self.session.frames_submitted(),
                    "Timelapse encode failed"
                );
                self.state = RecorderState::Errored;
                self.session.close();
                self.report(EncodeStage::Failed);
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        renderer: &mut dyn MapRenderer,
    ) -> MaplapseResult<()> {
        source
            .initialize(&self.options.query)
            .await
            .map_err(producer_failure)?;

        loop {
            if self.stop_observed() {
                return Ok(());
            }
            self.session.errors().check()?;
            let Some(record) = source.next_frame().await.map_err(producer_failure)? else {
                break;
            };
            let frame = self.compositor.composite(renderer, &record).await?;
            self.session.submit(frame).await?;
            self.report(EncodeStage::Encoding);
        }

        self.freeze().await
    }

    async fn freeze(&mut self) -> MaplapseResult<()> {
        let freeze_us = freeze_duration_us(self.options.freeze_seconds);
        let frames = freeze_frame_count(freeze_us, self.session.frame_duration_us());
        if frames == 0 {
            return Ok(());
        }
        if self.compositor.frames_composited() == 0 {
            tracing::debug!("History was empty; nothing to freeze");
            return Ok(());
        }

        tracing::info!(frames, freeze_us, "Appending freeze frames");
        for _ in 0..frames {
            if self.stop_observed() {
                return Ok(());
            }
            self.session.errors().check()?;
            self.session.submit(self.compositor.last_frame()).await?;
            self.report(EncodeStage::Freezing);
        }
        Ok(())
    }

    /// Drain the encoder, finalize the container, and return the video.
    ///
    /// Valid after a completed, stopped, or failed encode. A recorder that
    /// encoded nothing fails with [`MaplapseError::Finalize`].
    pub async fn finish(&mut self) -> MaplapseResult<OutputArtifact> {
        let Some(sink) = self.sink.take() else {
            return Err(MaplapseError::invalid_state("finish already called"));
        };
        if self.state != RecorderState::Errored {
            self.state = RecorderState::Finishing;
        }
        self.report(EncodeStage::Finalizing);

        let flushed = self.session.finish().await;
        let written = sink.finish().await;
        match flushed.and(written) {
            Ok(bytes) => {
                let frames = self.session.frames_submitted();
                tracing::info!(
                    container = %self.options.container,
                    bytes = bytes.len(),
                    frames,
                    duration_us = self.session.last_timestamp_us().unwrap_or(0)
                        + self.session.frame_duration_us(),
                    elapsed_secs = self.clock.elapsed_secs(),
                    fps = self.clock.throughput(frames),
                    "Timelapse finished"
                );
                self.state = RecorderState::Finished;
                self.report(EncodeStage::Complete);
                Ok(OutputArtifact::new(bytes, self.options.container))
            }
            Err(e) => {
                tracing::error!(error = %e, "Timelapse finalize failed");
                self.state = RecorderState::Errored;
                self.report(EncodeStage::Failed);
                Err(e)
            }
        }
    }

    /// Ask the encode loop to stop before its next frame.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn negotiated(&self) -> &NegotiatedCodec {
        &self.negotiated
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    pub fn frames_encoded(&self) -> u64 {
        self.session.frames_submitted()
    }

    fn stop_observed(&self) -> bool {
        let stopped = self.stop.is_stopped();
        if stopped {
            tracing::info!(
                frames = self.session.frames_submitted(),
                "Stop requested; ending encode early"
            );
        }
        stopped
    }

    fn report(&self, stage: EncodeStage) {
        if let Some(callback) = &self.progress {
            callback(EncodeProgress {
                stage,
                frames_encoded: self.session.frames_submitted(),
                timestamp_us: self.session.last_timestamp_us().unwrap_or(0),
                elapsed_secs: self.clock.elapsed_secs(),
            });
        }
    }
}

fn producer_failure(err: MaplapseError) -> MaplapseError {
    match err {
        MaplapseError::Producer { .. } => err,
        other => MaplapseError::producer(other.to_string()),
    }
}
