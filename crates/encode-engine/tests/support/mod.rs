//! Fakes shared by the encode-engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use maplapse_common::{FrameTick, MaplapseError, MaplapseResult};
use maplapse_history_model::{
    EncoderConfig, FrameRecord, FrameSource, HistoryQuery, Interval, MapDate, MapKind, MapState,
};
use maplapse_platform_core::{
    CodecPlatform, EncodedChunk, EncoderCallbacks, RgbaImage, VideoEncoder,
};
use serde_json::json;

/// Call counters for every encoder a [`FakePlatform`] creates.
#[derive(Debug, Default)]
pub struct EncoderStats {
    pub created: AtomicU64,
    pub encoded: AtomicU64,
    pub flushes: AtomicU64,
    pub closes: AtomicU64,
    pub ticks: Mutex<Vec<FrameTick>>,
}

impl EncoderStats {
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> Vec<FrameTick> {
        self.ticks.lock().unwrap().clone()
    }
}

/// Codec platform that supports a fixed set of codec strings.
pub struct FakePlatform {
    supported: Vec<String>,
    fail_at_frame: Option<u64>,
    pub probes: Mutex<Vec<String>>,
    pub stats: Arc<EncoderStats>,
}

impl FakePlatform {
    pub fn supporting(codecs: &[&str]) -> Self {
        Self {
            supported: codecs.iter().map(|c| c.to_string()).collect(),
            fail_at_frame: None,
            probes: Mutex::new(Vec::new()),
            stats: Arc::default(),
        }
    }

    /// Report an asynchronous encoder error while encoding frame `index` (1-based).
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at_frame = Some(index);
        self
    }

    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CodecPlatform for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_config_supported(&self, config: &EncoderConfig) -> bool {
        self.probes.lock().unwrap().push(config.codec.clone());
        self.supported.iter().any(|c| *c == config.codec)
    }

    async fn create_encoder(
        &self,
        config: &EncoderConfig,
        callbacks: EncoderCallbacks,
    ) -> MaplapseResult<Box<dyn VideoEncoder>> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEncoder {
            avc: config.codec.starts_with("avc1"),
            callbacks,
            stats: Arc::clone(&self.stats),
            pending: Vec::new(),
            delivered: 0,
            fail_at_frame: self.fail_at_frame,
            closed: false,
        }))
    }
}

/// Encoder that emits a tiny deterministic packet per frame on flush.
struct FakeEncoder {
    avc: bool,
    callbacks: EncoderCallbacks,
    stats: Arc<EncoderStats>,
    pending: Vec<FrameTick>,
    delivered: u64,
    fail_at_frame: Option<u64>,
    closed: bool,
}

const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x28, 0xAC];
const PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];

impl FakeEncoder {
    fn chunk(&self, tick: FrameTick) -> EncodedChunk {
        let first = self.delivered == 0;
        let keyframe = first || tick.keyframe;
        let index = tick.index as u8;
        if self.avc {
            let nal = if keyframe { 0x65 } else { 0x41 };
            EncodedChunk {
                data: vec![0, 0, 0, 1, nal, index],
                timestamp_us: tick.timestamp_us,
                duration_us: tick.duration_us,
                is_keyframe: keyframe,
                decoder_config: first
                    .then(|| maplapse_mux_engine::avc::build_avcc_record(SPS, PPS)),
            }
        } else {
            let tag = if keyframe { 0x10 } else { 0x11 };
            EncodedChunk {
                data: vec![tag, index, 0x9D],
                timestamp_us: tick.timestamp_us,
                duration_us: tick.duration_us,
                is_keyframe: keyframe,
                decoder_config: None,
            }
        }
    }
}

#[async_trait::async_trait]
impl VideoEncoder for FakeEncoder {
    async fn encode(&mut self, _frame: &RgbaImage, tick: FrameTick) -> MaplapseResult<()> {
        if self.closed {
            return Err(MaplapseError::encoder("encode after close"));
        }
        self.stats.encoded.fetch_add(1, Ordering::SeqCst);
        self.stats.ticks.lock().unwrap().push(tick);
        if self.fail_at_frame == Some(tick.index) {
            (self.callbacks.error)("synthetic encoder fault".into());
            return Ok(());
        }
        self.pending.push(tick);
        Ok(())
    }

    async fn flush(&mut self) -> MaplapseResult<()> {
        self.stats.flushes.fetch_add(1, Ordering::SeqCst);
        for tick in std::mem::take(&mut self.pending) {
            let chunk = self.chunk(tick);
            (self.callbacks.output)(chunk);
            self.delivered += 1;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Frame source replaying fixed records, optionally failing on the n-th `next_frame` call.
pub struct ScriptedSource {
    records: Vec<FrameRecord>,
    position: Option<usize>,
    fail_on_call: Option<usize>,
    pub calls: usize,
}

impl ScriptedSource {
    pub fn new(records: Vec<FrameRecord>) -> Self {
        Self {
            records,
            position: None,
            fail_on_call: None,
            calls: 0,
        }
    }

    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }
}

#[async_trait::async_trait]
impl FrameSource for ScriptedSource {
    async fn initialize(&mut self, _query: &HistoryQuery) -> MaplapseResult<()> {
        self.position = Some(0);
        Ok(())
    }

    async fn next_frame(&mut self) -> MaplapseResult<Option<FrameRecord>> {
        self.calls += 1;
        if self.fail_on_call == Some(self.calls) {
            return Err(MaplapseError::producer("history engine went away"));
        }
        let Some(position) = self.position.as_mut() else {
            return Err(MaplapseError::producer("read before initialize"));
        };
        let record = self.records.get(*position).cloned();
        *position += 1;
        Ok(record)
    }
}

/// `count` one-tile records with shifting colours, one year apart.
pub fn records(count: usize) -> Vec<FrameRecord> {
    (0..count)
        .map(|i| {
            let shade = (i * 37 % 256) as u8;
            FrameRecord::new(
                MapDate::new(i as i32 * 365, format!("Year {}", 1000 + i)),
                MapState::new(json!({
                    "columns": 2,
                    "tiles": [format!("#{shade:02x}4080"), "#203040"],
                })),
            )
        })
        .collect()
}

pub fn query() -> HistoryQuery {
    HistoryQuery::new(MapKind::Political, Interval::Year)
}
