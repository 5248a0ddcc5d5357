//! Pull protocol for reading history samples.

use crate::history::{FrameRecord, HistoryQuery};
use maplapse_common::MaplapseResult;

/// A lazy, finite, single-pass sequence of frame records.
///
/// `initialize` establishes iteration state; calling it again restarts the
/// sequence. `next_frame` returns `Ok(None)` once the sequence is exhausted.
/// Any `Err` is treated by the pipeline as a producer failure.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    async fn initialize(&mut self, query: &HistoryQuery) -> MaplapseResult<()>;

    async fn next_frame(&mut self) -> MaplapseResult<Option<FrameRecord>>;
}
