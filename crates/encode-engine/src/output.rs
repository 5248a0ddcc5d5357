//! Output sink: encoded chunks into the container writer.
//!
//! Encoder output callbacks push chunks into an unbounded channel and return
//! immediately. A single writer task owns the [`ContainerMuxer`] and appends
//! packets in arrival order, so mux work overlaps with preparing the next
//! frame. [`OutputSink::finish`] sends a stop marker, joins the writer, then
//! finalizes the container and hands back its bytes.

use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::{Container, EncodedPacket, MuxCodec};
use maplapse_mux_engine::{open_muxer, ContainerMuxer};
use maplapse_platform_core::EncodedChunk;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::ErrorLatch;

enum WriterMessage {
    Packet(EncodedPacket, Option<Vec<u8>>),
    Finish,
}

/// Cheap handle for pushing encoded chunks to the writer.
#[derive(Clone)]
pub struct PacketSink {
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl PacketSink {
    /// Queue a chunk. Chunks that arrive after the writer stopped are dropped.
    pub fn push(&self, chunk: EncodedChunk) {
        let (packet, config) = chunk.into_packet();
        let timestamp_us = packet.timestamp_us;
        if self.tx.send(WriterMessage::Packet(packet, config)).is_err() {
            tracing::debug!(timestamp_us, "Packet arrived after the writer stopped");
        }
    }
}

impl std::fmt::Debug for PacketSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketSink").finish_non_exhaustive()
    }
}

/// The in-memory container plus the task feeding it.
pub struct OutputSink {
    container: Container,
    sink: PacketSink,
    writer: Option<JoinHandle<MaplapseResult<Box<dyn ContainerMuxer>>>>,
}

impl OutputSink {
    /// Open the container writer and start the writer task. Must run inside a tokio runtime.
    pub fn open(
        container: Container,
        mux_codec: MuxCodec,
        width: u32,
        height: u32,
        fps: u32,
        errors: ErrorLatch,
    ) -> MaplapseResult<Self> {
        let muxer = open_muxer(container, mux_codec, width, height, fps)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(muxer, rx, errors));
        Ok(Self {
            container,
            sink: PacketSink { tx },
            writer: Some(writer),
        })
    }

    pub fn container(&self) -> Container {
        self.container
    }

    pub fn packet_sink(&self) -> PacketSink {
        self.sink.clone()
    }

    /// Join pending writes, finalize the container, and return its bytes.
    ///
    /// An empty buffer after finalization is a [`MaplapseError::Finalize`].
    pub async fn finish(mut self) -> MaplapseResult<Vec<u8>> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| MaplapseError::invalid_state("output sink already finished"))?;
        // The writer may already be gone after a mux error; its result reports that.
        let _ = self.sink.tx.send(WriterMessage::Finish);

        let mut muxer = writer
            .await
            .map_err(|e| MaplapseError::mux(format!("packet writer task failed: {e}")))??;
        muxer.finalize()?;
        let packets = muxer.packet_count();
        let bytes = muxer.take_buffer();
        if bytes.is_empty() {
            return Err(MaplapseError::finalize(format!(
                "{} output is empty after finalization ({packets} packets)",
                self.container
            )));
        }
        tracing::info!(
            container = %self.container,
            packets,
            bytes = bytes.len(),
            "Container finalized"
        );
        Ok(bytes)
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            tracing::debug!("Output sink dropped before finish; discarding packets");
            writer.abort();
        }
    }
}

async fn run_writer(
    mut muxer: Box<dyn ContainerMuxer>,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
    errors: ErrorLatch,
) -> MaplapseResult<Box<dyn ContainerMuxer>> {
    while let Some(message) = rx.recv().await {
        let (packet, config) = match message {
            WriterMessage::Packet(packet, config) => (packet, config),
            WriterMessage::Finish => break,
        };
        if let Err(e) = muxer.add_packet(packet, config.as_deref()) {
            errors.latch(format!("muxer rejected packet: {e}"));
            return Err(e);
        }
    }
    rx.close();
    let dropped = std::iter::from_fn(|| rx.try_recv().ok()).count();
    if dropped > 0 {
        tracing::warn!(dropped, "Discarded packets queued after finalize began");
    }
    Ok(muxer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u64) -> EncodedChunk {
        EncodedChunk {
            data: vec![0x10, index as u8],
            timestamp_us: index * 125_000,
            duration_us: 125_000,
            is_keyframe: index == 0,
            decoder_config: None,
        }
    }

    #[tokio::test]
    async fn test_finish_writes_queued_packets() {
        let sink = OutputSink::open(Container::Webm, MuxCodec::Vp8, 64, 48, 8, ErrorLatch::default())
            .unwrap();
        let packets = sink.packet_sink();
        for i in 0..5 {
            packets.push(chunk(i));
        }
        let bytes = sink.finish().await.unwrap();
        assert!(bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]));
    }

    #[tokio::test]
    async fn test_empty_output_is_finalize_failure() {
        let sink = OutputSink::open(Container::Webm, MuxCodec::Vp9, 64, 48, 8, ErrorLatch::default())
            .unwrap();
        let err = sink.finish().await.unwrap_err();
        assert!(matches!(err, MaplapseError::Finalize { .. }));
    }

    #[tokio::test]
    async fn test_mux_error_is_latched() {
        let errors = ErrorLatch::default();
        let sink =
            OutputSink::open(Container::Webm, MuxCodec::Vp8, 64, 48, 8, errors.clone()).unwrap();
        let packets = sink.packet_sink();
        packets.push(chunk(1));
        packets.push(chunk(0));
        let err = sink.finish().await.unwrap_err();
        assert!(matches!(err, MaplapseError::Mux { .. }));
        assert!(errors.get().is_some());
    }

    #[tokio::test]
    async fn test_push_after_finish_is_ignored() {
        let sink = OutputSink::open(Container::Webm, MuxCodec::Vp8, 64, 48, 8, ErrorLatch::default())
            .unwrap();
        let packets = sink.packet_sink();
        packets.push(chunk(0));
        sink.finish().await.unwrap();
        packets.push(chunk(1));
    }
}
