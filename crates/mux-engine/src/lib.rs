//! Maplapse Mux Engine
//!
//! In-memory container writers for the single video track of a timelapse.
//!
//! ```text
//! EncodedPacket ──▶ ContainerMuxer::add_packet ──▶ (buffered samples)
//!                                                        │
//!                   ContainerMuxer::finalize ◀───────────┘
//!                           │
//!                           ▼
//!                   take_buffer() ──▶ mp4 / webm bytes
//! ```
//!
//! Packets must arrive in strictly increasing timestamp order. A writer that
//! received no packets finalizes to an empty buffer.

pub mod avc;
pub mod ebml;
pub mod mp4;
pub mod webm;

use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::{Container, EncodedPacket, MuxCodec};

pub use mp4::Mp4Muxer;
pub use webm::WebmMuxer;

/// A container being written in memory.
pub trait ContainerMuxer: Send {
    fn container(&self) -> Container;

    /// Append one packet. `decoder_config` carries codec configuration that
    /// arrived alongside the packet, if any.
    fn add_packet(
        &mut self,
        packet: EncodedPacket,
        decoder_config: Option<&[u8]>,
    ) -> MaplapseResult<()>;

    /// Write trailing index and metadata. Further packets are rejected.
    fn finalize(&mut self) -> MaplapseResult<()>;

    /// Move the finalized file out of the writer.
    fn take_buffer(&mut self) -> Vec<u8>;

    fn packet_count(&self) -> usize;
}

/// Open a writer for `codec` in `container`.
pub fn open_muxer(
    container: Container,
    codec: MuxCodec,
    width: u32,
    height: u32,
    fps: u32,
) -> MaplapseResult<Box<dyn ContainerMuxer>> {
    if codec.container() != container {
        return Err(MaplapseError::mux(format!(
            "codec {codec} cannot be written to {container}"
        )));
    }
    tracing::debug!(%container, %codec, width, height, fps, "Opening muxer");
    match container {
        Container::Mp4 => Ok(Box::new(Mp4Muxer::new(width, height))),
        Container::Webm => Ok(Box::new(WebmMuxer::new(codec, width, height, fps)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_matching_writers() {
        let mp4 = open_muxer(Container::Mp4, MuxCodec::Avc, 64, 48, 8).unwrap();
        assert_eq!(mp4.container(), Container::Mp4);
        let webm = open_muxer(Container::Webm, MuxCodec::Vp8, 64, 48, 8).unwrap();
        assert_eq!(webm.container(), Container::Webm);
    }

    #[test]
    fn test_mismatched_codec_rejected() {
        assert!(open_muxer(Container::Mp4, MuxCodec::Vp9, 64, 48, 8).is_err());
        assert!(open_muxer(Container::Webm, MuxCodec::Avc, 64, 48, 8).is_err());
    }
}
