//! WebM writer for a single VP8/VP9 track.
//!
//! Blocks are grouped into clusters as packets arrive. A new cluster starts at
//! every keyframe and whenever a block's timecode would not fit the signed
//! 16-bit offset from its cluster. The segment (header, info, tracks,
//! clusters, cues) is assembled at finalize, when every size is known.

use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::{Container, EncodedPacket, MuxCodec};

use crate::ebml::{
    write_element, write_float, write_id, write_master, write_string, write_uint, write_vint,
};
use crate::ContainerMuxer;

mod id {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const SEGMENT: u32 = 0x1853_8067;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const DURATION: u32 = 0x4489;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const DEFAULT_DURATION: u32 = 0x23_E383;
    pub const CODEC_ID: u32 = 0x86;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;

    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;

    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
}

/// Nanoseconds per timecode tick (1 ms).
const TIMECODE_SCALE_NS: u64 = 1_000_000;
const TRACK_NUMBER: u64 = 1;
const VIDEO_TRACK_TYPE: u64 = 1;
const KEYFRAME_FLAG: u8 = 0x80;

#[derive(Debug)]
struct OpenCluster {
    timecode_ms: u64,
    payload: Vec<u8>,
}

/// In-memory WebM writer.
#[derive(Debug)]
pub struct WebmMuxer {
    codec: MuxCodec,
    width: u32,
    height: u32,
    frame_duration_us: u64,
    clusters: Vec<u8>,
    /// `(cluster timecode, offset within the cluster area)`
    cue_points: Vec<(u64, u64)>,
    current: Option<OpenCluster>,
    last_timestamp_us: Option<u64>,
    end_us: u64,
    packets: usize,
    finalized: bool,
    buffer: Vec<u8>,
}

impl WebmMuxer {
    pub fn new(codec: MuxCodec, width: u32, height: u32, fps: u32) -> MaplapseResult<Self> {
        if codec.container() != Container::Webm {
            return Err(MaplapseError::mux(format!("{codec} cannot be written to webm")));
        }
        Ok(Self {
            codec,
            width,
            height,
            frame_duration_us: maplapse_common::frame_duration_us(fps),
            clusters: Vec::new(),
            cue_points: Vec::new(),
            current: None,
            last_timestamp_us: None,
            end_us: 0,
            packets: 0,
            finalized: false,
            buffer: Vec::new(),
        })
    }

    fn codec_id(&self) -> &'static str {
        match self.codec {
            MuxCodec::Vp8 => "V_VP8",
            _ => "V_VP9",
        }
    }

    fn close_cluster(&mut self) {
        if let Some(cluster) = self.current.take() {
            self.cue_points
                .push((cluster.timecode_ms, self.clusters.len() as u64));
            write_element(&mut self.clusters, id::CLUSTER, &cluster.payload);
        }
    }

    fn open_cluster(&mut self, timecode_ms: u64) {
        self.close_cluster();
        let mut payload = Vec::new();
        write_uint(&mut payload, id::TIMECODE, timecode_ms);
        self.current = Some(OpenCluster {
            timecode_ms,
            payload,
        });
    }

    fn write_header(&self, buf: &mut Vec<u8>) {
        write_master(buf, id::EBML, |b| {
            write_uint(b, id::EBML_VERSION, 1);
            write_uint(b, id::EBML_READ_VERSION, 1);
            write_uint(b, id::EBML_MAX_ID_LENGTH, 4);
            write_uint(b, id::EBML_MAX_SIZE_LENGTH, 8);
            write_string(b, id::DOC_TYPE, "webm");
            write_uint(b, id::DOC_TYPE_VERSION, 4);
            write_uint(b, id::DOC_TYPE_READ_VERSION, 2);
        });
    }

    fn write_info(&self, buf: &mut Vec<u8>) {
        let duration_ms = self.end_us as f64 / 1_000.0;
        write_master(buf, id::INFO, |b| {
            write_uint(b, id::TIMECODE_SCALE, TIMECODE_SCALE_NS);
            write_float(b, id::DURATION, duration_ms);
            write_string(b, id::MUXING_APP, "maplapse");
            write_string(b, id::WRITING_APP, "maplapse");
        });
    }

    fn write_tracks(&self, buf: &mut Vec<u8>) {
        write_master(buf, id::TRACKS, |b| {
            write_master(b, id::TRACK_ENTRY, |b| {
                write_uint(b, id::TRACK_NUMBER, TRACK_NUMBER);
                write_uint(b, id::TRACK_UID, TRACK_NUMBER);
                write_uint(b, id::TRACK_TYPE, VIDEO_TRACK_TYPE);
                write_uint(b, id::FLAG_LACING, 0);
                write_uint(b, id::DEFAULT_DURATION, self.frame_duration_us * 1_000);
                write_string(b, id::CODEC_ID, self.codec_id());
                write_master(b, id::VIDEO, |b| {
                    write_uint(b, id::PIXEL_WIDTH, self.width as u64);
                    write_uint(b, id::PIXEL_HEIGHT, self.height as u64);
                });
            });
        });
    }

    fn write_cues(&self, buf: &mut Vec<u8>, cluster_base: u64) {
        write_master(buf, id::CUES, |b| {
            for &(time, offset) in &self.cue_points {
                write_master(b, id::CUE_POINT, |b| {
                    write_uint(b, id::CUE_TIME, time);
                    write_master(b, id::CUE_TRACK_POSITIONS, |b| {
                        write_uint(b, id::CUE_TRACK, TRACK_NUMBER);
                        write_uint(b, id::CUE_CLUSTER_POSITION, cluster_base + offset);
                    });
                });
            }
        });
    }
}

impl ContainerMuxer for WebmMuxer {
    fn container(&self) -> Container {
        Container::Webm
    }

    fn add_packet(
        &mut self,
        packet: EncodedPacket,
        _decoder_config: Option<&[u8]>,
    ) -> MaplapseResult<()> {
        if self.finalized {
            return Err(MaplapseError::mux("packet added after finalize"));
        }
        if let Some(last) = self.last_timestamp_us {
            if packet.timestamp_us <= last {
                return Err(MaplapseError::mux(format!(
                    "non-increasing timestamp {} after {}",
                    packet.timestamp_us, last
                )));
            }
        }

        let timecode_ms = packet.timestamp_us / 1_000;
        let fits_current = self.current.as_ref().is_some_and(|c| {
            timecode_ms
                .checked_sub(c.timecode_ms)
                .is_some_and(|rel| rel <= i16::MAX as u64)
        });
        if packet.is_keyframe || !fits_current {
            self.open_cluster(timecode_ms);
        }
        let Some(cluster) = self.current.as_mut() else {
            return Err(MaplapseError::mux("no open cluster"));
        };

        let relative = (timecode_ms - cluster.timecode_ms) as i16;
        let mut block = Vec::with_capacity(packet.data.len() + 4);
        write_vint(&mut block, TRACK_NUMBER);
        block.extend_from_slice(&relative.to_be_bytes());
        block.push(if packet.is_keyframe { KEYFRAME_FLAG } else { 0 });
        block.extend_from_slice(&packet.data);
        write_element(&mut cluster.payload, id::SIMPLE_BLOCK, &block);

        self.last_timestamp_us = Some(packet.timestamp_us);
        self.end_us = packet.timestamp_us + packet.duration_us;
        self.packets += 1;
        Ok(())
    }

    fn finalize(&mut self) -> MaplapseResult<()> {
        if self.finalized {
            return Err(MaplapseError::mux("webm writer already finalized"));
        }
        self.finalized = true;
        if self.packets == 0 {
            tracing::warn!("Finalizing webm with no blocks");
            return Ok(());
        }
        self.close_cluster();

        let mut segment = Vec::with_capacity(self.clusters.len() + 512);
        self.write_info(&mut segment);
        self.write_tracks(&mut segment);
        let cluster_base = segment.len() as u64;
        segment.extend_from_slice(&self.clusters);
        self.write_cues(&mut segment, cluster_base);

        let mut out = Vec::with_capacity(segment.len() + 64);
        self.write_header(&mut out);
        write_id(&mut out, id::SEGMENT);
        write_vint(&mut out, segment.len() as u64);
        out.extend_from_slice(&segment);

        self.clusters = Vec::new();
        self.buffer = out;
        tracing::debug!(
            codec = %self.codec,
            blocks = self.packets,
            clusters = self.cue_points.len(),
            bytes = self.buffer.len(),
            "webm finalized"
        );
        Ok(())
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn packet_count(&self) -> usize {
        self.packets
    }
}
