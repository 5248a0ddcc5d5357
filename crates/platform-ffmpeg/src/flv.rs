//! FLV stream reading for H.264 output.
//!
//! ffmpeg writes each packet as its own FLV tag, so tag boundaries give
//! frame boundaries over a pipe. An FLV stream is a 9-byte header and a
//! `u32` previous-tag-size, then tags: an 11-byte header (type, `u24` size,
//! timestamp, stream id), the payload, and a trailing `u32` size.
//!
//! AVC video payloads start with a frame-type/codec byte, a packet type
//! (0 = `avcC` sequence header, 1 = NAL units, 2 = end of sequence) and a
//! 24-bit composition offset. NAL units are length-prefixed.

use maplapse_common::{MaplapseError, MaplapseResult};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const FLV_HEADER_LEN: usize = 9;
pub const FLV_TAG_HEADER_LEN: usize = 11;
const FLV_SIGNATURE: &[u8; 3] = b"FLV";

const TAG_VIDEO: u8 = 9;
const CODEC_AVC: u8 = 7;
const FRAME_TYPE_KEY: u8 = 1;

const AVC_SEQUENCE_HEADER: u8 = 0;
const AVC_NALU: u8 = 1;
const AVC_END_OF_SEQUENCE: u8 = 2;

/// One AVC video tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvcTag {
    /// `AVCDecoderConfigurationRecord`.
    SequenceHeader(Vec<u8>),
    /// One access unit of length-prefixed NAL units.
    Frame { keyframe: bool, data: Vec<u8> },
    EndOfSequence,
}

/// Parse the payload of a video tag.
pub fn parse_avc_tag(payload: &[u8]) -> MaplapseResult<AvcTag> {
    if payload.len() < 5 {
        return Err(MaplapseError::encoder("FLV video tag too short"));
    }
    let frame_type = payload[0] >> 4;
    let codec = payload[0] & 0x0F;
    if codec != CODEC_AVC {
        return Err(MaplapseError::encoder(format!(
            "FLV video codec id {codec} is not AVC"
        )));
    }
    let body = payload[5..].to_vec();
    match payload[1] {
        AVC_SEQUENCE_HEADER => Ok(AvcTag::SequenceHeader(body)),
        AVC_NALU => Ok(AvcTag::Frame {
            keyframe: frame_type == FRAME_TYPE_KEY,
            data: body,
        }),
        AVC_END_OF_SEQUENCE => Ok(AvcTag::EndOfSequence),
        other => Err(MaplapseError::encoder(format!(
            "unknown AVC packet type {other}"
        ))),
    }
}

/// NAL length-prefix size declared by an `avcC` record.
pub fn nal_length_size(avcc: &[u8]) -> MaplapseResult<usize> {
    match avcc.get(4) {
        Some(b) if b & 0x03 != 2 => Ok((b & 0x03) as usize + 1),
        Some(_) => Err(MaplapseError::encoder("avcC declares 3-byte NAL lengths")),
        None => Err(MaplapseError::encoder("avcC record too short")),
    }
}

/// Rewrite length-prefixed NAL units with 4-byte Annex B start codes.
pub fn length_prefixed_to_annex_b(data: &[u8], length_size: usize) -> MaplapseResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut pos = 0;
    while pos < data.len() {
        let Some(prefix) = data.get(pos..pos + length_size) else {
            return Err(MaplapseError::encoder("truncated NAL length prefix"));
        };
        let len = prefix.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        pos += length_size;
        let Some(nal) = data.get(pos..pos + len) else {
            return Err(MaplapseError::encoder("NAL unit overruns its access unit"));
        };
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
        pos += len;
    }
    Ok(out)
}

/// Sequential reader over the video tags of an FLV byte stream.
pub struct FlvReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FlvReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the file header and the first previous-tag-size.
    pub async fn read_header(&mut self) -> MaplapseResult<()> {
        let mut buf = [0u8; FLV_HEADER_LEN];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(|e| MaplapseError::encoder(format!("failed to read FLV header: {e}")))?;
        if &buf[0..3] != FLV_SIGNATURE {
            return Err(MaplapseError::encoder("ffmpeg output is not an FLV stream"));
        }
        let offset = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
        let skip = offset.saturating_sub(FLV_HEADER_LEN) + 4;
        self.skip(skip).await
    }

    /// Next AVC video tag, skipping script and audio tags. `None` at a clean
    /// end of stream.
    pub async fn next_video_tag(&mut self) -> MaplapseResult<Option<AvcTag>> {
        loop {
            let mut header = [0u8; FLV_TAG_HEADER_LEN];
            let mut filled = 0;
            while filled < header.len() {
                let n = self
                    .inner
                    .read(&mut header[filled..])
                    .await
                    .map_err(|e| MaplapseError::encoder(format!("failed to read FLV tag: {e}")))?;
                if n == 0 {
                    if filled == 0 {
                        return Ok(None);
                    }
                    return Err(MaplapseError::encoder("truncated FLV tag header"));
                }
                filled += n;
            }

            let tag_type = header[0] & 0x1F;
            let size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
            if tag_type != TAG_VIDEO {
                self.skip(size + 4).await?;
                continue;
            }
            let mut payload = vec![0u8; size];
            self.inner
                .read_exact(&mut payload)
                .await
                .map_err(|e| MaplapseError::encoder(format!("truncated FLV tag payload: {e}")))?;
            self.skip(4).await?;
            return parse_avc_tag(&payload).map(Some);
        }
    }

    async fn skip(&mut self, mut n: usize) -> MaplapseResult<()> {
        let mut scratch = [0u8; 1024];
        while n > 0 {
            let take = n.min(scratch.len());
            self.inner
                .read_exact(&mut scratch[..take])
                .await
                .map_err(|e| MaplapseError::encoder(format!("truncated FLV stream: {e}")))?;
            n -= take;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVCC: &[u8] = &[1, 0x64, 0x00, 0x28, 0xFF, 0xE1, 0, 2, 0x67, 0x64, 1, 0, 2, 0x68, 0xEE];

    fn stream_header() -> Vec<u8> {
        let mut out = b"FLV".to_vec();
        out.push(1);
        out.push(0x01); // video only
        out.extend_from_slice(&9u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out
    }

    fn tag(kind: u8, payload: &[u8]) -> Vec<u8> {
        let size = payload.len() as u32;
        let mut out = vec![kind];
        out.extend_from_slice(&size.to_be_bytes()[1..]);
        out.extend_from_slice(&[0, 0, 0, 0]); // timestamp
        out.extend_from_slice(&[0, 0, 0]); // stream id
        out.extend_from_slice(payload);
        out.extend_from_slice(&(size + 11).to_be_bytes());
        out
    }

    fn video(frame_type: u8, packet_type: u8, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![(frame_type << 4) | CODEC_AVC, packet_type, 0, 0, 0];
        payload.extend_from_slice(body);
        tag(TAG_VIDEO, &payload)
    }

    #[tokio::test]
    async fn test_reads_sequence_header_and_frames() {
        let mut stream = stream_header();
        stream.extend(tag(18, b"onMetaData"));
        stream.extend(video(1, AVC_SEQUENCE_HEADER, AVCC));
        stream.extend(video(1, AVC_NALU, &[0, 0, 0, 2, 0x65, 0xAA]));
        stream.extend(video(2, AVC_NALU, &[0, 0, 0, 2, 0x41, 0xBB]));
        stream.extend(video(1, AVC_END_OF_SEQUENCE, &[]));
        let mut reader = FlvReader::new(stream.as_slice());

        reader.read_header().await.unwrap();
        assert_eq!(
            reader.next_video_tag().await.unwrap(),
            Some(AvcTag::SequenceHeader(AVCC.to_vec()))
        );
        assert_eq!(
            reader.next_video_tag().await.unwrap(),
            Some(AvcTag::Frame {
                keyframe: true,
                data: vec![0, 0, 0, 2, 0x65, 0xAA]
            })
        );
        assert_eq!(
            reader.next_video_tag().await.unwrap(),
            Some(AvcTag::Frame {
                keyframe: false,
                data: vec![0, 0, 0, 2, 0x41, 0xBB]
            })
        );
        assert_eq!(
            reader.next_video_tag().await.unwrap(),
            Some(AvcTag::EndOfSequence)
        );
        assert_eq!(reader.next_video_tag().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncated_tag_is_an_error() {
        let mut stream = stream_header();
        let mut partial = video(1, AVC_NALU, &[0, 0, 0, 2, 0x65, 0xAA]);
        partial.truncate(partial.len() - 6);
        stream.extend(partial);
        let mut reader = FlvReader::new(stream.as_slice());
        reader.read_header().await.unwrap();
        assert!(reader.next_video_tag().await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_flv() {
        let stream = vec![0u8; 13];
        let mut reader = FlvReader::new(stream.as_slice());
        assert!(reader.read_header().await.is_err());
    }

    #[test]
    fn test_non_avc_codec_is_rejected() {
        assert!(parse_avc_tag(&[0x12, 1, 0, 0, 0, 0xAA]).is_err());
    }

    #[test]
    fn test_length_prefixed_to_annex_b() {
        let data = [0, 0, 0, 2, 0x65, 0xAA, 0, 0, 0, 1, 0x06];
        assert_eq!(
            length_prefixed_to_annex_b(&data, 4).unwrap(),
            vec![0, 0, 0, 1, 0x65, 0xAA, 0, 0, 0, 1, 0x06]
        );
        assert!(length_prefixed_to_annex_b(&[0, 0, 0, 9, 0x65], 4).is_err());
        assert!(length_prefixed_to_annex_b(&[0, 0], 4).is_err());
    }

    #[test]
    fn test_nal_length_size_from_avcc() {
        assert_eq!(nal_length_size(AVCC).unwrap(), 4);
        assert_eq!(nal_length_size(&[1, 0x64, 0, 0x28, 0xFD]).unwrap(), 2);
        assert!(nal_length_size(&[1, 0x64]).is_err());
    }
}
