//! IVF stream reading and VP8/VP9 keyframe detection.
//!
//! IVF is a 32-byte file header (`DKIF`) followed by frames, each with a
//! 12-byte header: little-endian `u32` payload size and `u64` timestamp.

use maplapse_common::{MaplapseError, MaplapseResult};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const IVF_HEADER_LEN: usize = 32;
pub const IVF_FRAME_HEADER_LEN: usize = 12;
const IVF_SIGNATURE: &[u8; 4] = b"DKIF";

/// Refuse frames larger than this; a corrupt size would otherwise allocate wildly.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase_den: u32,
    pub timebase_num: u32,
}

pub fn parse_header(buf: &[u8; IVF_HEADER_LEN]) -> MaplapseResult<IvfHeader> {
    if &buf[0..4] != IVF_SIGNATURE {
        return Err(MaplapseError::encoder("ffmpeg output is not an IVF stream"));
    }
    let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
    let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
    Ok(IvfHeader {
        fourcc: [buf[8], buf[9], buf[10], buf[11]],
        width: u16_at(12),
        height: u16_at(14),
        timebase_den: u32_at(16),
        timebase_num: u32_at(20),
    })
}

/// `(payload size, pts)`
pub fn parse_frame_header(buf: &[u8; IVF_FRAME_HEADER_LEN]) -> (u32, u64) {
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let mut pts = [0u8; 8];
    pts.copy_from_slice(&buf[4..12]);
    (size, u64::from_le_bytes(pts))
}

/// VP8 frame tag: bit 0 of the first byte is 0 for key frames.
pub fn is_vp8_keyframe(frame: &[u8]) -> bool {
    frame.first().is_some_and(|b| b & 1 == 0)
}

/// VP9 uncompressed header: frame marker, profile, optional reserved bit,
/// show_existing_frame, then frame_type (0 = key frame).
pub fn is_vp9_keyframe(frame: &[u8]) -> bool {
    let Some(&b) = frame.first() else {
        return false;
    };
    let bit = |i: u32| (b >> (7 - i)) & 1;
    if b >> 6 != 0b10 {
        return false;
    }
    let profile = (bit(3) << 1) | bit(2);
    let mut pos = 4;
    if profile == 3 {
        pos += 1;
    }
    if bit(pos) == 1 {
        return false;
    }
    bit(pos + 1) == 0
}

/// Sequential reader over an IVF byte stream.
pub struct IvfReader<R> {
    inner: R,
    header: Option<IvfHeader>,
}

impl<R: AsyncRead + Unpin> IvfReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            header: None,
        }
    }

    pub fn header(&self) -> Option<&IvfHeader> {
        self.header.as_ref()
    }

    pub async fn read_header(&mut self) -> MaplapseResult<IvfHeader> {
        let mut buf = [0u8; IVF_HEADER_LEN];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(|e| MaplapseError::encoder(format!("failed to read IVF header: {e}")))?;
        let header = parse_header(&buf)?;
        self.header = Some(header);
        Ok(header)
    }

    /// Next frame payload, or `None` at a clean end of stream.
    pub async fn next_frame(&mut self) -> MaplapseResult<Option<(u64, Vec<u8>)>> {
        let mut buf = [0u8; IVF_FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .inner
                .read(&mut buf[filled..])
                .await
                .map_err(|e| MaplapseError::encoder(format!("failed to read IVF frame: {e}")))?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(MaplapseError::encoder("truncated IVF frame header"));
            }
            filled += n;
        }

        let (size, pts) = parse_frame_header(&buf);
        if size > MAX_FRAME_BYTES {
            return Err(MaplapseError::encoder(format!(
                "IVF frame of {size} bytes exceeds limit"
            )));
        }
        let mut data = vec![0u8; size as usize];
        self.inner
            .read_exact(&mut data)
            .await
            .map_err(|e| MaplapseError::encoder(format!("truncated IVF frame payload: {e}")))?;
        Ok(Some((pts, data)))
    }
}
