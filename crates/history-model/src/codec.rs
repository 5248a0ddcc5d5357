//! Encoder configuration and container types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    pub const ALL: [Container; 2] = [Container::Mp4, Container::Webm];

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for Container {
    type Err = maplapse_common::MaplapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            other => Err(maplapse_common::MaplapseError::config(format!(
                "unsupported container '{other}' (expected mp4 or webm)"
            ))),
        }
    }
}

/// Codec identifier understood by the container writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxCodec {
    Avc,
    Vp9,
    Vp8,
}

impl MuxCodec {
    /// Container the codec can be written into.
    pub fn container(&self) -> Container {
        match self {
            Self::Avc => Container::Mp4,
            Self::Vp9 | Self::Vp8 => Container::Webm,
        }
    }
}

impl fmt::Display for MuxCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Avc => "avc",
            Self::Vp9 => "vp9",
            Self::Vp8 => "vp8",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    #[default]
    Variable,
}

/// Encoder configuration, fixed once negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Codec string, e.g. `avc1.640028`, `vp09.00.10.08`, `vp8`.
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Target bits per second.
    pub bitrate: u64,
    pub bitrate_mode: BitrateMode,
    pub framerate: u32,
}

/// An encoded frame on its way to the muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub is_keyframe: bool,
}
