//! Maplapse ffmpeg codec platform.
//!
//! Probes the system `ffmpeg` for its H.264 (`libx264`), VP9 (`libvpx-vp9`)
//! and VP8 (`libvpx`) encoders and runs each encode as an ffmpeg subprocess.

pub mod encoder;
pub mod flv;
pub mod ivf;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::EncoderConfig;
use maplapse_platform_core::{
    CodecPlatform, EncoderCallbacks, PlatformCapabilities, VideoEncoder,
};

pub use encoder::{FfmpegCodec, FfmpegEncoder};

/// Codec platform backed by an ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegPlatform {
    binary: PathBuf,
    available: HashSet<FfmpegCodec>,
}

impl FfmpegPlatform {
    /// Probe `ffmpeg` on `PATH`.
    pub async fn detect() -> MaplapseResult<Self> {
        Self::detect_with(PathBuf::from("ffmpeg")).await
    }

    /// Probe a specific ffmpeg binary.
    pub async fn detect_with(binary: PathBuf) -> MaplapseResult<Self> {
        let output = tokio::process::Command::new(&binary)
            .args(["-hide_banner", "-encoders"])
            .output()
            .await
            .map_err(|e| {
                MaplapseError::unsupported(format!(
                    "ffmpeg not available at {}: {e}",
                    binary.display()
                ))
            })?;
        if !output.status.success() {
            return Err(MaplapseError::platform(format!(
                "ffmpeg -encoders failed (status {}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        let platform = Self::from_encoder_listing(binary, &listing);
        tracing::info!(
            binary = %platform.binary.display(),
            h264 = platform.has(FfmpegCodec::H264),
            vp9 = platform.has(FfmpegCodec::Vp9),
            vp8 = platform.has(FfmpegCodec::Vp8),
            "Detected ffmpeg codec platform"
        );
        Ok(platform)
    }

    /// Build from the text printed by `ffmpeg -encoders`.
    pub fn from_encoder_listing(binary: PathBuf, listing: &str) -> Self {
        let names: HashSet<&str> = listing
            .lines()
            .skip_while(|line| !line.trim_start().starts_with("---"))
            .skip(1)
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let flags = fields.next()?;
                flags.starts_with('V').then(|| fields.next()).flatten()
            })
            .collect();
        let available = FfmpegCodec::ALL
            .into_iter()
            .filter(|codec| names.contains(codec.ffmpeg_encoder()))
            .collect();
        Self { binary, available }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn has(&self, codec: FfmpegCodec) -> bool {
        self.available.contains(&codec)
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        let codecs = FfmpegCodec::ALL
            .into_iter()
            .filter(|codec| self.has(*codec))
            .map(|codec| codec.codec_pattern().to_string())
            .collect();
        PlatformCapabilities {
            name: self.name().to_string(),
            codecs,
        }
    }

    fn check(&self, config: &EncoderConfig) -> Result<FfmpegCodec, String> {
        let codec = FfmpegCodec::from_codec_string(&config.codec)
            .ok_or_else(|| format!("codec {} is not encoded by this platform", config.codec))?;
        if !self.has(codec) {
            return Err(format!("ffmpeg lacks {}", codec.ffmpeg_encoder()));
        }
        if config.width == 0 || config.height == 0 {
            return Err("zero-sized frame".into());
        }
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(format!(
                "{}x{} is not even; yuv420p needs even dimensions",
                config.width, config.height
            ));
        }
        if config.framerate == 0 || config.bitrate == 0 {
            return Err("framerate and bitrate must be positive".into());
        }
        Ok(codec)
    }
}

#[async_trait::async_trait]
impl CodecPlatform for FfmpegPlatform {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn is_config_supported(&self, config: &EncoderConfig) -> bool {
        match self.check(config) {
            Ok(_) => true,
            Err(reason) => {
                tracing::debug!(codec = %config.codec, %reason, "Config not supported");
                false
            }
        }
    }

    async fn create_encoder(
        &self,
        config: &EncoderConfig,
        callbacks: EncoderCallbacks,
    ) -> MaplapseResult<Box<dyn VideoEncoder>> {
        let codec = self.check(config).map_err(MaplapseError::unsupported)?;
        let encoder = FfmpegEncoder::spawn(&self.binary, codec, config, callbacks).await?;
        Ok(Box::new(encoder))
    }
}
