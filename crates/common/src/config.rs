//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where rendered timelapses are written.
    pub output_dir: PathBuf,

    /// Default timelapse settings.
    pub timelapse: TimelapseDefaults,

    /// Date label settings.
    pub label: LabelDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default timelapse parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelapseDefaults {
    /// Frames per second.
    pub fps: u32,

    /// Output container ("mp4" or "webm").
    pub container: String,

    /// Seconds to hold the final frame.
    pub freeze_seconds: f64,

    /// Recording width in pixels.
    pub width: u32,

    /// Recording height in pixels.
    pub height: u32,

    /// Resolution the label size is designed against.
    pub reference_width: u32,
    pub reference_height: u32,
}

/// Date label parameters, expressed at the reference resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelDefaults {
    /// TTF/OTF font used for the date label. When unset, a few common system
    /// font locations are tried.
    pub font_path: Option<PathBuf>,

    /// Font size in pixels.
    pub font_px: f32,

    /// Padding between text and label background.
    pub padding_px: f32,

    /// Distance between the label and the frame edge.
    pub margin_px: f32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "maplapse=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_output(),
            timelapse: TimelapseDefaults::default(),
            label: LabelDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TimelapseDefaults {
    fn default() -> Self {
        Self {
            fps: 8,
            container: "webm".to_string(),
            freeze_seconds: 2.0,
            width: 1280,
            height: 720,
            reference_width: 1920,
            reference_height: 1080,
        }
    }
}

impl Default for LabelDefaults {
    fn default() -> Self {
        Self {
            font_path: None,
            font_px: 48.0,
            padding_px: 16.0,
            margin_px: 24.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

impl LabelDefaults {
    /// The configured font, or the first common system font that exists.
    pub fn resolve_font_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.font_path {
            return Some(path.clone());
        }
        SYSTEM_FONT_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("maplapse").join("config.json")
}

/// Default output directory.
fn dirs_default_output() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("maplapse").join("exports")
}
