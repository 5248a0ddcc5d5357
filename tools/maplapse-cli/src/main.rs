//! Maplapse CLI: render map-history timelapses.
//!
//! Usage:
//!   maplapse render <HISTORY>   Render a history file to video
//!   maplapse probe              Show which codecs this machine can encode
//!   maplapse init <PATH>        Write a sample history file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use maplapse_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "maplapse",
    about = "Render historical map states into timelapse videos",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a history file to a timelapse video
    Render {
        /// History archive (JSONL)
        history: PathBuf,

        /// Map kind: political|religion|battles
        #[arg(long, default_value = "political")]
        kind: String,

        /// Sampling interval: year|month|week|day
        #[arg(long, default_value = "year")]
        interval: String,

        /// First day offset to include
        #[arg(long, allow_hyphen_values = true)]
        start: Option<i32>,

        /// Frames per second
        #[arg(long)]
        fps: Option<u32>,

        /// Container: mp4|webm
        #[arg(long)]
        container: Option<String>,

        /// Seconds to hold the final frame
        #[arg(long)]
        freeze: Option<f64>,

        /// Output width
        #[arg(long)]
        width: Option<u32>,

        /// Output height
        #[arg(long)]
        height: Option<u32>,

        /// Font for the date label
        #[arg(long)]
        font: Option<PathBuf>,

        /// ffmpeg binary to use
        #[arg(long)]
        ffmpeg: Option<PathBuf>,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run codec negotiation for every container
    Probe {
        #[arg(long, default_value = "1280")]
        width: u32,

        #[arg(long, default_value = "720")]
        height: u32,

        #[arg(long, default_value = "8")]
        fps: u32,

        /// ffmpeg binary to use
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
    },

    /// Write a synthetic history file
    Init {
        /// Destination path
        path: PathBuf,

        /// Number of yearly samples per map kind
        #[arg(long, default_value = "60")]
        years: usize,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    maplapse_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Render {
            history,
            kind,
            interval,
            start,
            fps,
            container,
            freeze,
            width,
            height,
            font,
            ffmpeg,
            output,
        } => {
            let args = commands::render::RenderArgs {
                history,
                kind,
                interval,
                start,
                fps,
                container,
                freeze,
                width,
                height,
                font,
                ffmpeg,
                output,
            };
            commands::render::run(args, &config).await
        }
        Commands::Probe {
            width,
            height,
            fps,
            ffmpeg,
        } => commands::probe::run(width, height, fps, ffmpeg).await,
        Commands::Init { path, years, force } => commands::init::run(path, years, force),
    }
}
