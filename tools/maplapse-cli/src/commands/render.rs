//! Render a history archive to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use maplapse_common::config::AppConfig;
use maplapse_encode_engine::{EncodeProgress, EncodeStage, RecorderOptions, TimelapseRecorder};
use maplapse_history_model::{HistoryArchive, HistoryPlayback, HistoryQuery};
use maplapse_platform_ffmpeg::FfmpegPlatform;
use maplapse_render_engine::{FontdueLabelFont, LabelFont, LabelStyle, TileMapRenderer};

pub struct RenderArgs {
    pub history: PathBuf,
    pub kind: String,
    pub interval: String,
    pub start: Option<i32>,
    pub fps: Option<u32>,
    pub container: Option<String>,
    pub freeze: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub font: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

pub async fn run(args: RenderArgs, config: &AppConfig) -> anyhow::Result<()> {
    let archive = HistoryArchive::load(&args.history)
        .map_err(|e| anyhow::anyhow!("Failed to load history: {e}"))?;

    let mut query = HistoryQuery::new(args.kind.parse()?, args.interval.parse()?);
    if let Some(start) = args.start {
        query = query.starting_at(start);
    }

    let mut options = RecorderOptions::from_defaults(&config.timelapse, query.clone())?;
    if let Some(container) = &args.container {
        options.container = container.parse()?;
    }
    options.fps = args.fps.unwrap_or(options.fps);
    options.freeze_seconds = args.freeze.unwrap_or(options.freeze_seconds);
    options.width = args.width.unwrap_or(options.width);
    options.height = args.height.unwrap_or(options.height);

    let platform = match args.ffmpeg {
        Some(binary) => FfmpegPlatform::detect_with(binary).await?,
        None => FfmpegPlatform::detect().await?,
    };

    let font = load_font(args.font.or_else(|| config.label.resolve_font_path()));
    let style = LabelStyle::from_defaults(&config.label);

    println!("Rendering {}", args.history.display());
    println!("  Samples: {}", archive.len());
    println!(
        "  Query: {} / {}{}",
        query.kind.as_str(),
        query.interval.as_str(),
        query.start.map(|s| format!(" from day {s}")).unwrap_or_default()
    );

    let progress: Box<dyn Fn(EncodeProgress) + Send> = Box::new(|p| match p.stage {
        EncodeStage::Encoding | EncodeStage::Freezing => {
            print!(
                "\r  {:?}: {} frames, {:.2}s of video, {:.1}s elapsed  ",
                p.stage,
                p.frames_encoded,
                p.timestamp_us as f64 / 1_000_000.0,
                p.elapsed_secs,
            );
            let _ = std::io::stdout().flush();
        }
        EncodeStage::Finalizing => println!("\n  Finalizing..."),
        EncodeStage::Complete | EncodeStage::Failed => {}
    });

    let mut recorder = TimelapseRecorder::create(&platform, options, style, font)
        .await?
        .with_progress(progress);

    let negotiated = recorder.negotiated();
    println!(
        "  Codec: {} ({}), {}x{} @ {} fps, {} bps",
        negotiated.config.codec,
        recorder.options().container,
        negotiated.config.width,
        negotiated.config.height,
        negotiated.config.framerate,
        negotiated.config.bitrate
    );

    let stop = recorder.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Stopping after the current frame...");
            stop.stop();
        }
    });

    let (width, height) = (recorder.options().width, recorder.options().height);
    let mut renderer = TileMapRenderer::new(width, height);
    let mut source = HistoryPlayback::new(Arc::new(archive));
    let encoded = recorder.encode_timelapse(&mut source, &mut renderer).await;
    if let Err(e) = &encoded {
        println!("\n  Encode failed: {e}");
    }

    let finished = recorder.finish().await;
    ctrl_c.abort();

    let artifact = match (encoded, finished) {
        (Ok(()), Ok(artifact)) => artifact,
        (Err(e), Ok(artifact)) => {
            let path = write_artifact(&artifact, args.output.as_ref(), config, &query).await?;
            println!("  Partial video written: {}", path.display());
            return Err(e.into());
        }
        (Err(e), Err(finalize)) => {
            println!("  No video written: {finalize}");
            return Err(e.into());
        }
        (Ok(()), Err(e)) => {
            println!("\n  Finalize failed: {e}");
            return Err(e.into());
        }
    };

    let path = write_artifact(&artifact, args.output.as_ref(), config, &query).await?;
    println!(
        "Render complete: {} ({} frames, {} bytes)",
        path.display(),
        recorder.frames_encoded(),
        artifact.len()
    );
    Ok(())
}

fn load_font(path: Option<PathBuf>) -> Option<Arc<dyn LabelFont>> {
    let Some(path) = path else {
        tracing::warn!("No font found; date labels disabled");
        return None;
    };
    match FontdueLabelFont::load(&path) {
        Ok(font) => {
            tracing::debug!(path = %path.display(), "Loaded label font");
            Some(Arc::new(font))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load label font");
            None
        }
    }
}

async fn write_artifact(
    artifact: &maplapse_history_model::OutputArtifact,
    output: Option<&PathBuf>,
    config: &AppConfig,
    query: &HistoryQuery,
) -> anyhow::Result<PathBuf> {
    let path = match output {
        Some(path) => path.clone(),
        None => config.output_dir.join(artifact.suggested_file_name(query)),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &artifact.bytes).await?;
    tracing::info!(
        path = %path.display(),
        mime_type = artifact.mime_type,
        bytes = artifact.len(),
        "Video written"
    );
    Ok(path)
}
