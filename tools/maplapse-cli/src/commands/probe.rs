//! Probe codec support on this machine.

use std::path::PathBuf;

use maplapse_encode_engine::{align_even, negotiate};
use maplapse_history_model::Container;
use maplapse_platform_ffmpeg::FfmpegPlatform;

pub async fn run(width: u32, height: u32, fps: u32, ffmpeg: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Maplapse Codec Probe");
    println!("{}", "=".repeat(50));

    let detected = match ffmpeg {
        Some(binary) => FfmpegPlatform::detect_with(binary).await,
        None => FfmpegPlatform::detect().await,
    };
    let platform = match detected {
        Ok(platform) => platform,
        Err(e) => {
            println!("[FAIL] {e}");
            println!();
            println!("Install ffmpeg with libx264 or libvpx to render timelapses.");
            return Ok(());
        }
    };

    let capabilities = platform.capabilities();
    println!(
        "[OK] Platform: {} ({})",
        capabilities.name,
        platform.binary().display()
    );
    if capabilities.codecs.is_empty() {
        println!("[WARN] No libx264 or libvpx encoders found");
    } else {
        println!("     Codecs: {}", capabilities.codecs.join(", "));
    }

    let (width, height) = (align_even(width), align_even(height));
    println!();
    println!("Negotiating at {width}x{height} @ {fps} fps:");
    let mut any = false;
    for container in Container::ALL {
        match negotiate(&platform, container, width, height, fps).await {
            Ok(negotiated) => {
                any = true;
                println!(
                    "[OK]   {container}: {} (muxed as {}, {} bps)",
                    negotiated.config.codec, negotiated.mux_codec, negotiated.config.bitrate
                );
            }
            Err(e) => println!("[FAIL] {container}: {e}"),
        }
    }

    println!();
    if any {
        println!("At least one container is available. Maplapse is ready.");
    } else {
        println!("No container can be encoded on this machine.");
    }
    Ok(())
}
