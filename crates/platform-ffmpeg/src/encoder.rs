//! ffmpeg subprocess encoder.
//!
//! Raw RGBA frames are written to ffmpeg's stdin. ffmpeg writes VP8/VP9 as
//! IVF and H.264 as FLV to stdout; both frame every packet individually. A
//! reader task parses the stream and hands each packet to the output
//! callback, stamped with the timing of the oldest frame still waiting for
//! output. Encoders are configured without lookahead or reordering, so
//! exactly one packet comes back per input frame, in order.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use maplapse_common::{FrameTick, MaplapseError, MaplapseResult, KEYFRAME_INTERVAL};
use maplapse_history_model::EncoderConfig;
use maplapse_platform_core::{EncodedChunk, EncoderCallbacks, RgbaImage, VideoEncoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::flv::{length_prefixed_to_annex_b, nal_length_size, AvcTag, FlvReader};
use crate::ivf::{is_vp8_keyframe, is_vp9_keyframe, IvfReader};

/// Encoders driven through ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegCodec {
    H264,
    Vp9,
    Vp8,
}

impl FfmpegCodec {
    pub const ALL: [FfmpegCodec; 3] = [Self::H264, Self::Vp9, Self::Vp8];

    /// Map a codec string (`avc1.*`, `vp09.*`, `vp8`) to an encoder.
    pub fn from_codec_string(codec: &str) -> Option<Self> {
        if codec.starts_with("avc1.") || codec == "h264" {
            Some(Self::H264)
        } else if codec.starts_with("vp09.") || codec == "vp9" {
            Some(Self::Vp9)
        } else if codec == "vp8" {
            Some(Self::Vp8)
        } else {
            None
        }
    }

    /// ffmpeg encoder name.
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Vp9 => "libvpx-vp9",
            Self::Vp8 => "libvpx",
        }
    }

    /// Codec-string pattern reported in platform capabilities.
    pub fn codec_pattern(&self) -> &'static str {
        match self {
            Self::H264 => "avc1.*",
            Self::Vp9 => "vp09.*",
            Self::Vp8 => "vp8",
        }
    }

    /// Container ffmpeg writes to the pipe.
    pub fn stream_format(&self) -> &'static str {
        match self {
            Self::H264 => "flv",
            Self::Vp9 | Self::Vp8 => "ivf",
        }
    }
}

/// `-force_key_frames` expression matching the frame clock's keyframe hints.
///
/// ffmpeg numbers frames from 0; hints fall on every `KEYFRAME_INTERVAL`-th
/// frame counted from 1.
pub fn keyframe_expr() -> String {
    format!("expr:eq(mod(n+1,{KEYFRAME_INTERVAL}),0)")
}

/// ffmpeg arguments for a realtime, one-packet-per-frame encode.
pub fn encoder_args(codec: FfmpegCodec, config: &EncoderConfig) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("{}x{}", config.width, config.height));
    args.push("-r".into());
    args.push(config.framerate.to_string());
    args.extend(["-i", "pipe:0", "-an", "-c:v"].map(String::from));
    args.push(codec.ffmpeg_encoder().into());
    args.push("-b:v".into());
    args.push(config.bitrate.to_string());
    match codec {
        FfmpegCodec::H264 => args.extend(
            [
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "high",
                "-bf",
                "0",
                "-forced-idr",
                "1",
            ]
            .map(String::from),
        ),
        FfmpegCodec::Vp9 | FfmpegCodec::Vp8 => args.extend(
            [
                "-deadline",
                "realtime",
                "-cpu-used",
                "5",
                "-lag-in-frames",
                "0",
                "-auto-alt-ref",
                "0",
            ]
            .map(String::from),
        ),
    }
    args.push("-g".into());
    args.push(KEYFRAME_INTERVAL.to_string());
    args.push("-force_key_frames".into());
    args.push(keyframe_expr());
    args.extend(["-pix_fmt", "yuv420p", "-flush_packets", "1"].map(String::from));
    if codec == FfmpegCodec::H264 {
        args.extend(["-flvflags", "no_duration_filesize"].map(String::from));
    }
    args.extend(["-f", codec.stream_format(), "pipe:1"].map(String::from));
    args
}

/// Command for an encoder child.
///
/// On unix the child gets its own process group, so a terminal Ctrl-C
/// reaches only this process and encodes stop cooperatively.
pub fn encoder_command(binary: &Path, args: &[String]) -> Command {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// A running ffmpeg encode.
pub struct FfmpegEncoder {
    codec: FfmpegCodec,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pending: Arc<Mutex<VecDeque<FrameTick>>>,
    submitted: u64,
    delivered: watch::Receiver<u64>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
    closed: bool,
}

impl FfmpegEncoder {
    pub async fn spawn(
        binary: &Path,
        codec: FfmpegCodec,
        config: &EncoderConfig,
        callbacks: EncoderCallbacks,
    ) -> MaplapseResult<Self> {
        let args = encoder_args(codec, config);
        tracing::debug!(binary = %binary.display(), ?args, "Spawning ffmpeg encoder");
        let mut child = encoder_command(binary, &args)
            .spawn()
            .map_err(|e| MaplapseError::platform(format!("Failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MaplapseError::platform("Failed to capture ffmpeg stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MaplapseError::platform("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MaplapseError::platform("Failed to capture ffmpeg stderr"))?;

        tracing::info!(
            pid = ?child.id(),
            encoder = codec.ffmpeg_encoder(),
            width = config.width,
            height = config.height,
            "ffmpeg encoder started"
        );

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let (delivered_tx, delivered_rx) = watch::channel(0u64);
        let reader = tokio::spawn(read_packets(
            stdout,
            codec,
            Arc::clone(&pending),
            delivered_tx,
            callbacks,
        ));

        Ok(Self {
            codec,
            width: config.width,
            height: config.height,
            child: Some(child),
            stdin: Some(stdin),
            pending,
            submitted: 0,
            delivered: delivered_rx,
            reader: Some(reader),
            stderr: Some(stderr_task),
            closed: false,
        })
    }

    pub fn codec(&self) -> FfmpegCodec {
        self.codec
    }

    /// Stop ffmpeg and collect what it wrote to stderr.
    async fn terminate_with_stderr(&mut self) -> String {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
        }
        match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default().trim().to_string(),
            None => String::new(),
        }
    }
}

#[async_trait::async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(&mut self, frame: &RgbaImage, tick: FrameTick) -> MaplapseResult<()> {
        if self.closed {
            return Err(MaplapseError::encoder("encode called on a closed encoder"));
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(MaplapseError::encoder(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MaplapseError::encoder("ffmpeg stdin already closed"))?;

        // ffmpeg forces keyframes by its own frame number, which only tracks
        // the hints while ticks arrive in sequence.
        if tick.index != self.submitted + 1 {
            tracing::warn!(
                index = tick.index,
                expected = self.submitted + 1,
                "Frame tick out of sequence; keyframes may not follow hints"
            );
        }
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(tick);
        stdin
            .write_all(frame.as_raw())
            .await
            .map_err(|e| MaplapseError::encoder(format!("Failed to write frame to ffmpeg: {e}")))?;
        self.submitted += 1;
        Ok(())
    }

    async fn flush(&mut self) -> MaplapseResult<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            stdin
                .flush()
                .await
                .map_err(|e| MaplapseError::encoder(format!("Failed to flush ffmpeg stdin: {e}")))?;
        }
        let target = self.submitted;
        if self.delivered.wait_for(|n| *n >= target).await.is_err() {
            let stderr = self.terminate_with_stderr().await;
            return Err(MaplapseError::encoder(format!(
                "ffmpeg stopped after {} of {} frames: {}",
                *self.delivered.borrow(),
                target,
                stderr
            )));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stdin = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
        }
        tracing::debug!(frames = self.submitted, "ffmpeg encoder closed");
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// One encoded frame read back from ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamPacket {
    data: Vec<u8>,
    is_keyframe: bool,
    decoder_config: Option<Vec<u8>>,
}

/// ffmpeg's framed output, by codec.
enum PacketStream<R> {
    Ivf {
        reader: IvfReader<R>,
        codec: FfmpegCodec,
    },
    Flv {
        reader: FlvReader<R>,
        config: Option<Vec<u8>>,
        length_size: usize,
        config_sent: bool,
    },
}

impl<R: tokio::io::AsyncRead + Unpin> PacketStream<R> {
    async fn open(inner: R, codec: FfmpegCodec) -> MaplapseResult<Self> {
        match codec {
            FfmpegCodec::H264 => {
                let mut reader = FlvReader::new(inner);
                reader.read_header().await?;
                Ok(Self::Flv {
                    reader,
                    config: None,
                    length_size: 4,
                    config_sent: false,
                })
            }
            FfmpegCodec::Vp9 | FfmpegCodec::Vp8 => {
                let mut reader = IvfReader::new(inner);
                reader.read_header().await?;
                Ok(Self::Ivf { reader, codec })
            }
        }
    }

    async fn next(&mut self) -> MaplapseResult<Option<StreamPacket>> {
        match self {
            Self::Ivf { reader, codec } => {
                let Some((_, data)) = reader.next_frame().await? else {
                    return Ok(None);
                };
                let is_keyframe = match codec {
                    FfmpegCodec::Vp9 => is_vp9_keyframe(&data),
                    _ => is_vp8_keyframe(&data),
                };
                Ok(Some(StreamPacket {
                    data,
                    is_keyframe,
                    decoder_config: None,
                }))
            }
            Self::Flv {
                reader,
                config,
                length_size,
                config_sent,
            } => loop {
                match reader.next_video_tag().await? {
                    None => return Ok(None),
                    Some(AvcTag::SequenceHeader(avcc)) => {
                        *length_size = nal_length_size(&avcc)?;
                        *config = Some(avcc);
                        *config_sent = false;
                    }
                    Some(AvcTag::EndOfSequence) => {}
                    Some(AvcTag::Frame { keyframe, data }) => {
                        let data = length_prefixed_to_annex_b(&data, *length_size)?;
                        let decoder_config = if *config_sent {
                            None
                        } else {
                            *config_sent = true;
                            config.clone()
                        };
                        return Ok(Some(StreamPacket {
                            data,
                            is_keyframe: keyframe,
                            decoder_config,
                        }));
                    }
                }
            },
        }
    }
}

async fn read_packets(
    stdout: ChildStdout,
    codec: FfmpegCodec,
    pending: Arc<Mutex<VecDeque<FrameTick>>>,
    delivered: watch::Sender<u64>,
    callbacks: EncoderCallbacks,
) {
    let mut stream = match PacketStream::open(stdout, codec).await {
        Ok(stream) => stream,
        Err(e) => {
            (callbacks.error)(e.to_string());
            return;
        }
    };

    loop {
        let packet = match stream.next().await {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(e) => {
                (callbacks.error)(e.to_string());
                return;
            }
        };
        let tick = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(tick) = tick else {
            (callbacks.error)("ffmpeg produced a packet with no matching input frame".into());
            return;
        };
        let chunk = EncodedChunk {
            data: packet.data,
            timestamp_us: tick.timestamp_us,
            duration_us: tick.duration_us,
            is_keyframe: packet.is_keyframe,
            decoder_config: packet.decoder_config,
        };
        (callbacks.output)(chunk);
        delivered.send_modify(|n| *n += 1);
    }
    tracing::debug!(delivered = *delivered.borrow(), "ffmpeg output closed");
}
