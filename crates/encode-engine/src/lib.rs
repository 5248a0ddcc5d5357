//! Maplapse Encode Engine
//!
//! Drives a history query through compositing, encoding, and muxing.
//!
//! ```text
//! negotiate ──▶ EncoderConfig
//!                    │
//! FrameSource ──▶ FrameCompositor ──▶ EncoderSession ──(output callback)──▶ PacketSink
//!      ▲                                   │ flush per frame                    │
//!      └──────────── next frame ◀──────────┘                      writer task ──▶ ContainerMuxer
//!                                                                                  │
//!                                              finish ──▶ finalize ──▶ OutputArtifact
//! ```

pub mod negotiate;
pub mod output;
pub mod recorder;
pub mod session;

pub use negotiate::{candidates, compute_bitrate, negotiate, CodecCandidate, NegotiatedCodec, MAX_BITRATE};
pub use output::{OutputSink, PacketSink};
pub use recorder::{
    align_even, EncodeProgress, EncodeStage, ProgressCallback, RecorderOptions, RecorderState,
    StopHandle, TimelapseRecorder,
};
pub use session::{EncoderSession, ErrorLatch};
