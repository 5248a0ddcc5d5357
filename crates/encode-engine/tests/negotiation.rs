mod support;

use maplapse_common::MaplapseError;
use maplapse_history_model::{BitrateMode, Container, MuxCodec};
use maplapse_encode_engine::negotiate;
use support::FakePlatform;

#[tokio::test]
async fn second_candidate_is_committed_and_nothing_after_it_is_probed() {
    let platform = FakePlatform::supporting(&["vp8"]);
    let negotiated = negotiate(&platform, Container::Webm, 640, 360, 8).await.unwrap();
    assert_eq!(negotiated.mux_codec, MuxCodec::Vp8);
    assert_eq!(negotiated.config.codec, "vp8");
    assert_eq!(platform.probes(), vec!["vp09.00.10.08", "vp8"]);
}

#[tokio::test]
async fn first_supported_candidate_wins() {
    let platform = FakePlatform::supporting(&["vp09.00.10.08", "vp8"]);
    let negotiated = negotiate(&platform, Container::Webm, 640, 360, 8).await.unwrap();
    assert_eq!(negotiated.mux_codec, MuxCodec::Vp9);
    assert_eq!(platform.probes(), vec!["vp09.00.10.08"]);
}

#[tokio::test]
async fn committed_config_carries_probe_parameters() {
    let platform = FakePlatform::supporting(&["avc1.640028"]);
    let negotiated = negotiate(&platform, Container::Mp4, 1280, 720, 24).await.unwrap();
    let config = negotiated.config;
    assert_eq!((config.width, config.height, config.framerate), (1280, 720, 24));
    assert_eq!(config.bitrate, 2_764_800);
    assert_eq!(config.bitrate_mode, BitrateMode::Variable);
    assert_eq!(negotiated.mux_codec, MuxCodec::Avc);
}

#[tokio::test]
async fn no_supported_candidate_is_a_negotiation_failure() {
    let platform = FakePlatform::supporting(&["vp8"]);
    let err = negotiate(&platform, Container::Mp4, 640, 360, 8).await.unwrap_err();
    assert!(matches!(err, MaplapseError::Negotiation { .. }));
    assert!(err.is_fatal_pipeline_error());
    assert_eq!(platform.probes(), vec!["avc1.640028"]);
}
