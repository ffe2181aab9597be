//! Stitching and frame extraction against the real ffmpeg binary.
//!
//! Every test returns early when ffmpeg is not installed.

mod common;

use std::path::Path;

use assert_matches::assert_matches;

use reel_core::clip::{Clip, MediaRef, StitchJob};
use reel_core::ffmpeg;
use reel_pipeline::frames::{FfmpegFrameExtractor, FrameExtractor};
use reel_pipeline::stitcher::{ClipStitcher, StitchError};

use common::{ffmpeg_available, render_clip, render_tone};

async fn clip(dir: &Path, name: &str, width: u32, height: u32, seconds: f32) -> Clip {
    let path = dir.join(name);
    render_clip(&path, width, height, seconds, false).await;
    let bytes = tokio::fs::read(&path).await.unwrap();
    Clip::scene(MediaRef::data("video/mp4", bytes), 0)
}

async fn probe(bytes: &[u8]) -> ffmpeg::FfprobeOutput {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    tokio::fs::write(&path, bytes).await.unwrap();
    ffmpeg::probe_video(&path).await.unwrap()
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn clips_are_concatenated_in_order() {
    if !ffmpeg_available("clips_are_concatenated_in_order").await {
        return;
    }
    let src = tempfile::tempdir().unwrap();
    let clips = vec![
        clip(src.path(), "a.mp4", 128, 96, 1.0).await,
        clip(src.path(), "b.mp4", 128, 96, 1.0).await,
        clip(src.path(), "c.mp4", 128, 96, 1.0).await,
    ];

    let output = ClipStitcher::new().stitch_clips(clips, "final.mp4").await.unwrap();

    assert_eq!(output.filename, "final.mp4");
    assert_eq!(output.mime_type, "video/mp4");
    let duration = ffmpeg::parse_duration(&probe(&output.bytes).await);
    assert!((duration - 3.0).abs() < 0.3, "stitched duration {duration}");
}

#[tokio::test]
async fn mismatched_resolution_is_unsupported() {
    if !ffmpeg_available("mismatched_resolution_is_unsupported").await {
        return;
    }
    let src = tempfile::tempdir().unwrap();
    let clips = vec![
        clip(src.path(), "wide.mp4", 128, 96, 1.0).await,
        clip(src.path(), "square.mp4", 96, 96, 1.0).await,
    ];

    let err = ClipStitcher::new().stitch_clips(clips, "final.mp4").await.unwrap_err();

    assert_matches!(err, StitchError::UnsupportedInput(msg) if msg.contains("clip 1"));
}

#[tokio::test]
async fn soundtrack_is_muxed_into_the_output() {
    if !ffmpeg_available("soundtrack_is_muxed_into_the_output").await {
        return;
    }
    let src = tempfile::tempdir().unwrap();
    let tone = src.path().join("tone.wav");
    render_tone(&tone, 2.0).await;
    let job = StitchJob::new(
        vec![
            clip(src.path(), "a.mp4", 128, 96, 1.0).await,
            clip(src.path(), "b.mp4", 128, 96, 1.0).await,
        ],
        "with_audio.mp4",
    )
    .unwrap()
    .with_audio(MediaRef::data("audio/wav", tokio::fs::read(&tone).await.unwrap()));

    let output = ClipStitcher::new().stitch(&job).await.unwrap();

    let probed = probe(&output.bytes).await;
    let kinds: Vec<_> = probed
        .streams
        .iter()
        .filter_map(|s| s.codec_type.as_deref())
        .collect();
    assert!(kinds.contains(&"video"), "{kinds:?}");
    assert!(kinds.contains(&"audio"), "{kinds:?}");
}

#[tokio::test]
async fn working_files_are_removed_after_success_and_failure() {
    if !ffmpeg_available("working_files_are_removed_after_success_and_failure").await {
        return;
    }
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let stitcher = ClipStitcher::new().with_scratch_root(scratch.path());

    let same = vec![
        clip(src.path(), "a.mp4", 128, 96, 1.0).await,
        clip(src.path(), "b.mp4", 128, 96, 1.0).await,
    ];
    stitcher.stitch_clips(same, "ok.mp4").await.unwrap();
    assert!(is_empty_dir(scratch.path()));

    let mixed = vec![
        clip(src.path(), "c.mp4", 128, 96, 1.0).await,
        clip(src.path(), "d.mp4", 96, 96, 1.0).await,
    ];
    stitcher.stitch_clips(mixed, "bad.mp4").await.unwrap_err();
    assert!(is_empty_dir(scratch.path()));
}

#[tokio::test]
async fn last_frame_is_a_png_of_the_clip_size() {
    if !ffmpeg_available("last_frame_is_a_png_of_the_clip_size").await {
        return;
    }
    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("clip.mp4");
    render_clip(&path, 128, 96, 1.0, false).await;

    let frame = FfmpegFrameExtractor
        .extract_last_frame(&tokio::fs::read(&path).await.unwrap())
        .await
        .unwrap();

    let decoded = image::load_from_memory_with_format(&frame, image::ImageFormat::Png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (128, 96));
}
