//! Domain logic for the lyric-video generation pipeline.
//!
//! Everything here is either pure (settings, planning, motion decisions,
//! timeline layout, progress estimation, naming) or a thin wrapper over the
//! `ffmpeg`/`ffprobe` binaries. Network-facing code lives in
//! `reel-comfyui` and `reel-pipeline`.

pub mod clip;
pub mod clip_plan;
pub mod error;
pub mod ffmpeg;
pub mod motion;
pub mod naming;
pub mod progress;
pub mod scene;
pub mod settings;
pub mod types;
