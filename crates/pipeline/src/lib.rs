//! Generation job orchestration and video assembly.
//!
//! [`poller::JobPoller`] follows jobs on the job server to a terminal
//! state. Backends ([`backend::ComfyBackend`], [`hosted::HostedBackend`])
//! turn seed images into clips; [`long_clip`], [`transitions`] and
//! [`batch`] chain clips into scenes and scenes into a video, and
//! [`stitcher`] joins them into one file.

pub mod archive;
pub mod backend;
pub mod batch;
pub mod clock;
pub mod error;
pub mod fetch;
pub mod frames;
pub mod hosted;
pub mod long_clip;
pub mod motion;
pub mod poller;
pub mod reporter;
pub mod stitcher;
pub mod transitions;

pub use error::PipelineError;
