//! Progress event stream for pipeline runs.
//!
//! Pipelines publish [`bus::PipelineEvent`]s; callers subscribe and drop
//! their receiver to unsubscribe.

pub mod bus;

pub use bus::{EventBus, PipelineEvent};
