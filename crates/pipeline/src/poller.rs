//! Job poller: submit a graph, follow it through the queue, resolve its
//! terminal state and extract the artifact.
//!
//! Each submitted job is tracked by a [`JobTracker`] state machine:
//!
//! ```text
//! Queued <-> Running --(left queue)--> history check
//!                                       |-- artifact      -> Succeeded
//!                                       |-- backend error -> Failed
//!                                       '-- nothing yet   -> Ambiguous
//! Ambiguous --(grace delay, history re-check)--> Succeeded | Failed | Ambiguous
//! ```
//!
//! `Ambiguous` exists because the server can drop a job from its queue
//! before the outputs are durably recorded. It is retried a bounded number
//! of times before becoming `Failed`. Terminal states are cached: polling
//! a finished tracker performs no network calls.

use std::sync::Arc;
use std::time::Duration;

use reel_comfyui::history::{classify_history, ArtifactResult, BackendFailure, HistoryOutcome, JobKind};
use reel_comfyui::transport::{JobTransport, TransportError};
use reel_comfyui::workflow::Graph;
use reel_core::progress::{ProgressEstimator, ProgressSnapshot, DEFAULT_EXPECTED_VIDEO_DURATION};
use reel_core::types::{JobId, Timestamp};
use reel_events::bus::{JOB_FAILED, JOB_PROGRESS, JOB_SUBMITTED, JOB_SUCCEEDED};

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::reporter::ProgressReporter;

/// Default delay between queue polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_500);

/// History checks allowed after a job leaves the queue.
pub const DEFAULT_GRACE_ATTEMPTS: u32 = 5;

/// Delay between history checks inside the grace window.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(2);

/// Image jobs fail with a timeout after this many queue polls.
pub const DEFAULT_IMAGE_MAX_POLLS: u32 = 120;

/// Consecutive network failures tolerated inside one wait loop.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Tunables for [`JobPoller`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub grace_attempts: u32,
    pub grace_delay: Duration,
    pub image_max_polls: u32,
    pub max_consecutive_errors: u32,
    /// Heuristic runtime used for video progress estimates.
    pub expected_video_duration: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_attempts: DEFAULT_GRACE_ATTEMPTS,
            grace_delay: DEFAULT_GRACE_DELAY,
            image_max_polls: DEFAULT_IMAGE_MAX_POLLS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            expected_video_duration: DEFAULT_EXPECTED_VIDEO_DURATION,
        }
    }
}

// ---------------------------------------------------------------------------
// Job handle and state
// ---------------------------------------------------------------------------

/// One submitted unit of work.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: JobId,
    pub submitted_at: Timestamp,
    pub graph: Graph,
    pub kind: JobKind,
    /// Clock reading at submission, for elapsed-time progress.
    submitted_tick: Duration,
}

/// Why a job ended in [`JobState::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobFailure {
    /// The backend reported an execution error.
    Backend(BackendFailure),
    /// The grace window ran out without any history record.
    NoOutput,
    /// History was recorded but contained nothing extractable.
    NoArtifact,
    /// Bounded polling (image jobs) ran out of attempts.
    TimedOut { polls: u32 },
}

impl JobFailure {
    pub fn to_error(&self) -> PipelineError {
        match self {
            JobFailure::Backend(f) => PipelineError::BackendExecution {
                message: f.message.clone(),
                out_of_memory: f.out_of_memory,
            },
            JobFailure::NoOutput => PipelineError::NoArtifact("no output produced".to_string()),
            JobFailure::NoArtifact => PipelineError::NoArtifact(
                "the job completed but recorded no image or video; check that the \
                 output node (e.g. the video-combining node) is installed on the job server"
                    .to_string(),
            ),
            JobFailure::TimedOut { polls } => {
                PipelineError::Timeout(format!("image job still queued after {polls} polls"))
            }
        }
    }
}

/// Lifecycle of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded(ArtifactResult),
    Failed(JobFailure),
    /// Left the queue with no usable history yet; carries the raw history.
    Ambiguous(serde_json::Value),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded(_) | JobState::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded(_) => "succeeded",
            JobState::Failed(_) => "failed",
            JobState::Ambiguous(_) => "ambiguous",
        }
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Submits graphs and follows them to completion.
pub struct JobPoller {
    transport: Arc<dyn JobTransport>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    reporter: ProgressReporter,
}

impl JobPoller {
    pub fn new(transport: Arc<dyn JobTransport>, clock: Arc<dyn Clock>, config: PollerConfig) -> Self {
        Self {
            transport,
            clock,
            config,
            reporter: ProgressReporter::disabled(),
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn transport(&self) -> &Arc<dyn JobTransport> {
        &self.transport
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Queue a graph and return its handle in the `Queued` state.
    pub async fn submit(&self, graph: Graph, kind: JobKind) -> Result<JobHandle, PipelineError> {
        let submitted = self.transport.enqueue(&graph).await?;
        let job_id = JobId::from(submitted.prompt_id);
        tracing::info!(job_id = %job_id, ?kind, queue_number = submitted.number, "Job submitted");
        self.reporter.emit(
            JOB_SUBMITTED,
            None,
            serde_json::json!({ "job_id": job_id, "kind": kind }),
        );
        Ok(JobHandle {
            job_id,
            submitted_at: chrono::Utc::now(),
            graph,
            kind,
            submitted_tick: self.clock.now(),
        })
    }

    /// Start tracking a submitted job.
    pub fn track(&self, handle: JobHandle) -> JobTracker<'_> {
        JobTracker {
            poller: self,
            handle,
            state: JobState::Queued,
            grace_used: 0,
            polls: 0,
            scene_index: None,
        }
    }

    /// Submit, wait, and return the extracted artifact.
    pub async fn run(
        &self,
        graph: Graph,
        kind: JobKind,
        scene_index: Option<usize>,
    ) -> Result<(JobId, ArtifactResult), PipelineError> {
        let handle = self.submit(graph, kind).await?;
        let job_id = handle.job_id.clone();
        let mut tracker = self.track(handle);
        tracker.scene_index = scene_index;
        let artifact = tracker.wait().await?;
        Ok((job_id, artifact))
    }
}

/// State machine for one submitted job.
pub struct JobTracker<'a> {
    poller: &'a JobPoller,
    handle: JobHandle,
    state: JobState,
    grace_used: u32,
    polls: u32,
    scene_index: Option<usize>,
}

impl JobTracker<'_> {
    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    /// History checks spent since the job left the queue.
    pub fn grace_attempts_used(&self) -> u32 {
        self.grace_used
    }

    /// Queue polls performed so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Sampled progress for the job.
    ///
    /// Only video jobs get a time-based estimate; the server exposes no
    /// progress signal for them.
    pub fn current_progress(&self) -> ProgressSnapshot {
        let elapsed = self
            .poller
            .clock
            .now()
            .saturating_sub(self.handle.submitted_tick);
        match (&self.state, self.handle.kind) {
            (JobState::Succeeded(_), _) => ProgressSnapshot::complete(elapsed),
            (_, JobKind::Video) => {
                ProgressEstimator::new(self.poller.config.expected_video_duration).estimate(elapsed)
            }
            (_, JobKind::Image) => ProgressSnapshot {
                elapsed,
                ..ProgressSnapshot::not_started()
            },
        }
    }

    /// Advance the state machine by one step.
    ///
    /// Terminal states are returned as-is without contacting the server.
    /// In `Ambiguous`, waits one grace delay and re-fetches history.
    pub async fn poll_once(&mut self) -> Result<&JobState, PipelineError> {
        if self.state.is_terminal() {
            return Ok(&self.state);
        }
        if matches!(self.state, JobState::Ambiguous(_)) {
            self.poller.clock.sleep(self.poller.config.grace_delay).await;
            self.check_history().await?;
            return Ok(&self.state);
        }

        let queue = self.poller.transport.queue().await?;
        self.polls += 1;
        let id = self.handle.job_id.as_str();
        if queue.is_running(id) {
            self.state = JobState::Running;
        } else if queue.is_pending(id) {
            self.state = JobState::Queued;
        } else {
            tracing::debug!(job_id = %self.handle.job_id, "Job left the queue, checking history");
            self.check_history().await?;
        }
        Ok(&self.state)
    }

    async fn check_history(&mut self) -> Result<(), PipelineError> {
        self.grace_used += 1;
        let id = self.handle.job_id.as_str();
        let raw = self.poller.transport.history(id).await?;
        let outcome = classify_history(&raw, id, self.handle.kind)
            .map_err(|e| TransportError::Parse(format!("history for {id}: {e}")))?;
        let exhausted = self.grace_used >= self.poller.config.grace_attempts.max(1);

        self.state = match outcome {
            HistoryOutcome::Succeeded(artifact) => JobState::Succeeded(artifact),
            HistoryOutcome::Failed(failure) => JobState::Failed(JobFailure::Backend(failure)),
            HistoryOutcome::Empty if exhausted => JobState::Failed(JobFailure::NoArtifact),
            HistoryOutcome::NotRecorded if exhausted => JobState::Failed(JobFailure::NoOutput),
            HistoryOutcome::Empty | HistoryOutcome::NotRecorded => {
                tracing::debug!(
                    job_id = %self.handle.job_id,
                    attempt = self.grace_used,
                    max_attempts = self.poller.config.grace_attempts,
                    "No output recorded yet, retrying within grace window",
                );
                JobState::Ambiguous(raw)
            }
        };
        Ok(())
    }

    /// Poll until the job reaches a terminal state.
    ///
    /// Video jobs have no wall-clock limit; image jobs fail after
    /// `image_max_polls` queue polls.
    pub async fn wait(mut self) -> Result<ArtifactResult, PipelineError> {
        let config = self.poller.config.clone();
        let mut consecutive_errors = 0u32;

        loop {
            let state = match self.poll_once().await {
                Ok(state) => {
                    consecutive_errors = 0;
                    state.clone()
                }
                Err(PipelineError::Transport(e))
                    if is_transient(&e) && consecutive_errors < config.max_consecutive_errors =>
                {
                    consecutive_errors += 1;
                    tracing::warn!(
                        job_id = %self.handle.job_id,
                        attempt = consecutive_errors,
                        error = %e,
                        "Poll request failed, retrying",
                    );
                    self.poller.clock.sleep(config.poll_interval).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match state {
                JobState::Succeeded(artifact) => {
                    tracing::info!(job_id = %self.handle.job_id, polls = self.polls, "Job succeeded");
                    self.poller.reporter.emit(
                        JOB_SUCCEEDED,
                        self.scene_index,
                        serde_json::json!({ "job_id": self.handle.job_id, "percent": 100.0 }),
                    );
                    return Ok(artifact);
                }
                JobState::Failed(failure) => return Err(self.fail(&failure)),
                JobState::Ambiguous(_) => continue,
                JobState::Queued | JobState::Running => {
                    if self.handle.kind == JobKind::Image && self.polls >= config.image_max_polls {
                        let failure = JobFailure::TimedOut { polls: self.polls };
                        self.state = JobState::Failed(failure.clone());
                        return Err(self.fail(&failure));
                    }
                    if self.handle.kind == JobKind::Video {
                        let snapshot = self.current_progress();
                        self.poller.reporter.emit(
                            JOB_PROGRESS,
                            self.scene_index,
                            serde_json::json!({
                                "job_id": self.handle.job_id,
                                "state": self.state.label(),
                                "progress": snapshot,
                            }),
                        );
                    }
                    self.poller.clock.sleep(config.poll_interval).await;
                }
            }
        }
    }

    fn fail(&self, failure: &JobFailure) -> PipelineError {
        let err = failure.to_error();
        tracing::error!(job_id = %self.handle.job_id, error = %err, "Job failed");
        self.poller.reporter.emit(
            JOB_FAILED,
            self.scene_index,
            serde_json::json!({ "job_id": self.handle.job_id, "error": err.to_string() }),
        );
        err
    }
}

fn is_transient(err: &TransportError) -> bool {
    matches!(err, TransportError::Timeout(_) | TransportError::Request(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages() {
        let oom = JobFailure::Backend(BackendFailure {
            message: "The GPU ran out of memory. Reduce the frame count or resolution and try again."
                .to_string(),
            out_of_memory: true,
        });
        assert!(oom.to_error().to_string().contains("Reduce the frame count"));
        assert_eq!(
            JobFailure::NoOutput.to_error().to_string(),
            "Job finished without a usable output: no output produced"
        );
        assert!(matches!(
            JobFailure::TimedOut { polls: 120 }.to_error(),
            PipelineError::Timeout(_)
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Failed(JobFailure::NoOutput).is_terminal());
        assert!(!JobState::Ambiguous(serde_json::Value::Null).is_terminal());
        assert_eq!(JobState::Running.label(), "running");
    }

    #[test]
    fn default_config_matches_constants() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.grace_attempts, 5);
        assert_eq!(config.expected_video_duration, Duration::from_secs(180));
    }
}
