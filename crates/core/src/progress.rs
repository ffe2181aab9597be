//! Wall-clock progress estimation for video jobs.
//!
//! The job server exposes no progress signal for long video jobs, so
//! progress is modelled as elapsed time over a fixed expected duration,
//! capped at 95% until the job actually succeeds.

use std::time::Duration;

use serde::Serialize;

/// Heuristic expected runtime of a video job.
pub const DEFAULT_EXPECTED_VIDEO_DURATION: Duration = Duration::from_secs(180);

/// Progress never exceeds this value before success.
pub const MAX_ESTIMATED_PERCENT: f64 = 95.0;

/// Remaining time is only reported above this value.
pub const MIN_ETA_PERCENT: f64 = 5.0;

/// One sampled progress reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// 0-100.
    pub percent: f64,
    pub elapsed: Duration,
    /// Only present while `percent` is strictly inside (5, 95).
    pub remaining: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn complete(elapsed: Duration) -> Self {
        Self {
            percent: 100.0,
            elapsed,
            remaining: Some(Duration::ZERO),
        }
    }

    pub fn not_started() -> Self {
        Self {
            percent: 0.0,
            elapsed: Duration::ZERO,
            remaining: None,
        }
    }
}

/// Time-based progress model.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEstimator {
    expected_total: Duration,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_EXPECTED_VIDEO_DURATION)
    }
}

impl ProgressEstimator {
    pub fn new(expected_total: Duration) -> Self {
        Self { expected_total }
    }

    pub fn expected_total(&self) -> Duration {
        self.expected_total
    }

    /// Estimate progress after `elapsed` wall-clock time.
    pub fn estimate(&self, elapsed: Duration) -> ProgressSnapshot {
        let expected = self.expected_total.as_secs_f64();
        let percent = if expected > 0.0 {
            (elapsed.as_secs_f64() / expected * 100.0).min(MAX_ESTIMATED_PERCENT)
        } else {
            MAX_ESTIMATED_PERCENT
        };

        let remaining = if percent > MIN_ETA_PERCENT && percent < MAX_ESTIMATED_PERCENT {
            let total = elapsed.as_secs_f64() * 100.0 / percent;
            Some(Duration::from_secs_f64(
                (total - elapsed.as_secs_f64()).max(0.0),
            ))
        } else {
            None
        };

        ProgressSnapshot {
            percent,
            elapsed,
            remaining,
        }
    }
}
