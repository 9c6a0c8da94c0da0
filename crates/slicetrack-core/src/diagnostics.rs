//! Propagation diagnostics: timing and counts for every slice transition.
//!
//! These are collected alongside every propagation run for threshold
//! tuning: how many components each slice produced, how many were kept,
//! and how long segmentation and the overlap tests took.
//!
//! Time is read through the [`Clock`] trait so the core never touches a
//! platform clock itself. Durations are serialized as fractional seconds
//! (`f64`) since `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::propagate::{Direction, Pass};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for diagnostics.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// Current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// A [`Clock`] that records every duration as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl Clock for NoClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, (): &()) -> Duration {
        Duration::ZERO
    }
}

/// Metrics for one slice transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDiagnostics {
    /// Which pass the step belongs to.
    pub pass: Pass,
    /// Sweep direction.
    pub direction: Direction,
    /// Slice whose tracked regions seeded the step.
    pub source: u32,
    /// Slice that was segmented.
    pub target: u32,
    /// Wall-clock duration of the step (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Components produced by segmentation after the area filter.
    pub candidates: usize,
    /// Components that overlapped the source slice and were kept.
    pub retained: usize,
    /// Pixel area registered as positive on the target slice.
    pub positive_area: u64,
    /// Pixel area registered as negative on the target slice.
    pub negative_area: u64,
}

/// High-level summary of a propagation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationSummary {
    /// Stack depth.
    pub depth: u32,
    /// Slice the seed was placed on.
    pub seed_slice: u32,
    /// Slices that ended with at least one region.
    pub tracked_slices: usize,
    /// Total regions registered, including the seed.
    pub regions: usize,
    /// Sweeps that stopped on a segmentation error.
    pub failed_sweeps: usize,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

/// Diagnostics collected from a single propagation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationDiagnostics {
    /// Every slice transition, in execution order.
    pub steps: Vec<StepDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts.
    pub summary: PropagationSummary,
}

impl PropagationDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Propagation Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Stack depth: {}  |  Seed slice: {}",
            self.summary.depth, self.summary.seed_slice,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<8} {:<9} {:>11} {:>10} {:>6} {:>6} {:>8} {:>8}",
            "Pass", "Direction", "Slice", "Duration", "Cands", "Kept", "+Area", "-Area",
        ));
        lines.push("-".repeat(80));

        for step in &self.steps {
            let transition = format!("{}->{}", step.source, step.target);
            lines.push(format!(
                "{:<8} {:<9} {transition:>11} {:>8.3}ms {:>6} {:>6} {:>8} {:>8}",
                step.pass.label(),
                step.direction.label(),
                duration_ms(step.duration),
                step.candidates,
                step.retained,
                step.positive_area,
                step.negative_area,
            ));
        }

        lines.push(String::new());
        lines.push(format!(
            "Tracked slices: {}  |  Regions: {}  |  Failed sweeps: {}{}",
            self.summary.tracked_slices,
            self.summary.regions,
            self.summary.failed_sweeps,
            if self.summary.cancelled {
                "  |  CANCELLED"
            } else {
                ""
            },
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
