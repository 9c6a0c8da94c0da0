//! Propagation engine: carry a seed region through the stack slice by slice.
//!
//! Each direction is a small state machine over the slice index. A
//! transition from slice `s` to its neighbour `t` segments `t`, keeps every
//! candidate that overlaps a region tracked on `s`, classifies the kept
//! candidates, and registers at most two unions on `t` (positive first,
//! then negative). A sweep stops at the stack boundary, when `s` has
//! nothing tracked, on a segmentation failure, or on cancellation.
//!
//! A failure only ends its own sweep. Slices finalized before it stay in
//! the registry and the result is flagged [`incomplete`].
//!
//! [`incomplete`]: PropagationResult::incomplete

use geo::MultiPolygon;
use rstar::RTree;
use rstar::primitives::{GeomWithData, Rectangle};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::classify::classify;
use crate::diagnostics::{
    Clock, NoClock, PropagationDiagnostics, PropagationSummary, StepDiagnostics,
};
use crate::geometry;
use crate::region::{Region, Sign};
use crate::segment::{Segmenter, SegmenterKind, segment_slice, select_component_at};
use crate::stack::ImageStack;
use crate::store::{RegionStore, TrackedRegistry};
use crate::types::{Band, TrackerConfig, TrackerError};

/// Which sweeps a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PropagationOrder {
    /// Forward from the seed to the last slice, then backward from the
    /// seed to the first.
    #[default]
    SeedOutward,
    /// [`SeedOutward`](Self::SeedOutward), followed by a full forward pass
    /// and a full backward pass that add regions reachable only from the
    /// other side. Refine passes never add a region overlapping one already
    /// tracked on the same slice, and never touch the seed slice.
    SeedOutwardThenRefine,
}

/// Sweep direction through the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Towards higher slice indices.
    Forward,
    /// Towards lower slice indices.
    Backward,
}

impl Direction {
    /// The neighbour of `slice` in this direction, if it is inside
    /// `1..=depth`.
    #[must_use]
    pub fn next(self, slice: u32, depth: u32) -> Option<u32> {
        match self {
            Self::Forward => slice.checked_add(1).filter(|&s| s <= depth),
            Self::Backward => slice.checked_sub(1).filter(|&s| s >= 1),
        }
    }

    /// Lowercase name for reports and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

/// Which pass a sweep belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pass {
    /// Starts at the seed; halts on the first empty slice.
    Outward,
    /// Covers the whole stack; skips empty slices and the seed slice.
    Refine,
}

impl Pass {
    /// Lowercase name for reports and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Outward => "outward",
            Self::Refine => "refine",
        }
    }
}

/// Why a sweep stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// The next slice would be outside the stack.
    ReachedEnd,
    /// The current slice has no tracked region to seed the next one.
    NoTrackedRegion,
    /// Segmentation or registration failed; see [`SweepFailure`].
    Failed,
    /// The [`CancellationToken`] was triggered.
    Cancelled,
}

/// State of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    /// The seed is registered on `slice`; no transition has run yet.
    Seeded {
        /// Seed slice.
        slice: u32,
    },
    /// `slice` is finalized and its neighbour is next.
    Propagating {
        /// Sweep direction.
        direction: Direction,
        /// Last finalized slice.
        slice: u32,
    },
    /// Terminal.
    Done {
        /// Sweep direction.
        direction: Direction,
        /// Why the sweep stopped.
        reason: HaltReason,
    },
}

/// The user-supplied starting region.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    slice: u32,
    shape: MultiPolygon<f64>,
}

impl Seed {
    /// A seed of arbitrary shape on `slice`.
    #[must_use]
    pub const fn new(slice: u32, shape: MultiPolygon<f64>) -> Self {
        Self { slice, shape }
    }

    /// An axis-aligned rectangle in pixel-corner coordinates.
    #[must_use]
    pub fn rect(slice: u32, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(slice, geometry::rect(x, y, width, height))
    }

    /// The in-band component under pixel `(x, y)` of `slice`, as a single
    /// click would select it.
    ///
    /// Returns `Ok(None)` if that pixel is outside `band`.
    ///
    /// # Errors
    ///
    /// Stack and coordinate errors from [`select_component_at`].
    pub fn at_pixel<S: ImageStack + ?Sized>(
        stack: &S,
        slice: u32,
        band: Band,
        x: i64,
        y: i64,
    ) -> Result<Option<Self>, TrackerError> {
        Ok(select_component_at(stack, slice, band, x, y)?.map(|shape| Self::new(slice, shape)))
    }

    /// Slice the seed is placed on.
    #[must_use]
    pub const fn slice(&self) -> u32 {
        self.slice
    }

    /// Seed outline.
    #[must_use]
    pub const fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }
}

impl From<Region> for Seed {
    fn from(region: Region) -> Self {
        let slice = region.slice();
        Self::new(slice, region.into_shape())
    }
}

/// How one sweep ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Pass the sweep belongs to.
    pub pass: Pass,
    /// Sweep direction.
    pub direction: Direction,
    /// Slice the sweep started from.
    pub start: u32,
    /// Last slice the sweep reached.
    pub last: u32,
    /// Transitions performed.
    pub steps: usize,
    /// Why it stopped.
    pub reason: HaltReason,
}

/// A sweep that stopped on an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    /// Pass the sweep belongs to.
    pub pass: Pass,
    /// Sweep direction.
    pub direction: Direction,
    /// Slice the failing transition targeted.
    pub slice: u32,
    /// The error.
    pub error: TrackerError,
}

/// Everything a run produced, including partial results.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationResult<R = TrackedRegistry> {
    /// The populated region store.
    pub registry: R,
    /// One summary per sweep that started, in execution order.
    pub sweeps: Vec<SweepSummary>,
    /// Sweeps that stopped on an error.
    pub failures: Vec<SweepFailure>,
    /// `true` if the run was cancelled.
    pub cancelled: bool,
    /// `true` if any sweep failed or the run was cancelled.
    pub incomplete: bool,
    /// Per-transition metrics.
    pub diagnostics: PropagationDiagnostics,
}

/// Result of one transition.
enum StepOutcome {
    Advanced(StepDiagnostics),
    EmptySource,
}

/// Drives propagation over an [`ImageStack`].
#[derive(Debug)]
pub struct Propagator<'a, S: ?Sized, G = SegmenterKind> {
    stack: &'a S,
    config: TrackerConfig,
    segmenter: G,
    cancel: Option<CancellationToken>,
}

impl<'a, S: ImageStack + ?Sized> Propagator<'a, S> {
    /// A propagator using the segmenter named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::InvalidConfig`] if `config` does not
    /// validate.
    pub fn new(stack: &'a S, config: &TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Self {
            stack,
            config: config.clone(),
            segmenter: config.segmenter,
            cancel: None,
        })
    }
}

impl<'a, S: ImageStack + ?Sized, G: Segmenter> Propagator<'a, S, G> {
    /// Replace the segmentation strategy.
    #[must_use]
    pub fn with_segmenter<H: Segmenter>(self, segmenter: H) -> Propagator<'a, S, H> {
        Propagator {
            stack: self.stack,
            config: self.config,
            segmenter,
            cancel: self.cancel,
        }
    }

    /// Check `token` before every transition.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Register `seed` in `store` and run every sweep of the configured
    /// order.
    ///
    /// Errors in individual sweeps do not fail the run; they are reported
    /// in [`PropagationResult::failures`].
    ///
    /// # Errors
    ///
    /// Rejects the run before touching any slice if the stack is empty
    /// ([`TrackerError::NoImage`]), the seed slice is outside the stack
    /// ([`TrackerError::SliceOutOfRange`]), the seed covers no pixel of the
    /// image, or the store depth differs from the stack depth
    /// ([`TrackerError::InvalidConfig`]). The parts of the seed outside the
    /// image are clipped away before it is registered.
    pub fn run<R: RegionStore, C: Clock>(
        &self,
        seed: Seed,
        mut store: R,
        clock: &C,
    ) -> Result<PropagationResult<R>, TrackerError> {
        let run_start = clock.now();
        let depth = self.stack.depth();
        if depth == 0 {
            return Err(TrackerError::NoImage);
        }
        if !(1..=depth).contains(&seed.slice) {
            return Err(TrackerError::SliceOutOfRange {
                slice: seed.slice,
                depth,
            });
        }
        if store.depth() != depth {
            return Err(TrackerError::InvalidConfig(format!(
                "region store holds {} slices but the stack has {depth}",
                store.depth(),
            )));
        }
        let Some(dimensions) = self.stack.dimensions() else {
            return Err(TrackerError::NoImage);
        };
        let seed_region = Region::new(
            seed.slice,
            geometry::clip_to(&seed.shape, dimensions),
            None,
        );
        if seed_region.area() == 0 {
            return Err(TrackerError::InvalidConfig(
                "seed region contains no pixels of the image".to_owned(),
            ));
        }

        let seed_slice = seed_region.slice();
        let state = SweepState::Seeded { slice: seed_slice };
        tracing::info!(?state, depth, area = seed_region.area(), "seeded");
        store.register(seed_region)?;

        let mut plan = vec![
            (Pass::Outward, Direction::Forward, seed_slice),
            (Pass::Outward, Direction::Backward, seed_slice),
        ];
        if self.config.order == PropagationOrder::SeedOutwardThenRefine {
            plan.push((Pass::Refine, Direction::Forward, 1));
            plan.push((Pass::Refine, Direction::Backward, depth));
        }

        let mut sweeps = Vec::with_capacity(plan.len());
        let mut failures = Vec::new();
        let mut steps = Vec::new();
        let mut cancelled = false;

        for (pass, direction, start) in plan {
            let summary = self.sweep(
                SweepPlan {
                    pass,
                    direction,
                    start,
                    seed_slice,
                },
                &mut store,
                clock,
                &mut steps,
                &mut failures,
            );
            cancelled = summary.reason == HaltReason::Cancelled;
            sweeps.push(summary);
            if cancelled {
                tracing::warn!(pass = pass.label(), "propagation cancelled");
                break;
            }
        }

        let incomplete = cancelled || !failures.is_empty();
        let diagnostics = PropagationDiagnostics {
            steps,
            total_duration: clock.elapsed(&run_start),
            summary: PropagationSummary {
                depth,
                seed_slice,
                tracked_slices: count_tracked_slices(&store, depth),
                regions: count_regions(&store, depth),
                failed_sweeps: failures.len(),
                cancelled,
            },
        };

        Ok(PropagationResult {
            registry: store,
            sweeps,
            failures,
            cancelled,
            incomplete,
            diagnostics,
        })
    }

    /// Run one sweep to completion.
    fn sweep<R: RegionStore, C: Clock>(
        &self,
        plan: SweepPlan,
        store: &mut R,
        clock: &C,
        steps: &mut Vec<StepDiagnostics>,
        failures: &mut Vec<SweepFailure>,
    ) -> SweepSummary {
        let SweepPlan {
            pass,
            direction,
            start,
            seed_slice,
        } = plan;
        let depth = self.stack.depth();
        let mut state = SweepState::Propagating {
            direction,
            slice: start,
        };
        let mut last = start;
        let mut count = 0;

        while let SweepState::Propagating { slice, .. } = state {
            last = slice;
            if self.is_cancelled() {
                state = SweepState::Done {
                    direction,
                    reason: HaltReason::Cancelled,
                };
                continue;
            }
            let Some(target) = direction.next(slice, depth) else {
                state = SweepState::Done {
                    direction,
                    reason: HaltReason::ReachedEnd,
                };
                continue;
            };
            if pass == Pass::Refine && target == seed_slice {
                state = SweepState::Propagating {
                    direction,
                    slice: target,
                };
                continue;
            }

            state = match self.step(pass, direction, slice, target, store, clock) {
                Ok(StepOutcome::Advanced(diag)) => {
                    count += 1;
                    tracing::debug!(
                        pass = pass.label(),
                        direction = direction.label(),
                        source = slice,
                        target,
                        candidates = diag.candidates,
                        retained = diag.retained,
                        positive_area = diag.positive_area,
                        negative_area = diag.negative_area,
                        "slice transition",
                    );
                    steps.push(diag);
                    SweepState::Propagating {
                        direction,
                        slice: target,
                    }
                }
                Ok(StepOutcome::EmptySource) if pass == Pass::Refine => {
                    SweepState::Propagating {
                        direction,
                        slice: target,
                    }
                }
                Ok(StepOutcome::EmptySource) => SweepState::Done {
                    direction,
                    reason: HaltReason::NoTrackedRegion,
                },
                Err(error) => {
                    tracing::warn!(
                        pass = pass.label(),
                        direction = direction.label(),
                        slice = target,
                        %error,
                        "sweep aborted",
                    );
                    failures.push(SweepFailure {
                        pass,
                        direction,
                        slice: target,
                        error,
                    });
                    SweepState::Done {
                        direction,
                        reason: HaltReason::Failed,
                    }
                }
            };
        }

        let reason = match state {
            SweepState::Done { reason, .. } => reason,
            SweepState::Seeded { .. } | SweepState::Propagating { .. } => HaltReason::ReachedEnd,
        };
        tracing::info!(
            pass = pass.label(),
            direction = direction.label(),
            start,
            last,
            steps = count,
            ?reason,
            "sweep finished",
        );
        SweepSummary {
            pass,
            direction,
            start,
            last,
            steps: count,
            reason,
        }
    }

    /// One transition from `source` to `target`.
    fn step<R: RegionStore, C: Clock>(
        &self,
        pass: Pass,
        direction: Direction,
        source: u32,
        target: u32,
        store: &mut R,
        clock: &C,
    ) -> Result<StepOutcome, TrackerError> {
        let start = clock.now();

        let tracked = store.list_regions(source)?;
        if tracked.is_empty() {
            return Ok(StepOutcome::EmptySource);
        }

        let candidates = segment_slice(
            &self.segmenter,
            self.stack,
            target,
            self.config.segmentation,
            self.config.min_area,
        )?;
        let candidate_count = candidates.len();
        let mut retained = retain_overlapping(candidates, tracked);

        if pass == Pass::Refine {
            let existing = store.list_regions(target)?;
            retained.retain(|candidate| !existing.iter().any(|region| region.overlaps(candidate)));
        }

        let image = self.stack.slice(target)?;
        let inside = self.config.inside_band();
        let (positive, negative): (Vec<&Region>, Vec<&Region>) = retained
            .iter()
            .partition(|candidate| classify(candidate.shape(), image, inside) == Sign::Positive);

        let mut positive_area = 0;
        let mut negative_area = 0;
        for (sign, group) in [(Sign::Positive, positive), (Sign::Negative, negative)] {
            if group.is_empty() {
                continue;
            }
            let merged = Region::new(
                target,
                geometry::union(group.into_iter().map(Region::shape)),
                Some(sign),
            );
            // Degenerate unions contribute nothing.
            if merged.area() == 0 {
                continue;
            }
            match sign {
                Sign::Positive => positive_area += merged.area(),
                Sign::Negative => negative_area += merged.area(),
            }
            store.register(merged)?;
        }

        Ok(StepOutcome::Advanced(StepDiagnostics {
            pass,
            direction,
            source,
            target,
            duration: clock.elapsed(&start),
            candidates: candidate_count,
            retained: retained.len(),
            positive_area,
            negative_area,
        }))
    }
}

/// Parameters of one sweep.
#[derive(Debug, Clone, Copy)]
struct SweepPlan {
    pass: Pass,
    direction: Direction,
    start: u32,
    seed_slice: u32,
}

/// Bounding box of a region, tagged with its index.
type IndexedEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn envelope_tree(regions: &[Region]) -> RTree<IndexedEnvelope> {
    let envelopes = regions
        .iter()
        .enumerate()
        .filter_map(|(i, region)| {
            let rect = geometry::envelope(region.shape())?;
            let (min, max) = (rect.min(), rect.max());
            Some(GeomWithData::new(
                Rectangle::from_corners([min.x, min.y], [max.x, max.y]),
                i,
            ))
        })
        .collect();
    RTree::bulk_load(envelopes)
}

/// Candidates overlapping at least one tracked region, in candidate order.
///
/// Only pairs whose bounding boxes intersect are tested exactly.
fn retain_overlapping(candidates: Vec<Region>, tracked: &[Region]) -> Vec<Region> {
    let candidate_tree = envelope_tree(&candidates);
    let tracked_tree = envelope_tree(tracked);

    let mut keep = vec![false; candidates.len()];
    for (candidate, region) in candidate_tree.intersection_candidates_with_other_tree(&tracked_tree)
    {
        let ci = candidate.data;
        if !keep[ci] && candidates[ci].overlaps(&tracked[region.data]) {
            keep[ci] = true;
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(candidate, kept)| kept.then_some(candidate))
        .collect()
}

fn count_tracked_slices<R: RegionStore>(store: &R, depth: u32) -> usize {
    (1..=depth)
        .filter(|&slice| store.list_regions(slice).is_ok_and(|regions| !regions.is_empty()))
        .count()
}

fn count_regions<R: RegionStore>(store: &R, depth: u32) -> usize {
    (1..=depth)
        .filter_map(|slice| store.list_regions(slice).ok())
        .map(<[Region]>::len)
        .sum()
}

/// Propagate `seed` through `stack` into a fresh [`TrackedRegistry`],
/// without timing or cancellation.
///
/// # Errors
///
/// As for [`Propagator::new`] and [`Propagator::run`].
pub fn propagate<S: ImageStack + ?Sized>(
    stack: &S,
    seed: Seed,
    config: &TrackerConfig,
) -> Result<PropagationResult, TrackerError> {
    Propagator::new(stack, config)?.run(seed, TrackedRegistry::new(stack.depth()), &NoClock)
}
