//! Integration tests: track synthetic stacks end to end and integrate their volume.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::cell::Cell;

use slicetrack_core::diagnostics::NoClock;
use slicetrack_core::propagate::Pass;
use slicetrack_core::segment::segment_slice;
use slicetrack_core::{
    Band, CancellationToken, Dimensions, Direction, HaltReason, ImageStack, Propagator,
    RegionStore, Seed, Segmenter, SegmenterKind, SliceImage, TrackedRegistry, TrackerConfig,
    TrackerError, VolumeStack, geometry, integrate, propagate, track_volume,
};

const ON: f32 = 200.0;
const BAND: Band = Band::new(100.0, 255.0);

fn config() -> TrackerConfig {
    TrackerConfig {
        segmentation: BAND,
        ..TrackerConfig::default()
    }
}

fn in_square(x: u32, y: u32) -> bool {
    (3..7).contains(&x) && (3..7).contains(&y)
}

/// 5 slices of 10x10 with a 4x4 square at (3, 3) on slices 2-4.
fn square_stack() -> VolumeStack {
    VolumeStack::from_fn(5, 10, 10, |s, x, y| {
        if (2..=4).contains(&s) && in_square(x, y) {
            ON
        } else {
            0.0
        }
    })
}

/// As [`square_stack`], but slice 3's square has a 2x2 out-of-band patch
/// at (4, 4).
fn patched_stack() -> VolumeStack {
    VolumeStack::from_fn(5, 10, 10, |s, x, y| {
        let patch = s == 3 && (4..6).contains(&x) && (4..6).contains(&y);
        if (2..=4).contains(&s) && in_square(x, y) && !patch {
            ON
        } else {
            0.0
        }
    })
}

#[test]
fn square_column_volume() {
    let stack = square_stack();
    let seed = Seed::rect(3, 3.0, 3.0, 4.0, 4.0);
    let (result, volume) = track_volume(&stack, seed, &config()).unwrap();

    assert!(!result.incomplete);
    assert_eq!(
        result.registry.tracked_slices().collect::<Vec<_>>(),
        vec![2, 3, 4]
    );
    for slice in [2, 4] {
        let regions = result.registry.list_regions(slice).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area(), 16);
    }
    assert!(result.registry.list_regions(1).unwrap().is_empty());
    assert!(result.registry.list_regions(5).unwrap().is_empty());

    assert_eq!(volume.total, 48.0);
    assert_eq!(volume.slices.len(), 3);
}

#[test]
fn scale_multiplies_every_slice() {
    let stack = square_stack();
    let config = TrackerConfig {
        scale: 0.5,
        ..config()
    };
    let (_, volume) = track_volume(&stack, Seed::rect(3, 3.0, 3.0, 4.0, 4.0), &config).unwrap();
    assert_eq!(volume.total, 24.0);
}

#[test]
fn patch_inside_seed_slice_is_subtracted() {
    let stack = patched_stack();
    // Selecting the component by clicking keeps its hole.
    let seed = Seed::at_pixel(&stack, 3, BAND, 3, 3).unwrap().unwrap();
    let (result, volume) = track_volume(&stack, seed, &config()).unwrap();

    assert_eq!(
        result.registry.tracked_slices().collect::<Vec<_>>(),
        vec![2, 3, 4]
    );
    let slice3 = volume.slices.iter().find(|s| s.slice == 3).unwrap();
    assert_eq!(slice3.positive_area, 16);
    assert_eq!(slice3.negative_area, 4);
    assert_eq!(slice3.signed_area, 12);
    assert_eq!(volume.total, 16.0 + 12.0 + 16.0);
}

#[test]
fn patch_on_propagated_slice_is_subtracted() {
    let stack = patched_stack();
    let seed = Seed::rect(2, 3.0, 3.0, 4.0, 4.0);
    let (_, volume) = track_volume(&stack, seed, &config()).unwrap();
    let slice3 = volume.slices.iter().find(|s| s.slice == 3).unwrap();
    assert_eq!(slice3.signed_area, 12);
    assert_eq!(volume.total, 44.0);
}

#[test]
fn separate_negative_region_is_subtracted() {
    let stack = patched_stack();
    let mut registry = TrackedRegistry::new(5);
    registry
        .register(slicetrack_core::Region::new(
            3,
            geometry::rect(3.0, 3.0, 4.0, 4.0),
            None,
        ))
        .unwrap();
    registry
        .register(slicetrack_core::Region::new(
            3,
            geometry::rect(4.0, 4.0, 2.0, 2.0),
            None,
        ))
        .unwrap();
    let volume = integrate(&stack, &registry, &config()).unwrap();
    assert_eq!(volume.total, 12.0);
}

#[test]
fn spurious_pixel_below_min_area_never_tracked() {
    // Slice 3 is a lone pixel inside the footprint of slice 2's square.
    let stack = VolumeStack::from_fn(3, 10, 10, |s, x, y| match s {
        2 if in_square(x, y) => ON,
        3 if x == 4 && y == 4 => ON,
        _ => 0.0,
    });
    let seed = Seed::rect(2, 3.0, 3.0, 4.0, 4.0);

    let unfiltered = propagate(&stack, seed.clone(), &config()).unwrap();
    assert_eq!(unfiltered.registry.list_regions(3).unwrap().len(), 1);

    let filtered_config = TrackerConfig {
        min_area: 2,
        ..config()
    };
    let candidates = segment_slice(
        &SegmenterKind::default(),
        &stack,
        3,
        BAND,
        filtered_config.min_area,
    )
    .unwrap();
    assert!(candidates.is_empty());

    let filtered = propagate(&stack, seed, &filtered_config).unwrap();
    assert!(filtered.registry.list_regions(3).unwrap().is_empty());
    assert_eq!(filtered.registry.len(), 1);
}

#[test]
fn repeated_runs_are_identical() {
    let stack = patched_stack();
    let run = || {
        let seed = Seed::rect(2, 3.0, 3.0, 4.0, 4.0);
        track_volume(&stack, seed, &config()).unwrap()
    };
    let (first, first_volume) = run();
    let (second, second_volume) = run();

    assert_eq!(first.registry, second.registry);
    assert_eq!(first.registry.fingerprint(), second.registry.fingerprint());
    assert_eq!(first_volume.total.to_bits(), second_volume.total.to_bits());
}

#[test]
fn every_sweep_halts_within_depth() {
    let stack = VolumeStack::from_fn(6, 8, 8, |_, _, _| ON);
    let depth = stack.depth();
    for start in 1..=depth {
        let result = propagate(&stack, Seed::rect(start, 0.0, 0.0, 8.0, 8.0), &config()).unwrap();
        for sweep in &result.sweeps {
            assert!(sweep.steps <= depth as usize);
            assert_eq!(sweep.reason, HaltReason::ReachedEnd);
        }
        assert_eq!(result.registry.tracked_slices().count(), depth as usize);
    }
}

#[test]
fn gap_halts_the_sweep() {
    // Slice 3 is empty; slices 4 and 5 hold the same square again.
    let stack = VolumeStack::from_fn(5, 10, 10, |s, x, y| {
        if s != 3 && in_square(x, y) { ON } else { 0.0 }
    });
    let result = propagate(&stack, Seed::rect(1, 3.0, 3.0, 4.0, 4.0), &config()).unwrap();
    assert_eq!(
        result.registry.tracked_slices().collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(result.sweeps[0].reason, HaltReason::NoTrackedRegion);
}

/// A stack whose `broken` slice can no longer be read.
struct DamagedStack {
    inner: VolumeStack,
    broken: u32,
}

impl ImageStack for DamagedStack {
    fn depth(&self) -> u32 {
        self.inner.depth()
    }

    fn dimensions(&self) -> Option<Dimensions> {
        self.inner.dimensions()
    }

    fn slice(&self, slice: u32) -> Result<&SliceImage, TrackerError> {
        if slice == self.broken {
            Err(TrackerError::NoImage)
        } else {
            self.inner.slice(slice)
        }
    }
}

#[test]
fn failure_aborts_only_its_direction() {
    let stack = DamagedStack {
        inner: VolumeStack::from_fn(5, 10, 10, |_, x, y| if in_square(x, y) { ON } else { 0.0 }),
        broken: 5,
    };
    let result = propagate(&stack, Seed::rect(3, 3.0, 3.0, 4.0, 4.0), &config()).unwrap();

    assert!(result.incomplete);
    assert!(!result.cancelled);
    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.direction, Direction::Forward);
    assert_eq!(failure.slice, 5);
    assert_eq!(failure.error, TrackerError::NoImage);

    assert_eq!(result.sweeps[0].reason, HaltReason::Failed);
    assert_eq!(result.sweeps[1].reason, HaltReason::ReachedEnd);
    // Slice 4 was finalized before the failure; the backward sweep ran.
    assert_eq!(
        result.registry.tracked_slices().collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
}

#[test]
fn truncated_stack_fails_integration() {
    let mut stack = square_stack();
    let result = propagate(&stack, Seed::rect(3, 3.0, 3.0, 4.0, 4.0), &config()).unwrap();
    stack.truncate(3);
    assert_eq!(
        integrate(&stack, &result.registry, &config()).unwrap_err(),
        TrackerError::StaleSlice { slice: 4 }
    );
}

/// Segments normally, but cancels `token` after `limit` calls.
struct CancellingSegmenter {
    token: CancellationToken,
    calls: Cell<usize>,
    limit: usize,
}

impl Segmenter for CancellingSegmenter {
    fn outlines(&self, image: &SliceImage, band: Band) -> Vec<geo::MultiPolygon<f64>> {
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() >= self.limit {
            self.token.cancel();
        }
        SegmenterKind::ThresholdOutline.outlines(image, band)
    }
}

#[test]
fn cancellation_keeps_finalized_slices() {
    let stack = VolumeStack::from_fn(6, 8, 8, |_, _, _| ON);
    let token = CancellationToken::new();
    let segmenter = CancellingSegmenter {
        token: token.clone(),
        calls: Cell::new(0),
        limit: 2,
    };
    let result = Propagator::new(&stack, &config())
        .unwrap()
        .with_segmenter(segmenter)
        .with_cancellation(token)
        .run(
            Seed::rect(1, 0.0, 0.0, 8.0, 8.0),
            TrackedRegistry::new(6),
            &NoClock,
        )
        .unwrap();

    assert!(result.cancelled);
    assert!(result.incomplete);
    assert_eq!(result.sweeps.len(), 1);
    assert_eq!(result.sweeps[0].reason, HaltReason::Cancelled);
    assert_eq!(result.sweeps[0].steps, 2);
    assert_eq!(
        result.registry.tracked_slices().collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(result.diagnostics.summary.cancelled);
}

#[test]
fn refine_order_runs_four_sweeps() {
    let stack = square_stack();
    let config = TrackerConfig {
        order: slicetrack_core::PropagationOrder::SeedOutwardThenRefine,
        ..config()
    };
    let (result, volume) =
        track_volume(&stack, Seed::rect(3, 3.0, 3.0, 4.0, 4.0), &config).unwrap();

    let passes: Vec<(Pass, Direction)> = result
        .sweeps
        .iter()
        .map(|s| (s.pass, s.direction))
        .collect();
    assert_eq!(
        passes,
        vec![
            (Pass::Outward, Direction::Forward),
            (Pass::Outward, Direction::Backward),
            (Pass::Refine, Direction::Forward),
            (Pass::Refine, Direction::Backward),
        ]
    );
    // Nothing new to find, and nothing counted twice.
    assert_eq!(volume.total, 48.0);
    assert_eq!(result.registry.len(), 3);
}

#[test]
fn diagnostics_cover_every_transition() {
    let stack = square_stack();
    let result = propagate(&stack, Seed::rect(3, 3.0, 3.0, 4.0, 4.0), &config()).unwrap();
    let diag = &result.diagnostics;

    // 3->4, 4->5, then 3->2, 2->1.
    let transitions: Vec<(u32, u32)> = diag.steps.iter().map(|s| (s.source, s.target)).collect();
    assert_eq!(transitions, vec![(3, 4), (4, 5), (3, 2), (2, 1)]);
    assert_eq!(diag.summary.tracked_slices, 3);
    assert_eq!(diag.summary.regions, 3);
    assert!(diag.report().contains("4->5"));
}
