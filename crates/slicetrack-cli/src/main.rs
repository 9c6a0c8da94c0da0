//! slicetrack: track a region through an image stack and measure its volume.
//!
//! Loads a stack (one image file per slice, or a directory of them),
//! places a seed region on a starting slice, propagates it outward and
//! prints the tracked regions or the integrated signed volume.
//!
//! # Usage
//!
//! ```text
//! slicetrack volume --start 12 --seed-rect 40,40,16,16 --low 900 --high 4000 stack/
//! slicetrack track --start 3 --seed-at 20,31 --json slice_*.tif
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use slicetrack_core::diagnostics::{Clock, PropagationDiagnostics};
use slicetrack_core::propagate::{SweepFailure, SweepSummary};
use slicetrack_core::{
    Band, ImageStack, PropagationOrder, PropagationResult, Propagator, RegionStore, Seed,
    TrackedRegistry, TrackerConfig, VolumeReport, VolumeStack, integrate,
};
use tracing_subscriber::EnvFilter;

/// Region tracking and signed volume integration over image stacks.
#[derive(Parser)]
#[command(name = "slicetrack", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Propagate the seed and print the tracked regions.
    Track(RunArgs),
    /// Propagate the seed, then integrate and print the volume.
    Volume(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Image files, one per slice, or a single directory of them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Slice the seed is placed on (1-based).
    #[arg(long)]
    start: u32,

    #[command(flatten)]
    seed: SeedArgs,

    /// Lower segmentation threshold (inclusive).
    #[arg(long, default_value_t = TrackerConfig::DEFAULT_LOW)]
    low: f32,

    /// Upper segmentation threshold (inclusive).
    #[arg(long, default_value_t = TrackerConfig::DEFAULT_HIGH)]
    high: f32,

    /// Lower bound of the sign test (exclusive). Defaults to --low.
    #[arg(long, requires = "inside_high")]
    inside_low: Option<f32>,

    /// Upper bound of the sign test (exclusive). Defaults to --high.
    #[arg(long, requires = "inside_low")]
    inside_high: Option<f32>,

    /// Discard components with at most this many pixels.
    #[arg(long, default_value_t = TrackerConfig::DEFAULT_MIN_AREA)]
    min_area: u64,

    /// Distance per slice.
    #[arg(long, default_value_t = TrackerConfig::DEFAULT_SCALE)]
    scale: f64,

    /// Run full forward and backward refine passes after the outward sweeps.
    #[arg(long)]
    refine: bool,

    /// Full tracker config as a JSON string.
    ///
    /// When provided, the threshold, area, scale and refine flags are
    /// ignored. The JSON must be a valid `TrackerConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Output machine-readable JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Print per-transition diagnostics to stderr.
    #[arg(long)]
    diagnostics: bool,
}

/// Exactly one way of placing the seed.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct SeedArgs {
    /// Rectangle seed as `x,y,width,height`.
    #[arg(long)]
    seed_rect: Option<String>,

    /// Seed as JSON: `{"rect": [x, y, w, h]}` or `{"polygon": [[x, y], ...]}`.
    #[arg(long)]
    seed_json: Option<String>,

    /// Seed the in-band component under pixel `x,y`.
    #[arg(long)]
    seed_at: Option<String>,
}

/// Build a [`TrackerConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual flags are ignored.
fn config_from_args(args: &RunArgs) -> Result<TrackerConfig, String> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(TrackerConfig {
        segmentation: Band::new(args.low, args.high),
        inside: args
            .inside_low
            .zip(args.inside_high)
            .map(|(low, high)| Band::new(low, high)),
        min_area: args.min_area,
        scale: args.scale,
        order: if args.refine {
            PropagationOrder::SeedOutwardThenRefine
        } else {
            PropagationOrder::SeedOutward
        },
        ..TrackerConfig::default()
    })
}

fn load(inputs: &[PathBuf]) -> Result<VolumeStack, String> {
    let result = match inputs {
        [dir] if dir.is_dir() => slicetrack_io::load_stack_from_dir(dir),
        paths => slicetrack_io::load_stack(paths),
    };
    result.map_err(|e| format!("Error loading stack: {e}"))
}

fn seed_from_args(
    args: &SeedArgs,
    stack: &VolumeStack,
    start: u32,
    config: &TrackerConfig,
) -> Result<Seed, String> {
    if let Some(ref rect) = args.seed_rect {
        return slicetrack_io::parse_rect(rect)
            .map(|shape| shape.into_seed(start))
            .map_err(|e| format!("Error parsing --seed-rect: {e}"));
    }
    if let Some(ref json) = args.seed_json {
        return slicetrack_io::parse_seed(json)
            .map(|shape| shape.into_seed(start))
            .map_err(|e| format!("Error parsing --seed-json: {e}"));
    }
    if let Some(ref at) = args.seed_at {
        let (x, y) = parse_point(at).ok_or_else(|| format!("Invalid --seed-at {at:?}: expected x,y"))?;
        return match Seed::at_pixel(stack, start, config.segmentation, x, y) {
            Ok(Some(seed)) => Ok(seed),
            Ok(None) => Err(format!(
                "Pixel ({x}, {y}) on slice {start} is outside the segmentation band"
            )),
            Err(e) => Err(format!("Error selecting seed: {e}")),
        };
    }
    Err("No seed given".to_owned())
}

fn parse_point(text: &str) -> Option<(i64, i64)> {
    let (x, y) = text.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// One line of the per-slice region summary.
#[derive(Serialize)]
struct SliceRegions {
    slice: u32,
    regions: usize,
    area: u64,
}

/// JSON output of either subcommand.
#[derive(Serialize)]
struct Output<'a> {
    fingerprint: String,
    incomplete: bool,
    cancelled: bool,
    slices: Vec<SliceRegions>,
    sweeps: &'a [SweepSummary],
    failures: &'a [SweepFailure],
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<&'a VolumeReport>,
    diagnostics: &'a PropagationDiagnostics,
}

fn slice_regions(registry: &TrackedRegistry) -> Vec<SliceRegions> {
    registry
        .tracked_slices()
        .filter_map(|slice| {
            let regions = registry.list_regions(slice).ok()?;
            Some(SliceRegions {
                slice,
                regions: regions.len(),
                area: regions.iter().map(slicetrack_core::Region::area).sum(),
            })
        })
        .collect()
}

fn print_report(result: &PropagationResult, volume: Option<&VolumeReport>) {
    println!("{:>6} {:>8} {:>10}", "Slice", "Regions", "Area");
    println!("{}", "-".repeat(26));
    for line in slice_regions(&result.registry) {
        println!("{:>6} {:>8} {:>10}", line.slice, line.regions, line.area);
    }
    println!();
    for sweep in &result.sweeps {
        println!(
            "{} {} sweep from {}: {} steps, stopped at {} ({:?})",
            sweep.pass.label(),
            sweep.direction.label(),
            sweep.start,
            sweep.steps,
            sweep.last,
            sweep.reason,
        );
    }
    for failure in &result.failures {
        println!(
            "{} {} sweep failed at slice {}: {}",
            failure.pass.label(),
            failure.direction.label(),
            failure.slice,
            failure.error,
        );
    }
    println!("Fingerprint: {:016x}", result.registry.fingerprint());
    if let Some(volume) = volume {
        println!();
        println!("{}", volume.report());
    }
}

fn run(args: &RunArgs, with_volume: bool) -> Result<ExitCode, String> {
    let config = config_from_args(args)?;
    let stack = load(&args.inputs)?;
    let seed = seed_from_args(&args.seed, &stack, args.start, &config)?;

    let propagator =
        Propagator::new(&stack, &config).map_err(|e| format!("Invalid configuration: {e}"))?;
    let result = propagator
        .run(seed, TrackedRegistry::new(stack.depth()), &StdClock)
        .map_err(|e| format!("Propagation error: {e}"))?;

    let volume = if with_volume {
        Some(
            integrate(&stack, &result.registry, &config)
                .map_err(|e| format!("Integration error: {e}"))?,
        )
    } else {
        None
    };

    if args.diagnostics {
        eprintln!("{}", result.diagnostics.report());
    }

    if args.json {
        let output = Output {
            fingerprint: format!("{:016x}", result.registry.fingerprint()),
            incomplete: result.incomplete,
            cancelled: result.cancelled,
            slices: slice_regions(&result.registry),
            sweeps: &result.sweeps,
            failures: &result.failures,
            volume: volume.as_ref(),
            diagnostics: &result.diagnostics,
        };
        let json = serde_json::to_string_pretty(&output)
            .map_err(|e| format!("Error serializing output: {e}"))?;
        println!("{json}");
    } else {
        print_report(&result, volume.as_ref());
    }

    Ok(ExitCode::from(exit_status(&result)))
}

/// 0 for a complete run, 2 when the registry holds partial results.
fn exit_status(result: &PropagationResult) -> u8 {
    if result.incomplete {
        tracing::warn!(
            failed_sweeps = result.failures.len(),
            cancelled = result.cancelled,
            "propagation incomplete; results are partial"
        );
        return 2;
    }
    0
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,slicetrack_core=info,slicetrack_io=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match &cli.command {
        Command::Track(args) => run(args, false),
        Command::Volume(args) => run(args, true),
    };

    match outcome {
        Ok(code) => code,
        Err(msg) => {
            tracing::error!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}
