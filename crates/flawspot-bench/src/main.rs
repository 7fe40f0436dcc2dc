//! flawspot-bench: CLI tool for detection-profile tuning and diagnostics.
//!
//! Runs a single-image inspection, or a base/current comparison when
//! `--base` is given, printing the defects found and per-stage
//! diagnostics. Useful for:
//!
//! - Checking why a photo fails the quality gate
//! - Seeing which evidence source (structural, geometry, plain diff) won
//! - Tuning thresholds via `--profile-json` and comparing defect lists
//! - Measuring per-stage durations across `--runs`
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin flawspot-bench -- [OPTIONS] <IMAGE_PATH>
//! RUST_LOG=flawspot_pipeline=debug cargo run --bin flawspot-bench -- --base base.jpg current.jpg
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use flawspot_pipeline::{DetectionProfile, Inspection, PipelineDiagnostics};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Detection-profile experimentation and diagnostics for flawspot.
///
/// Inspects a photo (or compares it against a base photo) and prints the
/// defects found together with per-stage timing and measurements.
#[derive(Parser)]
#[command(name = "flawspot-bench", version)]
struct Cli {
    /// Photo to inspect (PNG, JPEG, BMP, WebP). With `--base`, the current
    /// photo of the comparison.
    image_path: PathBuf,

    /// Base photo of the intact part; switches to comparison mode.
    #[arg(long)]
    base: Option<PathBuf>,

    /// Longest side of the single-image working resolution.
    #[arg(long, default_value_t = flawspot_pipeline::profile::DEFAULT_MAX_SIDE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    max_side: u32,

    /// Compare without registering the current photo onto the base.
    #[arg(long)]
    no_registration: bool,

    /// Skip the outline geometry check.
    #[arg(long)]
    no_geometry: bool,

    /// Write the photo with defects outlined (JPEG) to this path.
    #[arg(long)]
    highlight: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output result and diagnostics as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// Detection profile as a JSON string (fields not given keep their
    /// defaults).
    ///
    /// When provided, the individual profile flags are ignored.
    #[arg(long)]
    profile_json: Option<String>,
}

/// Build a [`DetectionProfile`] from CLI arguments.
///
/// If `--profile-json` is provided, the JSON is parsed directly and the
/// individual profile flags are ignored.
fn profile_from_cli(cli: &Cli) -> Result<DetectionProfile, String> {
    let profile = if let Some(ref json) = cli.profile_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --profile-json: {e}"))?
    } else {
        DetectionProfile {
            max_side: cli.max_side,
            enable_registration: !cli.no_registration,
            enable_geometry_check: !cli.no_geometry,
            ..DetectionProfile::default()
        }
    };
    profile.validate().map_err(|e| e.to_string())?;
    Ok(profile)
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            error!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let profile = profile_from_cli(cli)?;
    let current = read(&cli.image_path)?;
    let base = cli.base.as_deref().map(read).transpose()?;

    info!(
        image = %cli.image_path.display(),
        bytes = current.len(),
        base = ?cli.base.as_ref().map(|p| p.display().to_string()),
        runs = cli.runs,
        "starting"
    );

    let mut all_diagnostics = Vec::with_capacity(cli.runs);
    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let inspection = match base {
            Some(ref base) => {
                flawspot_pipeline::inspect_diff_with_diagnostics(base, &current, &profile)
            }
            None => flawspot_pipeline::inspect_with_diagnostics(&current, &profile),
        }
        .map_err(|e| format!("Inspection failed ({:?}): {e}", e.kind()))?;

        if cli.json {
            let json = serde_json::to_string_pretty(&inspection)
                .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
            println!("{json}");
        } else {
            print_report(&inspection);
        }

        // Write the highlight on the first run only.
        if run == 0
            && let Some(ref path) = cli.highlight
        {
            write_highlight(path, &current, &inspection);
        }

        all_diagnostics.push(inspection.diagnostics);
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }
    Ok(())
}

fn print_report(inspection: &Inspection) {
    println!("{}", inspection.diagnostics.report());
    println!();
    let result = &inspection.result;
    println!(
        "Defects ({}x{}): {}",
        result.image_width,
        result.image_height,
        result.defects.len(),
    );
    for defect in &result.defects {
        println!(
            "  [{}, {}, {}x{}] area={}  {}",
            defect.x, defect.y, defect.width, defect.height, defect.area, defect.reason,
        );
    }
}

fn write_highlight(path: &Path, image: &[u8], inspection: &Inspection) {
    let written = flawspot_pipeline::highlight(image, &inspection.result)
        .map_err(|e| e.to_string())
        .and_then(|jpeg| {
            std::fs::write(path, &jpeg)
                .map(|()| jpeg.len())
                .map_err(|e| e.to_string())
        });
    match written {
        Ok(bytes) => info!(path = %path.display(), bytes, "highlight written"),
        Err(e) => error!(path = %path.display(), "Error writing highlight: {e}"),
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();
    if durations.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means, in the order of the first run. Stages skipped in
    // some runs are averaged over the runs that executed them.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let Some(first) = all_diagnostics.first() else {
        return;
    };
    for stage in &first.stages {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(|d| d.stage(&stage.stage))
            .map(|s| s.duration.as_secs_f64() * 1000.0)
            .collect();
        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{:<24} {stage_mean:>10.3}ms", stage.stage);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("flawspot-bench").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn flags_shape_the_profile() {
        let profile =
            profile_from_cli(&cli(&["--no-registration", "--max-side", "800", "a.png"])).unwrap();
        assert!(!profile.enable_registration);
        assert!(profile.enable_geometry_check);
        assert_eq!(profile.max_side, 800);
    }

    #[test]
    fn partial_profile_json_keeps_defaults() {
        let profile = profile_from_cli(&cli(&[
            "--profile-json",
            r#"{"diff_min_threshold": 40}"#,
            "a.png",
        ]))
        .unwrap();
        assert_eq!(profile.diff_min_threshold, 40);
        assert_eq!(
            profile.max_side,
            flawspot_pipeline::profile::DEFAULT_MAX_SIDE
        );
    }

    #[test]
    fn invalid_profile_json_is_reported() {
        let err = profile_from_cli(&cli(&[
            "--profile-json",
            r#"{"nms_iou_threshold": 3.0}"#,
            "a.png",
        ]))
        .unwrap_err();
        assert!(!err.is_empty());
        assert!(profile_from_cli(&cli(&["--profile-json", "{", "a.png"])).is_err());
    }

    #[test]
    fn zero_runs_are_rejected() {
        assert!(Cli::try_parse_from(["flawspot-bench", "--runs", "0", "a.png"]).is_err());
    }
}
