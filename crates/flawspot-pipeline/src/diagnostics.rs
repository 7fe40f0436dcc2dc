//! Inspection diagnostics: timing and measurements for each stage.
//!
//! Every `*_with_diagnostics` entry point collects these alongside the
//! inspection result. They exist for threshold tuning: the quality
//! metrics, alignment scores and evidence counts that decided the
//! outcome are kept next to the wall-clock cost of each step.
//!
//! Timestamps are captured via the `web-time` crate so the same code runs
//! natively and on WASM. Durations are serialized as fractional seconds
//! (`f64`), since `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::decision::Route;
use crate::geometry::MismatchRule;
use crate::quality::QualityReport;
use crate::structural::StructuralSignals;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from one inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stages in execution order. Skipped stages are absent.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the inspection (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    pub summary: InspectionSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Stage label, e.g. `"quality (base image)"`.
    pub stage: String,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    Decode {
        input_bytes: usize,
        width: u32,
        height: u32,
    },
    Quality(QualityReport),
    /// Working-resolution resize.
    Resize {
        width: u32,
        height: u32,
        /// Whether the image was actually resampled.
        resized: bool,
    },
    Segment {
        part_pixels: u64,
        /// Part pixels over frame pixels.
        coverage: f64,
    },
    Alignment {
        /// `None` when registration is disabled or failed.
        coarse_score: Option<f64>,
        refined_score: Option<f64>,
        /// Whether the aligned current image replaced the unaligned one.
        used: bool,
    },
    Diff {
        otsu_threshold: u8,
        used_threshold: u8,
        changed_pixels: u64,
    },
    Structural {
        triggered: bool,
        signals: StructuralSignals,
    },
    Geometry {
        rule: Option<MismatchRule>,
        shape_score: Option<f64>,
    },
    /// Single-image edge evidence.
    Edges {
        low_threshold: f32,
        high_threshold: f32,
        edge_pixels: u64,
    },
    Candidates {
        route: Option<Route>,
        count: usize,
    },
}

/// Headline numbers for the whole inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionSummary {
    /// Working-resolution width.
    pub image_width: u32,
    /// Working-resolution height.
    pub image_height: u32,
    /// Evidence source of a comparison; `None` for single-image inspection.
    pub route: Option<Route>,
    pub defect_count: usize,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Inspection Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Working image: {}x{}",
            self.summary.image_width, self.summary.image_height,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for diag in &self.stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!(
                "{:<24} {ms:>8.3}ms {pct:>9.1}%  {details}",
                diag.stage
            ));
        }

        lines.push(String::new());
        let route = self.summary.route.map_or("single image", Route::as_str);
        lines.push(format!(
            "Route: {route}  |  Defects: {}",
            self.summary.defect_count,
        ));

        lines.join("\n")
    }

    /// First stage with the given label.
    #[must_use]
    pub fn stage(&self, label: &str) -> Option<&StageDiagnostics> {
        self.stages.iter().find(|s| s.stage == label)
    }
}

/// Collects stage timings while an inspection runs.
pub(crate) struct Recorder {
    started: Instant,
    stages: Vec<StageDiagnostics>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            stages: Vec::new(),
        }
    }

    /// Run `stage`, timing it and deriving its metrics from the output.
    pub(crate) fn run<T>(
        &mut self,
        label: impl Into<String>,
        stage: impl FnOnce() -> T,
        metrics: impl FnOnce(&T) -> StageMetrics,
    ) -> T {
        let start = Instant::now();
        let out = stage();
        self.stages.push(StageDiagnostics {
            stage: label.into(),
            duration: start.elapsed(),
            metrics: metrics(&out),
        });
        out
    }

    /// Like [`Recorder::run`] for a fallible stage. Failed stages are not
    /// recorded.
    pub(crate) fn try_run<T, E>(
        &mut self,
        label: impl Into<String>,
        stage: impl FnOnce() -> Result<T, E>,
        metrics: impl FnOnce(&T) -> StageMetrics,
    ) -> Result<T, E> {
        let start = Instant::now();
        let out = stage()?;
        self.stages.push(StageDiagnostics {
            stage: label.into(),
            duration: start.elapsed(),
            metrics: metrics(&out),
        });
        Ok(out)
    }

    pub(crate) fn finish(self, summary: InspectionSummary) -> PipelineDiagnostics {
        PipelineDiagnostics {
            stages: self.stages,
            total_duration: self.started.elapsed(),
            summary,
        }
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_owned(), |s| format!("{s:.3}"))
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Quality(report) => format!(
            "roi={:.3}{} edges={:.4} over={:.3} under={:.3} glare={:.3}",
            report.roi_ratio,
            if report.relaxed { " (relaxed)" } else { "" },
            report.edge_ratio,
            report.overexposed_ratio,
            report.underexposed_ratio,
            report.glare_ratio,
        ),
        StageMetrics::Resize {
            width,
            height,
            resized,
        } => {
            let note = if *resized { "" } else { " (unchanged)" };
            format!("{width}x{height}{note}")
        }
        StageMetrics::Segment {
            part_pixels,
            coverage,
        } => format!("{part_pixels} px ({:.1}%)", coverage * 100.0),
        StageMetrics::Alignment {
            coarse_score,
            refined_score,
            used,
        } => format!(
            "coarse={} refined={} {}",
            format_score(*coarse_score),
            format_score(*refined_score),
            if *used { "aligned" } else { "unaligned" },
        ),
        StageMetrics::Diff {
            otsu_threshold,
            used_threshold,
            changed_pixels,
        } => format!("otsu={otsu_threshold} used={used_threshold} changed={changed_pixels}"),
        StageMetrics::Structural { triggered, signals } => format!(
            "{} components={}->{} loss={:.3}",
            if *triggered { "triggered" } else { "quiet" },
            signals.base_components,
            signals.current_components,
            signals.area_loss,
        ),
        StageMetrics::Geometry { rule, shape_score } => format!(
            "rule={} score={}",
            rule.map_or("none", MismatchRule::code),
            format_score(*shape_score),
        ),
        StageMetrics::Edges {
            low_threshold,
            high_threshold,
            edge_pixels,
        } => format!("low={low_threshold:.1} high={high_threshold:.1} edges={edge_pixels}"),
        StageMetrics::Candidates { route, count } => {
            let route = route.map_or("edges", Route::as_str);
            format!("{route} -> {count} defects")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> PipelineDiagnostics {
        PipelineDiagnostics {
            stages: vec![
                StageDiagnostics {
                    stage: "decode (base image)".to_owned(),
                    duration: Duration::from_millis(10),
                    metrics: StageMetrics::Decode {
                        input_bytes: 1000,
                        width: 640,
                        height: 480,
                    },
                },
                StageDiagnostics {
                    stage: "align".to_owned(),
                    duration: Duration::from_millis(30),
                    metrics: StageMetrics::Alignment {
                        coarse_score: Some(0.97),
                        refined_score: None,
                        used: true,
                    },
                },
                StageDiagnostics {
                    stage: "candidates".to_owned(),
                    duration: Duration::from_millis(2),
                    metrics: StageMetrics::Candidates {
                        route: Some(Route::PlainDiff),
                        count: 1,
                    },
                },
            ],
            total_duration: Duration::from_millis(50),
            summary: InspectionSummary {
                image_width: 640,
                image_height: 480,
                route: Some(Route::PlainDiff),
                defect_count: 1,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample().report();
        assert!(report.contains("Inspection Diagnostics Report"));
        assert!(report.contains("decode (base image)"));
        assert!(report.contains("coarse=0.970 refined=- aligned"));
        assert!(report.contains("plain_diff -> 1 defects"));
        assert!(report.contains("Route: plain_diff  |  Defects: 1"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!((json["total_duration"].as_f64().unwrap() - 0.05).abs() < 1e-9);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(50));
    }

    #[test]
    fn negative_durations_are_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<PipelineDiagnostics>(json).is_err());
    }

    #[test]
    fn recorder_keeps_stage_order_and_skips_failures() {
        let mut rec = Recorder::new();
        let n = rec.run("first", || 3_usize, |n| StageMetrics::Candidates {
            route: None,
            count: *n,
        });
        assert_eq!(n, 3);
        assert!(
            rec.try_run("second", || Err::<usize, _>("nope"), |_| {
                StageMetrics::Candidates {
                    route: None,
                    count: 0,
                }
            })
            .is_err()
        );
        let diag = rec.finish(InspectionSummary {
            image_width: 1,
            image_height: 1,
            route: None,
            defect_count: 3,
        });
        assert_eq!(diag.stages.len(), 1);
        assert!(diag.stage("first").is_some());
        assert!(diag.stage("second").is_none());
    }
}
