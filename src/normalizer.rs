/// Normalization onto [0, 1] for cross-metric and cross-run comparison

use std::collections::BTreeMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::run::{Metric, Run};
use crate::series_stats::{self, Bounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    HigherIsBetter,
    LowerIsBetter,
}

/// `(value - min) / (max - min)`.
pub fn normalize(value: f64, min: f64, max: f64) -> Result<f64> {
    if max == min {
        return Err(TelemetryError::DegenerateRange { min, max });
    }
    Ok((value - min) / (max - min))
}

/// `normalize`, flipped for lower-is-better metrics so that "further out"
/// always means better.
pub fn normalize_oriented(value: f64, range: Bounds, orientation: Orientation) -> Result<f64> {
    let n = normalize(value, range.min, range.max)?;
    Ok(match orientation {
        Orientation::HigherIsBetter => n,
        Orientation::LowerIsBetter => 1.0 - n,
    })
}

/// Per-metric trimmed range over the pooled samples of every run. Metrics
/// with no readings in any run are left out.
pub fn global_ranges(runs: &[Run], metrics: &[Metric]) -> BTreeMap<Metric, Bounds> {
    let mut ranges = BTreeMap::new();
    for &metric in metrics {
        let pooled: Vec<f64> = runs
            .iter()
            .filter_map(|run| run.series(metric))
            .flat_map(|series| series.iter().copied())
            .collect();
        match series_stats::trimmed_range(&pooled) {
            Ok(range) => {
                ranges.insert(metric, range);
            }
            Err(_) => debug!("No {} readings across {} runs", metric.column(), runs.len()),
        }
    }
    ranges
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarAxis {
    pub metric: Metric,
    /// Trimmed mean in the metric's own unit.
    pub raw: f64,
    /// Oriented position on [0, 1]; `None` when the global range is degenerate.
    pub normalized: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarProfile {
    pub name: String,
    pub total_distance_km: f64,
    pub axes: Vec<RadarAxis>,
}

// Elevation is scored per run: mean height above the run's lowest point
// relative to its highest point above it.
fn elevation_axis(series: &[f64]) -> Option<RadarAxis> {
    let lowest = series_stats::min_max(series).ok()?.min;
    let adjusted: Vec<f64> = series.iter().map(|e| e - lowest).collect();
    let highest = series_stats::min_max(&adjusted).ok()?.max;
    let raw = series_stats::trimmed_mean(&adjusted).ok()?;

    Some(RadarAxis {
        metric: Metric::Elevation,
        raw,
        normalized: Some(if highest > 0.0 { raw / highest } else { 0.0 }),
    })
}

/// Radar axes for `run` over the metrics present in `ranges`.
pub fn radar_profile(run: &Run, ranges: &BTreeMap<Metric, Bounds>) -> RadarProfile {
    let axes = ranges
        .iter()
        .filter_map(|(&metric, &range)| {
            let series = run.series(metric)?;
            if metric == Metric::Elevation {
                return elevation_axis(series);
            }
            let raw = series_stats::trimmed_mean(series).ok()?;
            Some(RadarAxis {
                metric,
                raw,
                normalized: normalize_oriented(raw, range, metric.orientation()).ok(),
            })
        })
        .collect();

    RadarProfile {
        name: run.display_name(),
        total_distance_km: run.total_distance_km(),
        axes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(name: &str, metrics: Vec<(Metric, Vec<f64>)>) -> Run {
        let len = metrics.first().map_or(0, |(_, s)| s.len());
        let distance: Vec<f64> = (0..len).map(|i| i as f64 * 0.01).collect();
        Run::new(name, None, distance, vec![0.0; len], metrics.into_iter().collect()).unwrap()
    }

    #[test]
    fn test_normalize_endpoints() {
        for (min, max) in [(0.0, 1.0), (150.0, 190.0), (-5.0, 3.5)] {
            assert_eq!(normalize(min, min, max).unwrap(), 0.0);
            assert_eq!(normalize(max, min, max).unwrap(), 1.0);
        }
        assert!((normalize(170.0, 150.0, 190.0).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_degenerate() {
        assert!(matches!(
            normalize(1.0, 2.0, 2.0),
            Err(TelemetryError::DegenerateRange { .. })
        ));
    }

    #[test]
    fn test_normalize_oriented_flips() {
        let range = Bounds { min: 4.0, max: 6.0 };
        assert_eq!(normalize_oriented(4.0, range, Orientation::LowerIsBetter).unwrap(), 1.0);
        assert_eq!(normalize_oriented(4.0, range, Orientation::HigherIsBetter).unwrap(), 0.0);
    }

    #[test]
    fn test_global_ranges_pool_runs() {
        let a = run_with("a", vec![(Metric::Cadence, vec![160.0; 10])]);
        let b = run_with("b", vec![(Metric::Cadence, vec![180.0; 10])]);
        let ranges = global_ranges(&[a, b], &[Metric::Cadence, Metric::Power]);

        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[&Metric::Cadence], Bounds { min: 160.0, max: 180.0 });
    }

    #[test]
    fn test_radar_profile_orientation() {
        let fast = run_with(
            "fast",
            vec![(Metric::Cadence, vec![180.0; 10]), (Metric::Pace, vec![4.0; 10])],
        );
        let slow = run_with(
            "slow",
            vec![(Metric::Cadence, vec![160.0; 10]), (Metric::Pace, vec![6.0; 10])],
        );
        let runs = vec![fast, slow];
        let ranges = global_ranges(&runs, &[Metric::Cadence, Metric::Pace]);

        let profile = radar_profile(&runs[0], &ranges);
        assert_eq!(profile.name, "fast");
        let cadence = profile.axes.iter().find(|a| a.metric == Metric::Cadence).unwrap();
        let pace = profile.axes.iter().find(|a| a.metric == Metric::Pace).unwrap();
        assert_eq!(cadence.normalized, Some(1.0));
        assert_eq!(pace.raw, 4.0);
        assert_eq!(pace.normalized, Some(1.0));
    }

    #[test]
    fn test_radar_profile_elevation_relative_to_run() {
        let hilly =
            run_with("hilly", vec![(Metric::Elevation, vec![100.0, 110.0, 120.0, 110.0, 100.0])]);
        let runs = vec![hilly];
        let ranges = global_ranges(&runs, &[Metric::Elevation]);
        let profile = radar_profile(&runs[0], &ranges);

        let elevation = &profile.axes[0];
        // heights above lowest point: [0, 10, 20, 10, 0]
        assert!((elevation.raw - 8.0).abs() < 1e-12);
        assert!((elevation.normalized.unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_radar_profile_distance_axis() {
        let short = run_with("short", vec![(Metric::Cadence, vec![170.0; 11])]);
        let long = Run::new(
            "long",
            None,
            (0..11).map(|i| i as f64).collect(),
            vec![0.0; 11],
            [(Metric::Cadence, vec![170.0; 11])].into_iter().collect(),
        )
        .unwrap();
        let runs = vec![short, long];
        let ranges = global_ranges(&runs, &Metric::ALL);
        assert!(ranges.contains_key(&Metric::Distance));

        let profile = radar_profile(&runs[1], &ranges);
        let distance = profile.axes.iter().find(|a| a.metric == Metric::Distance).unwrap();
        assert!((distance.raw - 5.0).abs() < 1e-9);
        assert_eq!(profile.total_distance_km, 10.0);
        let short_distance = radar_profile(&runs[0], &ranges)
            .axes
            .into_iter()
            .find(|a| a.metric == Metric::Distance)
            .unwrap();
        assert!(distance.normalized.unwrap() > short_distance.normalized.unwrap());
    }

    #[test]
    fn test_radar_profile_degenerate_range() {
        let a = run_with("a", vec![(Metric::Power, vec![250.0; 5])]);
        let runs = vec![a];
        let ranges = global_ranges(&runs, &[Metric::Power]);
        let profile = radar_profile(&runs[0], &ranges);
        assert_eq!(profile.axes[0].normalized, None);
    }
}
