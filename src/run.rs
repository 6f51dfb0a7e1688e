/// Run and sample model
///
/// A run is a set of equal-length series sharing one sample index. Missing
/// readings are `None` on a `Sample` and are stored as NaN inside series.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::normalizer::Orientation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cadence,
    StrideLength,
    Pace,
    Power,
    HeartRate,
    Elevation,
    /// Cumulative distance, read from the run's own distance series.
    Distance,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Cadence,
        Metric::StrideLength,
        Metric::Pace,
        Metric::Power,
        Metric::HeartRate,
        Metric::Elevation,
        Metric::Distance,
    ];

    /// Metrics a sample table carries as their own columns.
    pub const RECORDED: [Metric; 6] = [
        Metric::Cadence,
        Metric::StrideLength,
        Metric::Pace,
        Metric::Power,
        Metric::HeartRate,
        Metric::Elevation,
    ];

    /// Column name used in sample tables and derived CSVs.
    pub fn column(&self) -> &'static str {
        match self {
            Metric::Cadence => "cadence",
            Metric::StrideLength => "stride_length",
            Metric::Pace => "pace",
            Metric::Power => "power",
            Metric::HeartRate => "heart_rate",
            Metric::Elevation => "elevation",
            Metric::Distance => "distance_km",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Cadence => "SPM",
            Metric::StrideLength => "mm",
            Metric::Pace => "min/km",
            Metric::Power => "W",
            Metric::HeartRate => "BPM",
            Metric::Elevation => "m",
            Metric::Distance => "km",
        }
    }

    /// Radar axis direction. A lower pace or heart rate at the same effort
    /// plots further out.
    pub fn orientation(&self) -> Orientation {
        match self {
            Metric::Pace | Metric::HeartRate => Orientation::LowerIsBetter,
            _ => Orientation::HigherIsBetter,
        }
    }
}

/// One aligned instant across every metric of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub index: usize,
    pub distance_km: f64,
    pub elapsed_s: f64,
    pub values: BTreeMap<Metric, Option<f64>>,
}

impl Sample {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied().flatten()
    }
}

#[derive(Debug, Clone)]
pub struct Run {
    filename: String,
    start: Option<DateTime<Utc>>,
    distance_km: Vec<f64>,
    elapsed_s: Vec<f64>,
    metrics: BTreeMap<Metric, Vec<f64>>,
}

impl Run {
    /// Builds a run, rejecting any series whose length differs from the
    /// distance series. Distance is passed as `distance_km`, never as a
    /// metric series.
    pub fn new(
        filename: impl Into<String>,
        start: Option<DateTime<Utc>>,
        distance_km: Vec<f64>,
        elapsed_s: Vec<f64>,
        metrics: BTreeMap<Metric, Vec<f64>>,
    ) -> Result<Self> {
        let expected = distance_km.len();
        if elapsed_s.len() != expected {
            return Err(TelemetryError::MisalignedSeries { expected, found: elapsed_s.len() });
        }
        if let Some(series) = metrics.values().find(|s| s.len() != expected) {
            return Err(TelemetryError::MisalignedSeries { expected, found: series.len() });
        }
        if metrics.contains_key(&Metric::Distance) {
            return Err(TelemetryError::InvalidParameter(
                "distance belongs in distance_km, not in the metric series".to_string(),
            ));
        }

        Ok(Run { filename: filename.into(), start, distance_km, elapsed_s, metrics })
    }

    /// Builds a run from samples in ascending index order. A metric present
    /// on any sample becomes a series, NaN where other samples lack it.
    pub fn from_samples(
        filename: impl Into<String>,
        start: Option<DateTime<Utc>>,
        samples: &[Sample],
    ) -> Result<Self> {
        if let Some(pair) = samples.windows(2).find(|w| w[1].index <= w[0].index) {
            return Err(TelemetryError::InvalidParameter(format!(
                "sample index {} follows {}",
                pair[1].index, pair[0].index
            )));
        }

        let mut metrics: BTreeMap<Metric, Vec<f64>> = samples
            .iter()
            .flat_map(|s| s.values.keys().copied())
            .map(|m| (m, Vec::with_capacity(samples.len())))
            .collect();
        for sample in samples {
            for (metric, series) in metrics.iter_mut() {
                series.push(sample.value(*metric).unwrap_or(f64::NAN));
            }
        }

        Run::new(
            filename,
            start,
            samples.iter().map(|s| s.distance_km).collect(),
            samples.iter().map(|s| s.elapsed_s).collect(),
            metrics,
        )
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn len(&self) -> usize {
        self.distance_km.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance_km.is_empty()
    }

    pub fn distance_km(&self) -> &[f64] {
        &self.distance_km
    }

    pub fn elapsed_s(&self) -> &[f64] {
        &self.elapsed_s
    }

    /// `Metric::Distance` always resolves to the distance series.
    pub fn series(&self, metric: Metric) -> Option<&[f64]> {
        match metric {
            Metric::Distance => Some(&self.distance_km),
            _ => self.metrics.get(&metric).map(|s| s.as_slice()),
        }
    }

    /// Recorded metrics present in this run, in `Metric` order.
    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.metrics.keys().copied()
    }

    /// Largest finite distance, i.e. the run's total when distance is cumulative.
    pub fn total_distance_km(&self) -> f64 {
        self.distance_km
            .iter()
            .copied()
            .filter(|d| d.is_finite())
            .fold(0.0, f64::max)
    }

    /// Label used for cross-run comparison, "Run from 14.10.2026" when the
    /// start time is known.
    pub fn display_name(&self) -> String {
        match self.start {
            Some(start) => format!("Run from {}", start.format("%d.%m.%Y")),
            None => self.filename.clone(),
        }
    }
}

/// Formats decimal minutes per km as `m:ss`. Non-finite or non-positive
/// paces format as an empty string.
pub fn format_pace(pace: f64) -> String {
    if !pace.is_finite() || pace <= 0.0 {
        return String::new();
    }
    let mut minutes = pace.floor() as u64;
    let mut seconds = ((pace - pace.floor()) * 60.0).round() as u64;
    if seconds >= 60 {
        minutes += 1;
        seconds = 0;
    }
    format!("{}:{:02}", minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_of(len: usize) -> BTreeMap<Metric, Vec<f64>> {
        let mut metrics = BTreeMap::new();
        metrics.insert(Metric::Cadence, vec![170.0; len]);
        metrics.insert(Metric::HeartRate, vec![150.0; len]);
        metrics
    }

    #[test]
    fn test_run_rejects_misaligned_metric() {
        let mut metrics = metrics_of(5);
        metrics.insert(Metric::Power, vec![250.0; 4]);

        let result = Run::new("a.csv", None, vec![0.0; 5], vec![0.0; 5], metrics);
        assert!(matches!(
            result,
            Err(TelemetryError::MisalignedSeries { expected: 5, found: 4 })
        ));
    }

    fn sample(index: usize, values: &[(Metric, Option<f64>)]) -> Sample {
        Sample {
            index,
            distance_km: index as f64 * 0.1,
            elapsed_s: index as f64,
            values: values.iter().copied().collect(),
        }
    }

    #[test]
    fn test_from_samples_fills_missing_with_nan() {
        let samples = vec![
            sample(0, &[(Metric::Cadence, Some(170.0)), (Metric::Power, Some(200.0))]),
            sample(1, &[(Metric::Cadence, Some(171.0)), (Metric::Power, None)]),
            sample(2, &[(Metric::Cadence, Some(172.0))]),
        ];
        let run = Run::from_samples("a.csv", None, &samples).unwrap();

        assert_eq!(run.len(), 3);
        assert_eq!(run.metrics().collect::<Vec<_>>(), vec![Metric::Cadence, Metric::Power]);
        assert_eq!(run.series(Metric::Cadence).unwrap(), &[170.0, 171.0, 172.0]);
        let power = run.series(Metric::Power).unwrap();
        assert_eq!(power[0], 200.0);
        assert!(power[1].is_nan() && power[2].is_nan());
        assert_eq!(run.elapsed_s(), &[0.0, 1.0, 2.0]);
        assert!(run.series(Metric::Elevation).is_none());
    }

    #[test]
    fn test_from_samples_rejects_unordered_index() {
        let samples = vec![sample(1, &[]), sample(1, &[])];
        assert!(matches!(
            Run::from_samples("a.csv", None, &samples),
            Err(TelemetryError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_distance_series_comes_from_distance_column() {
        let run =
            Run::new("a.csv", None, vec![0.0, 0.5, 1.0], vec![0.0; 3], metrics_of(3)).unwrap();
        assert_eq!(run.series(Metric::Distance).unwrap(), &[0.0, 0.5, 1.0]);
        assert!(!run.metrics().any(|m| m == Metric::Distance));

        let mut metrics = metrics_of(3);
        metrics.insert(Metric::Distance, vec![0.0; 3]);
        assert!(Run::new("a.csv", None, vec![0.0; 3], vec![0.0; 3], metrics).is_err());
    }

    #[test]
    fn test_display_name_uses_start_date() {
        let start = DateTime::parse_from_rfc3339("2024-04-15T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let run = Run::new("boston.csv", Some(start), vec![], vec![], BTreeMap::new()).unwrap();
        assert_eq!(run.display_name(), "Run from 15.04.2024");

        let unnamed = Run::new("boston.csv", None, vec![], vec![], BTreeMap::new()).unwrap();
        assert_eq!(unnamed.display_name(), "boston.csv");
    }

    #[test]
    fn test_format_pace() {
        assert_eq!(format_pace(5.5), "5:30");
        assert_eq!(format_pace(4.0), "4:00");
        assert_eq!(format_pace(4.999), "5:00");
        assert_eq!(format_pace(0.0), "");
        assert_eq!(format_pace(f64::NAN), "");
    }

    #[test]
    fn test_total_distance_ignores_missing() {
        let run = Run::new(
            "a.csv",
            None,
            vec![0.0, 1.2, f64::NAN, 2.5],
            vec![0.0; 4],
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(run.total_distance_km(), 2.5);
    }
}
