/// Cross-series join
///
/// Aligns named metric series with a coordinate column into per-sample
/// records. Records are purely numeric and are what renderers consume.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::run::{Metric, Run};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coordinate {
    Index,
    #[default]
    Distance,
    ElapsedMinutes,
}

impl Coordinate {
    pub fn column(&self) -> &'static str {
        match self {
            Coordinate::Index => "index",
            Coordinate::Distance => "distance_km",
            Coordinate::ElapsedMinutes => "elapsed_min",
        }
    }

    /// Coordinate values for every sample of `run`.
    pub fn values(&self, run: &Run) -> Vec<f64> {
        match self {
            Coordinate::Index => (0..run.len()).map(|i| i as f64).collect(),
            Coordinate::Distance => run.distance_km().to_vec(),
            Coordinate::ElapsedMinutes => run.elapsed_s().iter().map(|s| s / 60.0).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedRecord {
    /// Position of this record in the source series.
    pub index: usize,
    pub coordinate: f64,
    pub values: BTreeMap<Metric, f64>,
}

impl JoinedRecord {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }
}

fn check_alignment(series_by_metric: &[(Metric, &[f64])], coordinate: &[f64]) -> Result<()> {
    let expected = coordinate.len();
    match series_by_metric.iter().find(|(_, s)| s.len() != expected) {
        Some((_, series)) => {
            Err(TelemetryError::MisalignedSeries { expected, found: series.len() })
        }
        None => Ok(()),
    }
}

fn record_at(
    series_by_metric: &[(Metric, &[f64])],
    coordinate: &[f64],
    index: usize,
) -> JoinedRecord {
    JoinedRecord {
        index,
        coordinate: coordinate[index],
        values: series_by_metric
            .iter()
            .map(|(metric, series)| (*metric, series[index]))
            .collect(),
    }
}

/// One record per index holding the coordinate and every metric's value.
pub fn join(
    series_by_metric: &[(Metric, &[f64])],
    coordinate: &[f64],
) -> Result<Vec<JoinedRecord>> {
    check_alignment(series_by_metric, coordinate)?;

    Ok((0..coordinate.len())
        .map(|i| record_at(series_by_metric, coordinate, i))
        .collect())
}

/// Like `join`, restricted to the indices in `keep`.
pub fn join_masked(
    series_by_metric: &[(Metric, &[f64])],
    coordinate: &[f64],
    keep: &[usize],
) -> Result<Vec<JoinedRecord>> {
    check_alignment(series_by_metric, coordinate)?;
    if let Some(&bad) = keep.iter().find(|&&i| i >= coordinate.len()) {
        return Err(TelemetryError::MisalignedSeries { expected: bad + 1, found: coordinate.len() });
    }

    Ok(keep
        .iter()
        .map(|&i| record_at(series_by_metric, coordinate, i))
        .collect())
}

/// Column of `metric` across `records`, NaN where a record lacks it.
pub fn column(records: &[JoinedRecord], metric: Metric) -> Vec<f64> {
    records
        .iter()
        .map(|r| r.value(metric).unwrap_or(f64::NAN))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_three_series() {
        let cadence = [170.0, 171.0, 172.0, 173.0, 174.0];
        let stride = [1100.0, 1110.0, 1120.0, 1130.0, 1140.0];
        let power = [250.0, 251.0, 252.0, 253.0, 254.0];
        let distance = [0.0, 0.01, 0.02, 0.03, 0.04];

        let records = join(
            &[
                (Metric::Cadence, &cadence[..]),
                (Metric::StrideLength, &stride[..]),
                (Metric::Power, &power[..]),
            ],
            &distance,
        )
        .unwrap();

        assert_eq!(records.len(), 5);
        assert_eq!(records[3].index, 3);
        assert_eq!(records[3].coordinate, 0.03);
        assert_eq!(records[3].value(Metric::StrideLength), Some(1130.0));
        assert_eq!(records[3].value(Metric::HeartRate), None);
    }

    #[test]
    fn test_join_rejects_short_series() {
        let long = [1.0; 5];
        let short = [1.0; 4];
        let result = join(
            &[
                (Metric::Cadence, &long[..]),
                (Metric::StrideLength, &short[..]),
                (Metric::Power, &long[..]),
            ],
            &long,
        );
        assert!(matches!(result, Err(TelemetryError::MisalignedSeries { expected: 5, found: 4 })));
    }

    #[test]
    fn test_join_masked_keeps_source_index() {
        let cadence = [170.0, 250.0, 172.0];
        let distance = [0.0, 0.5, 1.0];
        let records = join_masked(&[(Metric::Cadence, &cadence[..])], &distance, &[0, 2]).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].index, 2);
        assert_eq!(records[1].coordinate, 1.0);
        assert_eq!(column(&records, Metric::Cadence), vec![170.0, 172.0]);

        assert!(join_masked(&[(Metric::Cadence, &cadence[..])], &distance, &[3]).is_err());
    }
}
