/// Centred moving-average smoothing for aligned series
/// Output always has the input's length and sample order

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};

/// How NaN readings inside a window are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValues {
    /// NaN contributes 0 to the sum but still counts toward the window size.
    #[default]
    AsZero,
    /// NaN is left out of both the sum and the count. A window with no
    /// readings yields NaN.
    Skip,
}

/// Centred moving average with the default `MissingValues::AsZero` handling.
pub fn moving_average(series: &[f64], window_size: usize) -> Vec<f64> {
    moving_average_with(series, window_size, MissingValues::AsZero)
}

/// For index `i` the window is `[i - w/2, i + w/2]` clipped to the series,
/// so edge windows shrink instead of padding.
pub fn moving_average_with(series: &[f64], window_size: usize, missing: MissingValues) -> Vec<f64> {
    if window_size <= 1 {
        return series.to_vec();
    }

    let half = window_size / 2;
    let n = series.len();
    let mut result = Vec::with_capacity(n);

    for i in 0..n {
        let start = i.saturating_sub(half);
        let end = (i + half + 1).min(n);
        let window = &series[start..end];

        let smoothed = match missing {
            MissingValues::AsZero => {
                let sum: f64 = window.iter().map(|v| if v.is_nan() { 0.0 } else { *v }).sum();
                sum / window.len() as f64
            }
            MissingValues::Skip => {
                let (sum, count) = window
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                if count == 0 { f64::NAN } else { sum / count as f64 }
            }
        };
        result.push(smoothed);
    }

    result
}

/// Averages every value whose coordinate lies within `window / 2` of the
/// current sample's coordinate. NaN values are skipped.
pub fn rolling_distance_average(
    coordinates: &[f64],
    series: &[f64],
    window: f64,
) -> Result<Vec<f64>> {
    if coordinates.len() != series.len() {
        return Err(TelemetryError::MisalignedSeries {
            expected: coordinates.len(),
            found: series.len(),
        });
    }
    if window <= 0.0 || series.len() < 3 {
        return Ok(series.to_vec());
    }

    let half_window = window / 2.0;
    let mut smoothed = Vec::with_capacity(series.len());
    let mut start = 0;
    let mut end = 0;

    // Coordinates are monotonic, so the window slides forward with i
    for i in 0..series.len() {
        let current = coordinates[i];
        while start < i && current - coordinates[start] > half_window {
            start += 1;
        }
        end = end.max(i);
        while end + 1 < series.len() && coordinates[end + 1] - current <= half_window {
            end += 1;
        }

        let (sum, count) = series[start..=end]
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        smoothed.push(if count == 0 { f64::NAN } else { sum / count as f64 });
    }

    Ok(smoothed)
}
