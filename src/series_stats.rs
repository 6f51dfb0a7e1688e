//! Aggregate statistics over a single series.
//!
//! NaN readings are dropped before anything is computed, and every sort runs
//! on a copy so the caller's series keeps its sample order.

use serde::Serialize;

use crate::error::{Result, TelemetryError};

pub const DEFAULT_LOWER_QUANTILE: f64 = 0.05;
pub const DEFAULT_UPPER_QUANTILE: f64 = 0.95;
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

/// Inclusive value band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

fn finite_values(series: &[f64]) -> Vec<f64> {
    series.iter().copied().filter(|v| !v.is_nan()).collect()
}

fn sorted_copy(series: &[f64]) -> Vec<f64> {
    let mut values = finite_values(series);
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// Arithmetic mean of the non-NaN values, 0 when there are none.
pub fn mean(series: &[f64]) -> f64 {
    let values = finite_values(series);
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn quantile_sorted(sorted: &[f64], fraction: f64) -> f64 {
    let fraction = fraction.clamp(0.0, 1.0);
    let idx = (fraction * (sorted.len() - 1) as f64).floor() as usize;
    sorted[idx]
}

/// Value at rank `floor(fraction * (n - 1))` of the ascending series.
pub fn quantile_at(series: &[f64], fraction: f64) -> Result<f64> {
    let sorted = sorted_copy(series);
    if sorted.is_empty() {
        return Err(TelemetryError::EmptyInput);
    }
    Ok(quantile_sorted(&sorted, fraction))
}

// Box-plot rank: floor(fraction * n), clamped to the last element.
fn rank_sorted(sorted: &[f64], fraction: f64) -> f64 {
    let fraction = fraction.clamp(0.0, 1.0);
    let idx = ((fraction * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Tukey-style fence around the `lower_quantile`..`upper_quantile` spread.
///
/// Q1 and Q3 are taken at rank `floor(fraction * n)`, so on
/// `[10, 20, 30, 40, 50]` the 5%/95% ranks land on 10 and 50.
pub fn iqr_bounds(
    series: &[f64],
    lower_quantile: f64,
    upper_quantile: f64,
    multiplier: f64,
) -> Result<Bounds> {
    let sorted = sorted_copy(series);
    if sorted.is_empty() {
        return Err(TelemetryError::EmptyInput);
    }
    let q1 = rank_sorted(&sorted, lower_quantile);
    let q3 = rank_sorted(&sorted, upper_quantile);
    let iqr = q3 - q1;

    Ok(Bounds {
        min: q1 - multiplier * iqr,
        max: q3 + multiplier * iqr,
    })
}

/// `iqr_bounds` with the 5%/95% ranks and a 1.5 multiplier.
pub fn default_iqr_bounds(series: &[f64]) -> Result<Bounds> {
    iqr_bounds(series, DEFAULT_LOWER_QUANTILE, DEFAULT_UPPER_QUANTILE, DEFAULT_IQR_MULTIPLIER)
}

// Sorted slice [floor(5% n), ceil(95% n)).
fn trimmed_slice(sorted: &[f64]) -> &[f64] {
    let n = sorted.len() as f64;
    let start = (n * DEFAULT_LOWER_QUANTILE).floor() as usize;
    let end = ((n * DEFAULT_UPPER_QUANTILE).ceil() as usize).min(sorted.len());
    &sorted[start..end.max(start)]
}

/// Mean of the series with its bottom and top 5% removed.
pub fn trimmed_mean(series: &[f64]) -> Result<f64> {
    let sorted = sorted_copy(series);
    let slice = trimmed_slice(&sorted);
    if slice.is_empty() {
        return Err(TelemetryError::EmptyInput);
    }
    Ok(slice.iter().sum::<f64>() / slice.len() as f64)
}

/// Min and max of the series with its bottom and top 5% removed.
pub fn trimmed_range(series: &[f64]) -> Result<Bounds> {
    let sorted = sorted_copy(series);
    let slice = trimmed_slice(&sorted);
    match (slice.first(), slice.last()) {
        (Some(&min), Some(&max)) => Ok(Bounds { min, max }),
        _ => Err(TelemetryError::EmptyInput),
    }
}

pub fn min_max(series: &[f64]) -> Result<Bounds> {
    let values = finite_values(series);
    if values.is_empty() {
        return Err(TelemetryError::EmptyInput);
    }
    Ok(Bounds {
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Box-and-whisker summary of one group. Whiskers reach the most extreme
/// values inside the 1.5·IQR fences; anything beyond is counted as an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxSummary {
    pub count: usize,
    pub whisker_low: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub whisker_high: f64,
    pub outliers: usize,
}

// Linear interpolation between closest ranks.
fn interpolated_quantile(sorted: &[f64], fraction: f64) -> f64 {
    let position = fraction.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

pub fn box_summary(series: &[f64]) -> Result<BoxSummary> {
    let sorted = sorted_copy(series);
    if sorted.is_empty() {
        return Err(TelemetryError::EmptyInput);
    }
    let q1 = interpolated_quantile(&sorted, 0.25);
    let median = interpolated_quantile(&sorted, 0.5);
    let q3 = interpolated_quantile(&sorted, 0.75);
    let fence = Bounds {
        min: q1 - DEFAULT_IQR_MULTIPLIER * (q3 - q1),
        max: q3 + DEFAULT_IQR_MULTIPLIER * (q3 - q1),
    };

    let inside: Vec<f64> = sorted.iter().copied().filter(|v| fence.contains(*v)).collect();
    // Quartiles always lie inside the fence, so `inside` is never empty
    let whisker_low = inside.first().copied().unwrap_or(q1);
    let whisker_high = inside.last().copied().unwrap_or(q3);

    Ok(BoxSummary {
        count: sorted.len(),
        whisker_low,
        q1,
        median,
        q3,
        whisker_high,
        outliers: sorted.len() - inside.len(),
    })
}

/// Sum of positive consecutive deltas. Steps touching a NaN are skipped.
pub fn elevation_gain(elevations: &[f64]) -> f64 {
    elevations
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|delta| *delta > 0.0)
        .sum()
}
