/// Outlier masking
///
/// Filters return the indices to keep rather than filtered values, so the
/// same mask can be applied to every aligned series of a run.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::series_stats::{self, Bounds};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Keep `[mean * (1 - threshold), mean * (1 + threshold)]`.
    PercentOfMean { threshold: f64 },
    /// Keep samples inside `iqr_bounds`.
    Iqr {
        lower_quantile: f64,
        upper_quantile: f64,
        multiplier: f64,
    },
    /// Keep `mean ± max_abs_delta`.
    AbsoluteDeviation { max_abs_delta: f64 },
    /// Keep a fixed `[min, max]`, independent of the series.
    Range { min: f64, max: f64 },
}

impl FilterPolicy {
    pub fn default_iqr() -> Self {
        FilterPolicy::Iqr {
            lower_quantile: series_stats::DEFAULT_LOWER_QUANTILE,
            upper_quantile: series_stats::DEFAULT_UPPER_QUANTILE,
            multiplier: series_stats::DEFAULT_IQR_MULTIPLIER,
        }
    }

    /// Acceptable band for `series` under this policy.
    pub fn bounds(&self, series: &[f64]) -> Result<Bounds> {
        match *self {
            FilterPolicy::PercentOfMean { threshold } => {
                let mean = series_stats::mean(series);
                let (a, b) = (mean * (1.0 - threshold), mean * (1.0 + threshold));
                // A negative mean flips the band
                Ok(Bounds { min: a.min(b), max: a.max(b) })
            }
            FilterPolicy::Iqr { lower_quantile, upper_quantile, multiplier } => {
                series_stats::iqr_bounds(series, lower_quantile, upper_quantile, multiplier)
            }
            FilterPolicy::AbsoluteDeviation { max_abs_delta } => {
                let mean = series_stats::mean(series);
                Ok(Bounds { min: mean - max_abs_delta, max: mean + max_abs_delta })
            }
            FilterPolicy::Range { min, max } => Ok(Bounds { min, max }),
        }
    }
}

/// Ascending indices of samples inside the policy's band. NaN samples are
/// never kept.
pub fn filter(series: &[f64], policy: &FilterPolicy) -> Result<Vec<usize>> {
    if series.is_empty() {
        return Ok(Vec::new());
    }
    let bounds = policy.bounds(series)?;

    Ok(series
        .iter()
        .enumerate()
        .filter(|(_, &v)| bounds.contains(v))
        .map(|(i, _)| i)
        .collect())
}

/// Indices that pass every `(series, policy)` pair.
pub fn filter_joint(criteria: &[(&[f64], FilterPolicy)]) -> Result<Vec<usize>> {
    let Some((first, _)) = criteria.first() else {
        return Ok(Vec::new());
    };
    let expected = first.len();
    if let Some((series, _)) = criteria.iter().find(|(s, _)| s.len() != expected) {
        return Err(TelemetryError::MisalignedSeries { expected, found: series.len() });
    }

    let mut keep = vec![true; expected];
    for (series, policy) in criteria {
        if series.is_empty() {
            continue;
        }
        let bounds = policy.bounds(series)?;
        for (flag, &v) in keep.iter_mut().zip(series.iter()) {
            *flag &= bounds.contains(v);
        }
    }

    Ok(keep
        .iter()
        .enumerate()
        .filter(|(_, &k)| k)
        .map(|(i, _)| i)
        .collect())
}

/// Values of `series` at the kept indices, in mask order.
pub fn apply_mask(series: &[f64], keep: &[usize]) -> Result<Vec<f64>> {
    keep.iter()
        .map(|&i| {
            series.get(i).copied().ok_or(TelemetryError::MisalignedSeries {
                expected: i + 1,
                found: series.len(),
            })
        })
        .collect()
}
