/// Least-squares line fit and correlation between aligned series

use serde::Serialize;

use crate::error::{Result, TelemetryError};
use crate::run::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionLine {
    pub slope: f64,
    pub intercept: f64,
}

impl RegressionLine {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

fn finite_pairs(xs: &[f64], ys: &[f64]) -> Result<Vec<(f64, f64)>> {
    if xs.len() != ys.len() {
        return Err(TelemetryError::InsufficientData(format!(
            "x has {} samples but y has {}",
            xs.len(),
            ys.len()
        )));
    }
    Ok(xs
        .iter()
        .zip(ys.iter())
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(&x, &y)| (x, y))
        .collect())
}

/// Closed-form OLS fit of `ys` against `xs`. Pairs with a NaN on either side
/// are dropped first.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Result<RegressionLine> {
    let pairs = finite_pairs(xs, ys)?;
    if pairs.len() < 2 {
        return Err(TelemetryError::InsufficientData(format!(
            "need at least 2 points, got {}",
            pairs.len()
        )));
    }

    let n = pairs.len() as f64;
    let (sum_x, sum_y, sum_xy, sum_x2) = pairs.iter().fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxy, sx2), &(x, y)| (sx + x, sy + y, sxy + x * y, sx2 + x * x),
    );

    let denominator = n * sum_x2 - sum_x * sum_x;
    // Relative to the magnitude of N*Σx² so large coordinates are not flagged
    if denominator.abs() <= f64::EPSILON * (n * sum_x2).abs().max(1.0) * 16.0 {
        return Err(TelemetryError::InsufficientData("x values have no variance".to_string()));
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    Ok(RegressionLine { slope, intercept })
}

/// Pearson correlation coefficient over the finite pairs.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Result<f64> {
    let pairs = finite_pairs(xs, ys)?;
    if pairs.len() < 2 {
        return Err(TelemetryError::InsufficientData(format!(
            "need at least 2 points, got {}",
            pairs.len()
        )));
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (cov, var_x, var_y) = pairs.iter().fold((0.0, 0.0, 0.0), |(c, vx, vy), &(x, y)| {
        let (dx, dy) = (x - mean_x, y - mean_y);
        (c + dx * dy, vx + dx * dx, vy + dy * dy)
    });

    let denominator = (var_x * var_y).sqrt();
    if denominator == 0.0 {
        return Err(TelemetryError::InsufficientData("series have no variance".to_string()));
    }
    Ok(cov / denominator)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationCell {
    pub x: Metric,
    pub y: Metric,
    /// `None` where the coefficient is undefined.
    pub value: Option<f64>,
}

/// Row-major matrix of pairwise Pearson coefficients.
pub fn correlation_matrix(series_by_metric: &[(Metric, &[f64])]) -> Result<Vec<CorrelationCell>> {
    if let Some((_, first)) = series_by_metric.first() {
        let expected = first.len();
        if let Some((_, series)) = series_by_metric.iter().find(|(_, s)| s.len() != expected) {
            return Err(TelemetryError::MisalignedSeries { expected, found: series.len() });
        }
    }

    let mut cells = Vec::with_capacity(series_by_metric.len() * series_by_metric.len());
    for (x, xs) in series_by_metric {
        for (y, ys) in series_by_metric {
            cells.push(CorrelationCell {
                x: *x,
                y: *y,
                value: pearson(xs, ys).ok(),
            });
        }
    }
    Ok(cells)
}
