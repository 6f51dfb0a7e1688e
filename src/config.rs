use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::join::Coordinate;
use crate::outlier_filter::FilterPolicy;
use crate::quantile_binner::DEFAULT_MIN_GROUP_SIZE;
use crate::run::Metric;
use crate::smoother::MissingValues;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricFilter {
    pub metric: Metric,
    /// Bounds come from the samples of every run in the batch rather than
    /// from each run alone
    #[serde(default)]
    pub pooled: bool,
    #[serde(flatten)]
    pub policy: FilterPolicy,
}

impl MetricFilter {
    pub fn new(metric: Metric, policy: FilterPolicy) -> Self {
        MetricFilter { metric, pooled: false, policy }
    }

    pub fn pooled(metric: Metric, policy: FilterPolicy) -> Self {
        MetricFilter { metric, pooled: true, policy }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Moving-average window in samples (<= 1 disables smoothing)
    pub smoothing_window: usize,
    pub missing_values: MissingValues,
    pub coordinate: Coordinate,
    /// Smooth over this span of the coordinate axis instead of a sample count
    pub coordinate_window: Option<f64>,
    /// Applied jointly: a sample survives only if it passes every entry
    pub filters: Vec<MetricFilter>,
    pub band_upper_quantile: f64,
    pub band_lower_quantile: f64,
    pub min_group_size: usize,
    /// Cadence bucket width used as the band grouping key (0 = whole numbers)
    pub cadence_bucket_spm: f64,
    /// Target cadence band as fractions above the mean
    pub target_cadence_low: f64,
    pub target_cadence_high: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            smoothing_window: 10,
            missing_values: MissingValues::Skip,
            coordinate: Coordinate::Distance,
            coordinate_window: None,
            filters: vec![
                MetricFilter::new(Metric::Cadence, FilterPolicy::default_iqr()),
                MetricFilter::new(Metric::StrideLength, FilterPolicy::default_iqr()),
            ],
            band_upper_quantile: 0.9,
            band_lower_quantile: 0.1,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
            cadence_bucket_spm: 1.0,
            target_cadence_low: 0.05,
            target_cadence_high: 0.10,
        }
    }
}

impl PipelineConfig {
    /// Single-run cadence chart: cadence within 15% of its mean, window 10
    pub fn cadence_chart() -> Self {
        PipelineConfig {
            filters: vec![MetricFilter::new(
                Metric::Cadence,
                FilterPolicy::PercentOfMean { threshold: 0.15 },
            )],
            ..Default::default()
        }
    }

    /// Scatter/brushing table: IQR fence on every metric (distance included)
    /// plus cadence within 20% of mean
    pub fn scatter() -> Self {
        let mut filters: Vec<MetricFilter> = Metric::ALL
            .iter()
            .map(|&metric| MetricFilter::new(metric, FilterPolicy::default_iqr()))
            .collect();
        filters.push(MetricFilter::new(
            Metric::Cadence,
            FilterPolicy::PercentOfMean { threshold: 0.2 },
        ));

        PipelineConfig {
            smoothing_window: 1,
            filters,
            ..Default::default()
        }
    }

    /// Multi-run comparison: cadence ±20 SPM and pace ±10 min/km around the
    /// means pooled over all runs, window 20
    pub fn multi_run() -> Self {
        PipelineConfig {
            smoothing_window: 20,
            filters: vec![
                MetricFilter::pooled(
                    Metric::Cadence,
                    FilterPolicy::AbsoluteDeviation { max_abs_delta: 20.0 },
                ),
                MetricFilter::pooled(
                    Metric::Pace,
                    FilterPolicy::AbsoluteDeviation { max_abs_delta: 10.0 },
                ),
            ],
            ..Default::default()
        }
    }

    pub fn from_preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "cadence-chart" => Some(Self::cadence_chart()),
            "scatter" => Some(Self::scatter()),
            "multi-run" => Some(Self::multi_run()),
            _ => None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let quantile = 0.0..=1.0;
        if !quantile.contains(&self.band_upper_quantile)
            || !quantile.contains(&self.band_lower_quantile)
        {
            return Err(TelemetryError::InvalidParameter(format!(
                "band quantiles must lie in [0, 1], got {} and {}",
                self.band_lower_quantile, self.band_upper_quantile
            )));
        }
        if self.band_lower_quantile > self.band_upper_quantile {
            return Err(TelemetryError::InvalidParameter(
                "band_lower_quantile exceeds band_upper_quantile".to_string(),
            ));
        }
        if !(self.cadence_bucket_spm >= 0.0) {
            return Err(TelemetryError::InvalidParameter(format!(
                "cadence_bucket_spm must be >= 0, got {}",
                self.cadence_bucket_spm
            )));
        }
        if self.target_cadence_low > self.target_cadence_high {
            return Err(TelemetryError::InvalidParameter(
                "target_cadence_low exceeds target_cadence_high".to_string(),
            ));
        }
        if let Some(window) = self.coordinate_window {
            if !(window > 0.0) {
                return Err(TelemetryError::InvalidParameter(format!(
                    "coordinate_window must be > 0, got {}",
                    window
                )));
            }
        }

        for filter in &self.filters {
            match filter.policy {
                FilterPolicy::PercentOfMean { threshold } if !(threshold >= 0.0) => {
                    return Err(TelemetryError::InvalidParameter(format!(
                        "{} threshold must be >= 0",
                        filter.metric.column()
                    )));
                }
                FilterPolicy::Iqr { lower_quantile, upper_quantile, multiplier }
                    if !quantile.contains(&lower_quantile)
                        || !quantile.contains(&upper_quantile)
                        || lower_quantile > upper_quantile
                        || !(multiplier >= 0.0) =>
                {
                    return Err(TelemetryError::InvalidParameter(format!(
                        "{} IQR parameters out of range",
                        filter.metric.column()
                    )));
                }
                FilterPolicy::AbsoluteDeviation { max_abs_delta } if !(max_abs_delta >= 0.0) => {
                    return Err(TelemetryError::InvalidParameter(format!(
                        "{} max_abs_delta must be >= 0",
                        filter.metric.column()
                    )));
                }
                FilterPolicy::Range { min, max } if !(min <= max) => {
                    return Err(TelemetryError::InvalidParameter(format!(
                        "{} range min {} exceeds max {}",
                        filter.metric.column(),
                        min,
                        max
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}
