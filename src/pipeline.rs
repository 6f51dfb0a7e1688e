/// Per-run processing
///
/// Chains masking, joining, smoothing, regression and banding into one
/// report per run. Every optional product is skipped on its own, so one
/// undefined chart never fails the whole run.

use std::collections::BTreeMap;
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{MetricFilter, PipelineConfig};
use crate::error::Result;
use crate::join::{self, JoinedRecord};
use crate::outlier_filter::{self, FilterPolicy};
use crate::quantile_binner::{self, QuantileBands};
use crate::regressor::{self, RegressionLine};
use crate::run::{Metric, Run};
use crate::series_stats::{self, BoxSummary, Bounds};
use crate::smoother;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CadenceSummary {
    pub mean: f64,
    pub trimmed_mean: f64,
    /// `[mean * (1 + low), mean * (1 + high)]`
    pub target: Bounds,
}

/// Box summary of one metric over one kilometre. `km` 1 covers `[0, 1)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KmBox {
    pub metric: Metric,
    pub km: i64,
    pub summary: BoxSummary,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub filename: String,
    pub total_samples: usize,
    /// Source indices that passed the joint outlier mask.
    pub kept: Vec<usize>,
    /// Smoothed records over the kept samples, one per kept index.
    pub records: Vec<JoinedRecord>,
    pub stride_vs_cadence: Option<RegressionLine>,
    pub stride_cadence_correlation: Option<f64>,
    pub stride_bands: Option<QuantileBands>,
    pub cadence: Option<CadenceSummary>,
    /// Trimmed mean of the kept pace, min/km.
    pub pace_trimmed_mean: Option<f64>,
    /// Per-km boxes of kept cadence then kept stride length.
    pub boxplots: Vec<KmBox>,
    pub elevation_gain_m: f64,
    pub total_distance_km: f64,
}

impl RunReport {
    pub fn kept_ratio(&self) -> f64 {
        if self.total_samples == 0 {
            0.0
        } else {
            self.kept.len() as f64 / self.total_samples as f64
        }
    }
}

/// Joint keep-mask over the configured filters. Filters on metrics the run
/// lacks, or that hold no readings, are skipped.
pub fn joint_mask(run: &Run, config: &PipelineConfig) -> Result<Vec<usize>> {
    let criteria: Vec<(&[f64], FilterPolicy)> = config
        .filters
        .iter()
        .filter_map(|f| match run.series(f.metric) {
            Some(series) if series.iter().any(|v| !v.is_nan()) => Some((series, f.policy)),
            _ => {
                debug!("{}: no {} readings, filter skipped", run.filename(), f.metric.column());
                None
            }
        })
        .collect();

    if criteria.is_empty() {
        return Ok((0..run.len()).collect());
    }
    outlier_filter::filter_joint(&criteria)
}

/// Replaces every pooled filter with a fixed `Range` computed over the
/// samples of all `runs`. Pooled filters on a metric no run carries are
/// dropped.
pub fn resolve_pooled_filters(config: &PipelineConfig, runs: &[Run]) -> Result<PipelineConfig> {
    let mut filters = Vec::with_capacity(config.filters.len());
    for filter in &config.filters {
        if !filter.pooled {
            filters.push(*filter);
            continue;
        }
        let pooled: Vec<f64> = runs
            .iter()
            .filter_map(|run| run.series(filter.metric))
            .flat_map(|series| series.iter().copied())
            .filter(|v| !v.is_nan())
            .collect();
        if pooled.is_empty() {
            debug!(
                "No {} readings across {} runs, pooled filter dropped",
                filter.metric.column(),
                runs.len()
            );
            continue;
        }

        let bounds = filter.policy.bounds(&pooled)?;
        debug!(
            "Pooled {} band [{:.2}, {:.2}] over {} samples",
            filter.metric.column(),
            bounds.min,
            bounds.max,
            pooled.len()
        );
        filters.push(MetricFilter::new(
            filter.metric,
            FilterPolicy::Range { min: bounds.min, max: bounds.max },
        ));
    }

    Ok(PipelineConfig { filters, ..config.clone() })
}

/// Masked join smoothed column by column.
pub fn smoothed_records(
    run: &Run,
    keep: &[usize],
    config: &PipelineConfig,
) -> Result<Vec<JoinedRecord>> {
    let coordinate = config.coordinate.values(run);
    let series: Vec<(Metric, &[f64])> = run
        .metrics()
        .filter_map(|m| run.series(m).map(|s| (m, s)))
        .collect();
    let mut records = join::join_masked(&series, &coordinate, keep)?;
    let coordinates: Vec<f64> = records.iter().map(|r| r.coordinate).collect();

    for (metric, _) in &series {
        let column = join::column(&records, *metric);
        let smoothed = match config.coordinate_window {
            Some(window) => smoother::rolling_distance_average(&coordinates, &column, window)?,
            None => smoother::moving_average_with(
                &column,
                config.smoothing_window,
                config.missing_values,
            ),
        };
        for (record, value) in records.iter_mut().zip(smoothed) {
            record.values.insert(*metric, value);
        }
    }

    Ok(records)
}

/// Boxes of `metric` over the kept samples, one per kilometre reached.
pub fn km_boxes(run: &Run, keep: &[usize], metric: Metric) -> Vec<KmBox> {
    let Some(series) = run.series(metric) else {
        return Vec::new();
    };
    let distance = run.distance_km();

    let mut by_km: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for &i in keep {
        let (Some(&d), Some(&v)) = (distance.get(i), series.get(i)) else {
            continue;
        };
        if d.is_finite() && !v.is_nan() {
            by_km.entry(d.floor() as i64 + 1).or_default().push(v);
        }
    }

    by_km
        .into_iter()
        .filter_map(|(km, values)| {
            series_stats::box_summary(&values)
                .ok()
                .map(|summary| KmBox { metric, km, summary })
        })
        .collect()
}

// Target band follows the unfiltered cadence mean.
fn cadence_summary(cadence: &[f64], config: &PipelineConfig) -> Option<CadenceSummary> {
    let trimmed_mean = series_stats::trimmed_mean(cadence).ok()?;
    let mean = series_stats::mean(cadence);
    Some(CadenceSummary {
        mean,
        trimmed_mean,
        target: Bounds {
            min: mean * (1.0 + config.target_cadence_low),
            max: mean * (1.0 + config.target_cadence_high),
        },
    })
}

pub fn process_run(run: &Run, config: &PipelineConfig) -> Result<RunReport> {
    let keep = joint_mask(run, config)?;
    debug!("{}: {} of {} samples kept", run.filename(), keep.len(), run.len());

    let records = smoothed_records(run, &keep, config)?;

    let kept = |metric: Metric| {
        run.series(metric)
            .map(|s| outlier_filter::apply_mask(s, &keep))
            .transpose()
    };
    let kept_cadence = kept(Metric::Cadence)?;
    let kept_stride = kept(Metric::StrideLength)?;
    let kept_pace = kept(Metric::Pace)?;

    let mut stride_vs_cadence = None;
    let mut stride_cadence_correlation = None;
    let mut stride_bands = None;

    if let (Some(cadence), Some(stride)) = (&kept_cadence, &kept_stride) {
        match regressor::fit_line(cadence, stride) {
            Ok(line) => stride_vs_cadence = Some(line),
            Err(e) => warn!("{}: stride/cadence regression skipped: {}", run.filename(), e),
        }
        stride_cadence_correlation = regressor::pearson(cadence, stride).ok();

        let pairs: Vec<(f64, f64)> = cadence.iter().copied().zip(stride.iter().copied()).collect();
        let bands = quantile_binner::bandify(
            &pairs,
            quantile_binner::rounded_key(config.cadence_bucket_spm),
            config.band_upper_quantile,
            config.band_lower_quantile,
            config.min_group_size,
        )?;
        if bands.is_empty() {
            warn!(
                "{}: no cadence group reached {} samples, stride bands skipped",
                run.filename(),
                config.min_group_size
            );
        } else {
            stride_bands = Some(bands);
        }
    }

    let cadence = run.series(Metric::Cadence).and_then(|c| cadence_summary(c, config));
    let pace_trimmed_mean = kept_pace.as_deref().and_then(|p| series_stats::trimmed_mean(p).ok());
    let mut boxplots = km_boxes(run, &keep, Metric::Cadence);
    boxplots.extend(km_boxes(run, &keep, Metric::StrideLength));
    let elevation_gain_m = run.series(Metric::Elevation).map_or(0.0, series_stats::elevation_gain);

    let report = RunReport {
        filename: run.filename().to_string(),
        total_samples: run.len(),
        kept: keep,
        records,
        stride_vs_cadence,
        stride_cadence_correlation,
        stride_bands,
        cadence,
        pace_trimmed_mean,
        boxplots,
        elevation_gain_m,
        total_distance_km: run.total_distance_km(),
    };

    info!(
        "{}: {:.2} km, {:.0} m gain, {:.1}% samples kept",
        report.filename,
        report.total_distance_km,
        report.elevation_gain_m,
        report.kept_ratio() * 100.0
    );

    Ok(report)
}
