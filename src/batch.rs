/// Folder processing for exported sample tables
///
/// Each `.csv` under the input folder holds one run, one row per sample:
///
/// ```text
/// distance_km,elapsed_s,timestamp,cadence,stride_length,pace,power,heart_rate,elevation
/// ```
///
/// Only `distance_km` is required. Empty cells are missing readings, and a
/// metric column left out of the header is absent from the run. Runs are
/// named by their path below the input folder, and per-run outputs by that
/// path with `/` replaced by `__`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, Trim, Writer};
use log::{error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::error::{Result, TelemetryError};
use crate::normalizer;
use crate::outlier_filter;
use crate::pipeline::{self, RunReport};
use crate::regressor;
use crate::run::{format_pace, Metric, Run, Sample};

pub const SUMMARY_FILE: &str = "run_summary.csv";
pub const RADAR_FILE: &str = "radar_comparison.csv";

#[derive(Debug, Deserialize)]
struct SampleRow {
    distance_km: f64,
    #[serde(default)]
    elapsed_s: Option<f64>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    cadence: Option<f64>,
    #[serde(default)]
    stride_length: Option<f64>,
    #[serde(default)]
    pace: Option<f64>,
    #[serde(default)]
    power: Option<f64>,
    #[serde(default)]
    heart_rate: Option<f64>,
    #[serde(default)]
    elevation: Option<f64>,
}

impl SampleRow {
    fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Cadence => self.cadence,
            Metric::StrideLength => self.stride_length,
            Metric::Pace => self.pace,
            Metric::Power => self.power,
            Metric::HeartRate => self.heart_rate,
            Metric::Elevation => self.elevation,
            Metric::Distance => Some(self.distance_km),
        }
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| TelemetryError::InvalidTimestamp { value: value.to_string(), source })
}

/// Reads one sample table into a run named after the file.
///
/// Elapsed time falls back to seconds since the first timestamp, then to the
/// sample index at 1 Hz.
pub fn read_run(path: &Path) -> Result<Run> {
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(file);
    let headers = rdr.headers()?.clone();
    let present: Vec<Metric> = Metric::RECORDED
        .iter()
        .copied()
        .filter(|m| headers.iter().any(|h| h == m.column()))
        .collect();

    let mut rows = Vec::new();
    let mut timestamps = Vec::new();
    for result in rdr.deserialize::<SampleRow>() {
        let row = result?;
        timestamps.push(match row.timestamp.as_deref() {
            Some(t) if !t.is_empty() => Some(parse_timestamp(t)?),
            _ => None,
        });
        rows.push(row);
    }

    let start = timestamps.iter().flatten().min().copied();
    let samples: Vec<Sample> = rows
        .iter()
        .zip(timestamps.iter())
        .enumerate()
        .map(|(index, (row, ts))| Sample {
            index,
            distance_km: row.distance_km,
            elapsed_s: match (row.elapsed_s, ts, start) {
                (Some(s), _, _) => s,
                (None, Some(t), Some(first)) => (*t - first).num_milliseconds() as f64 / 1000.0,
                _ => index as f64,
            },
            values: present.iter().map(|&m| (m, row.value(m))).collect(),
        })
        .collect();

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    Run::from_samples(filename, start, &samples)
}

#[derive(Debug, Serialize)]
struct BandRow {
    cadence_spm: f64,
    stride_upper_mm: f64,
    stride_lower_mm: f64,
    stride_trend_mm: Option<f64>,
}

#[derive(Debug, Serialize)]
struct BoxRow {
    km: i64,
    metric: Metric,
    count: usize,
    whisker_low: f64,
    q1: f64,
    median: f64,
    q3: f64,
    whisker_high: f64,
    outliers: usize,
}

#[derive(Debug, Serialize)]
struct CorrelationRow {
    x: Metric,
    y: Metric,
    value: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RadarRow {
    run: String,
    metric: Metric,
    unit: &'static str,
    raw: f64,
    normalized: Option<f64>,
    display: String,
    total_distance_km: f64,
}

#[derive(Debug, Serialize, Default)]
pub struct RunSummaryRow {
    pub filename: String,
    pub start: Option<String>,
    pub samples: usize,
    pub kept: usize,
    pub kept_percent: f64,
    pub distance_km: f64,
    pub elevation_gain_m: f64,
    pub cadence_mean: Option<f64>,
    pub cadence_trimmed_mean: Option<f64>,
    pub target_cadence_min: Option<f64>,
    pub target_cadence_max: Option<f64>,
    pub pace_trimmed_mean: Option<f64>,
    /// `m:ss` per km
    pub pace: Option<String>,
    pub stride_slope: Option<f64>,
    pub stride_intercept: Option<f64>,
    pub stride_cadence_r: Option<f64>,
    pub band_groups: usize,
    pub status: String,
}

impl RunSummaryRow {
    fn from_report(run: &Run, report: &RunReport) -> Self {
        RunSummaryRow {
            filename: report.filename.clone(),
            start: run.start().map(|s| s.to_rfc3339()),
            samples: report.total_samples,
            kept: report.kept.len(),
            kept_percent: report.kept_ratio() * 100.0,
            distance_km: report.total_distance_km,
            elevation_gain_m: report.elevation_gain_m,
            cadence_mean: report.cadence.as_ref().map(|c| c.mean),
            cadence_trimmed_mean: report.cadence.as_ref().map(|c| c.trimmed_mean),
            target_cadence_min: report.cadence.as_ref().map(|c| c.target.min),
            target_cadence_max: report.cadence.as_ref().map(|c| c.target.max),
            pace_trimmed_mean: report.pace_trimmed_mean,
            pace: report.pace_trimmed_mean.map(format_pace),
            stride_slope: report.stride_vs_cadence.map(|l| l.slope),
            stride_intercept: report.stride_vs_cadence.map(|l| l.intercept),
            stride_cadence_r: report.stride_cadence_correlation,
            band_groups: report.stride_bands.as_ref().map_or(0, |b| b.upper.len()),
            status: "ok".to_string(),
        }
    }

    fn failed(filename: String, error: &TelemetryError) -> Self {
        RunSummaryRow {
            filename,
            status: format!("error: {}", error),
            ..Default::default()
        }
    }
}

/// Path of `path` below `root` with `/` separators, or the bare file name
/// when `path` lies elsewhere.
fn relative_name(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

fn output_stem(name: &str) -> String {
    Path::new(name)
        .with_extension("")
        .to_string_lossy()
        .replace('/', "__")
}

fn write_smoothed(
    report: &RunReport,
    run: &Run,
    config: &PipelineConfig,
    path: &Path,
) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    let metrics: Vec<Metric> = run.metrics().collect();

    let mut header = vec!["index", config.coordinate.column()];
    header.extend(metrics.iter().map(|m| m.column()));
    wtr.write_record(&header)?;

    for record in &report.records {
        let mut fields = vec![record.index.to_string(), record.coordinate.to_string()];
        fields.extend(metrics.iter().map(|&m| match record.value(m) {
            Some(v) if !v.is_nan() => v.to_string(),
            _ => String::new(),
        }));
        wtr.write_record(&fields)?;
    }

    wtr.flush()?;
    Ok(())
}

fn write_bands(report: &RunReport, path: &Path) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    if let Some(bands) = &report.stride_bands {
        for (upper, lower) in bands.upper.iter().zip(bands.lower.iter()) {
            wtr.serialize(BandRow {
                cadence_spm: upper.key,
                stride_upper_mm: upper.value,
                stride_lower_mm: lower.value,
                stride_trend_mm: report.stride_vs_cadence.map(|line| line.predict(upper.key)),
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

fn write_boxplot(report: &RunReport, path: &Path) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    for b in &report.boxplots {
        wtr.serialize(BoxRow {
            km: b.km,
            metric: b.metric,
            count: b.summary.count,
            whisker_low: b.summary.whisker_low,
            q1: b.summary.q1,
            median: b.summary.median,
            q3: b.summary.q3,
            whisker_high: b.summary.whisker_high,
            outliers: b.summary.outliers,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_correlations(run: &Run, keep: &[usize], path: &Path) -> Result<()> {
    let masked: Vec<(Metric, Vec<f64>)> = run
        .metrics()
        .filter_map(|m| run.series(m).map(|s| (m, s)))
        .map(|(m, s)| outlier_filter::apply_mask(s, keep).map(|v| (m, v)))
        .collect::<Result<_>>()?;
    let series: Vec<(Metric, &[f64])> = masked.iter().map(|(m, v)| (*m, v.as_slice())).collect();

    let mut wtr = Writer::from_path(path)?;
    for cell in regressor::correlation_matrix(&series)? {
        wtr.serialize(CorrelationRow { x: cell.x, y: cell.y, value: cell.value })?;
    }
    wtr.flush()?;
    Ok(())
}

fn process_loaded(run: &Run, output_folder: &Path, config: &PipelineConfig) -> Result<RunReport> {
    let report = pipeline::process_run(run, config)?;

    let stem = output_stem(run.filename());
    let output = |suffix: &str| output_folder.join(format!("{}_{}.csv", stem, suffix));
    write_smoothed(&report, run, config, &output("smoothed"))?;
    write_bands(&report, &output("bands"))?;
    write_boxplot(&report, &output("boxplot"))?;
    write_correlations(run, &report.kept, &output("correlation"))?;

    Ok(report)
}

/// Sample tables under `input_folder`, sorted, never descending into
/// `output_folder`. Both folders are compared in canonical form.
pub fn collect_sample_tables(input_folder: &Path, output_folder: &Path) -> Result<Vec<PathBuf>> {
    let input_root = fs::canonicalize(input_folder)?;
    let output_root =
        fs::canonicalize(output_folder).unwrap_or_else(|_| output_folder.to_path_buf());

    let mut files = Vec::new();
    let walker = WalkDir::new(&input_root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.path() != output_root.as_path());
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(extension) = entry.path().extension() {
            if extension.to_str().unwrap_or("").to_lowercase() == "csv" {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub summary_path: PathBuf,
    pub radar_path: Option<PathBuf>,
}

/// Reads every run, resolves pooled filters across the readable ones, then
/// processes runs in parallel. A run that fails only fails its own row.
pub fn process_folder(
    input_folder: &Path,
    output_folder: &Path,
    config: &PipelineConfig,
) -> Result<BatchSummary> {
    config.validate()?;
    fs::create_dir_all(output_folder)?;
    let input_root = fs::canonicalize(input_folder)?;

    let files = collect_sample_tables(&input_root, output_folder)?;
    info!("Found {} sample tables in {}", files.len(), input_folder.display());
    info!("Using parallel processing on {} cores", num_cpus::get());

    let loaded: Vec<(String, Result<Run>)> = files
        .par_iter()
        .map(|path| {
            let name = relative_name(&input_root, path);
            let run = read_run(path).map(|run| run.with_filename(name.clone()));
            (name, run)
        })
        .collect();

    let mut rows = Vec::with_capacity(loaded.len());
    let mut runs = Vec::new();
    let mut stems: BTreeMap<String, String> = BTreeMap::new();
    for (name, loaded) in loaded {
        let checked = loaded.and_then(|run| {
            let stem = output_stem(&name);
            if let Some(first) = stems.get(&stem) {
                return Err(TelemetryError::InvalidParameter(format!(
                    "output name '{}' is already used by {}",
                    stem, first
                )));
            }
            stems.insert(stem, name.clone());
            Ok(run)
        });
        match checked {
            Ok(run) => runs.push(run),
            Err(e) => {
                error!("{}: {}", name, e);
                rows.push(RunSummaryRow::failed(name, &e));
            }
        }
    }

    let config = pipeline::resolve_pooled_filters(config, &runs)?;
    let outcomes: Vec<Result<RunReport>> = runs
        .par_iter()
        .map(|run| process_loaded(run, output_folder, &config))
        .collect();

    let mut processed = Vec::with_capacity(runs.len());
    for (run, outcome) in runs.into_iter().zip(outcomes) {
        match outcome {
            Ok(report) => {
                rows.push(RunSummaryRow::from_report(&run, &report));
                processed.push(run);
            }
            Err(e) => {
                error!("{}: {}", run.filename(), e);
                rows.push(RunSummaryRow::failed(run.filename().to_string(), &e));
            }
        }
    }
    rows.sort_by(|a, b| a.filename.cmp(&b.filename));

    let summary_path = output_folder.join(SUMMARY_FILE);
    let mut wtr = Writer::from_path(&summary_path)?;
    for row in &rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;

    let radar_path = if processed.is_empty() {
        warn!("No run processed successfully, radar comparison skipped");
        None
    } else {
        let path = output_folder.join(RADAR_FILE);
        write_radar(&processed, &path)?;
        Some(path)
    };

    let failed = rows.len() - processed.len();
    info!("Processed {} runs, {} failed", processed.len(), failed);

    Ok(BatchSummary {
        processed: processed.len(),
        failed,
        summary_path,
        radar_path,
    })
}

fn display_value(metric: Metric, raw: f64) -> String {
    match metric {
        Metric::Pace => format!("{} /km", format_pace(raw)),
        _ => format!("{:.1} {}", raw, metric.unit()),
    }
}

fn write_radar(runs: &[Run], path: &Path) -> Result<()> {
    let ranges = normalizer::global_ranges(runs, &Metric::ALL);
    let mut wtr = Writer::from_path(path)?;
    for run in runs {
        let profile = normalizer::radar_profile(run, &ranges);
        for axis in profile.axes {
            wtr.serialize(RadarRow {
                run: profile.name.clone(),
                metric: axis.metric,
                unit: axis.metric.unit(),
                raw: axis.raw,
                normalized: axis.normalized,
                display: display_value(axis.metric, axis.raw),
                total_distance_km: profile.total_distance_km,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_run_with_gaps_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("easy_run.csv");
        fs::write(
            &path,
            "distance_km,timestamp,cadence,heart_rate\n\
             0.0,2024-04-15T09:30:00Z,170,140\n\
             0.003,2024-04-15T09:30:01Z,,141\n\
             0.006,2024-04-15T09:30:02Z,172,\n",
        )
        .unwrap();

        let run = read_run(&path).unwrap();
        assert_eq!(run.filename(), "easy_run.csv");
        assert_eq!(run.len(), 3);
        assert_eq!(run.metrics().collect::<Vec<_>>(), vec![Metric::Cadence, Metric::HeartRate]);
        assert!(run.series(Metric::Cadence).unwrap()[1].is_nan());
        assert!(run.series(Metric::HeartRate).unwrap()[2].is_nan());
        assert_eq!(run.elapsed_s(), &[0.0, 1.0, 2.0]);
        assert_eq!(run.display_name(), "Run from 15.04.2024");
    }

    #[test]
    fn test_read_run_trims_headers_and_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("padded.csv");
        fs::write(&path, "distance_km, cadence , pace\n0.0, 170 ,5.5\n0.01,171, 5.4\n").unwrap();

        let run = read_run(&path).unwrap();
        assert_eq!(run.series(Metric::Cadence).unwrap(), &[170.0, 171.0]);
        assert_eq!(run.series(Metric::Pace).unwrap(), &[5.5, 5.4]);
    }

    #[test]
    fn test_read_run_without_time_uses_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_time.csv");
        fs::write(&path, "distance_km,pace\n0.0,5.5\n0.01,5.4\n").unwrap();

        let run = read_run(&path).unwrap();
        assert_eq!(run.elapsed_s(), &[0.0, 1.0]);
        assert!(run.start().is_none());
    }

    #[test]
    fn test_read_run_bad_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "distance_km,timestamp\n0.0,yesterday\n").unwrap();
        assert!(matches!(read_run(&path), Err(TelemetryError::InvalidTimestamp { .. })));
    }

    #[test]
    fn test_collect_skips_output_folder() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(dir.path().join("b.csv"), "distance_km\n0\n").unwrap();
        fs::write(dir.path().join("a.CSV"), "distance_km\n0\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(out.join("a_smoothed.csv"), "x").unwrap();

        let files = collect_sample_tables(dir.path(), &out).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[test]
    fn test_collect_skips_output_folder_through_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(dir.path().join("run.csv"), "distance_km\n0\n").unwrap();
        fs::write(out.join("run_smoothed.csv"), "distance_km\n0\n").unwrap();

        // same folders, spelled differently
        let input = dir.path().join("sub").join("..");
        let output = dir.path().join(".").join("sub").join("..").join("out");
        let files = collect_sample_tables(&input, &output).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("run.csv"));
    }

    #[test]
    fn test_relative_name_and_stem() {
        let root = Path::new("/data/runs");
        assert_eq!(relative_name(root, Path::new("/data/runs/a/run.csv")), "a/run.csv");
        assert_eq!(relative_name(root, Path::new("/elsewhere/run.csv")), "run.csv");
        assert_eq!(output_stem("a/run.csv"), "a__run");
        assert_eq!(output_stem("tempo.csv"), "tempo");
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(Metric::Pace, 5.5), "5:30 /km");
        assert_eq!(display_value(Metric::Cadence, 171.26), "171.3 SPM");
        assert_eq!(display_value(Metric::Distance, 10.04), "10.0 km");
    }
}
