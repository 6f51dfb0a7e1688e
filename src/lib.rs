//! Signal processing for running telemetry.
//!
//! Turns aligned per-sample series (cadence, stride length, pace, power,
//! heart rate, elevation) into cleaned and derived series for a separate
//! presentation layer: outlier masks, moving averages, joined records,
//! regression lines, quantile bands and normalized radar axes.
//!
//! Every operation is a pure function over borrowed series. Nothing is
//! cached between calls and caller data is never reordered.

pub mod batch;
pub mod config;
pub mod error;
pub mod join;
pub mod normalizer;
pub mod outlier_filter;
pub mod pipeline;
pub mod quantile_binner;
pub mod regressor;
pub mod run;
pub mod series_stats;
pub mod smoother;

pub use config::{MetricFilter, PipelineConfig};
pub use error::{Result, TelemetryError};
pub use join::{join, join_masked, Coordinate, JoinedRecord};
pub use normalizer::{normalize, Orientation};
pub use outlier_filter::{filter, filter_joint, FilterPolicy};
pub use pipeline::{process_run, RunReport};
pub use quantile_binner::{bandify, QuantileBand, QuantileBands};
pub use regressor::{fit_line, RegressionLine};
pub use run::{Metric, Run, Sample};
pub use series_stats::{iqr_bounds, mean, quantile_at, Bounds};
pub use smoother::{moving_average, MissingValues};
