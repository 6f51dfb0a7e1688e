use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Statistic requested on an empty series")]
    EmptyInput,

    #[error("Misaligned series: expected {expected} samples, found {found}")]
    MisalignedSeries { expected: usize, found: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Degenerate range: min {min} equals max {max}")]
    DegenerateRange { min: f64, max: f64 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
