//! Error types shared by the simulator, the forecast job and the stores.

use std::path::PathBuf;

use thiserror::Error;

/// Lookup or validation failure against the sensor range table.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    // ---
    #[error("unknown line: {0}")]
    UnknownLine(String),

    #[error("unknown sensor {sensor} on {line}")]
    UnknownSensor { line: String, sensor: String },

    #[error("invalid identifier '{0}': expected [a-z_][a-z0-9_]* up to 63 bytes")]
    InvalidIdentifier(String),

    #[error("duplicate identifier '{0}'")]
    Duplicate(String),

    #[error("line {0} has no sensors")]
    EmptyLine(String),

    #[error("invalid range for {line}.{sensor}: expected min <= avg <= max, got {min} / {avg} / {max}")]
    InvalidRange {
        line: String,
        sensor: String,
        avg: f64,
        min: f64,
        max: f64,
    },

    #[error("bound {value} of {line}.{sensor} has more than 2 decimals")]
    BoundPrecision {
        line: String,
        sensor: String,
        value: f64,
    },

    #[error("failed to parse sensor ranges: {0}")]
    Parse(String),
}

/// Failure talking to the relational store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    // ---
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure loading or evaluating a forecasting artifact.
#[derive(Debug, Error)]
pub enum ModelError {
    // ---
    #[error("model artifact not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to start predictor for {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("predictor io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prediction failed: {0}")]
    Prediction(String),
}

impl ModelError {
    // ---
    pub fn prediction(reason: impl Into<String>) -> Self {
        Self::Prediction(reason.into())
    }
}
