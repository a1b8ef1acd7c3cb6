//! Discovery and evaluation of per-sensor forecasting artifacts.
//!
//! Artifacts live at `{root}/{line}/prophet_{sensor}.pkl` and are opaque to
//! this crate. A [`ModelLoader`] turns an artifact path into a
//! [`ForecastModel`] that maps one timestamp to a [`Prediction`].

use std::{
    collections::BTreeSet,
    fs,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::Arc,
};

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::error::ModelError;
use crate::models::{Prediction, TIMESTAMP_FORMAT};

// ---

const ARTIFACT_PREFIX: &str = "prophet_";
const ARTIFACT_SUFFIX: &str = ".pkl";

/// A loaded artifact.
pub trait ForecastModel: Send {
    fn predict(&mut self, at: NaiveDateTime) -> Result<Prediction, ModelError>;
}

/// Loads an artifact from disk.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn ForecastModel>, ModelError>;
}

/// Locates artifacts under a storage root and evaluates them.
#[derive(Clone)]
pub struct ForecastModelStore {
    root: PathBuf,
    loader: Arc<dyn ModelLoader>,
}

impl ForecastModelStore {
    // ---
    pub fn new(root: impl Into<PathBuf>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            root: root.into(),
            loader,
        }
    }

    pub fn artifact_path(&self, line_id: &str, sensor_id: &str) -> PathBuf {
        self.root
            .join(line_id)
            .join(format!("{ARTIFACT_PREFIX}{sensor_id}{ARTIFACT_SUFFIX}"))
    }

    /// Sorted sensor ids with an artifact for `line_id`.
    ///
    /// A missing or unreadable directory yields an empty list.
    pub fn detect_sensors(&self, line_id: &str) -> Vec<String> {
        // ---
        let dir = self.root.join(line_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("No model directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let sensors: BTreeSet<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let sensor = name
                    .strip_prefix(ARTIFACT_PREFIX)?
                    .strip_suffix(ARTIFACT_SUFFIX)?;
                (!sensor.is_empty()).then(|| sensor.to_string())
            })
            .collect();

        sensors.into_iter().collect()
    }

    /// Forecast a single timestamp, loading the artifact for this call only.
    pub fn forecast(&self, line_id: &str, sensor_id: &str, at: NaiveDateTime) -> Option<Prediction> {
        self.forecast_series(line_id, sensor_id, &[at])
            .pop()
            .flatten()
    }

    /// Forecast every timestamp with one loaded artifact.
    ///
    /// The result is aligned with `timestamps`; failed points are `None`.
    pub fn forecast_series(
        &self,
        line_id: &str,
        sensor_id: &str,
        timestamps: &[NaiveDateTime],
    ) -> Vec<Option<Prediction>> {
        // ---
        let path = self.artifact_path(line_id, sensor_id);
        let mut model = match self.loader.load(&path) {
            Ok(model) => model,
            Err(e) => {
                tracing::error!("Failed to load model {}: {}", path.display(), e);
                return vec![None; timestamps.len()];
            }
        };

        timestamps
            .iter()
            .map(|&at| match model.predict(at) {
                Ok(prediction) => Some(prediction),
                Err(e) => {
                    tracing::warn!(
                        "Forecast failed for {}/{} at {}: {}",
                        line_id,
                        sensor_id,
                        at.format(TIMESTAMP_FORMAT),
                        e
                    );
                    None
                }
            })
            .collect()
    }
}

/// Evaluates artifacts through an external predictor process.
///
/// The command is started with the artifact path appended to its arguments.
/// For each prediction it receives one `YYYY-MM-DD HH:MM:SS` line on stdin
/// and answers one JSON line, `{"yhat", "yhat_lower", "yhat_upper"}` or
/// `{"error"}`.
#[derive(Debug, Clone)]
pub struct CommandModelLoader {
    program: String,
    args: Vec<String>,
}

impl CommandModelLoader {
    // ---
    /// Split a command line such as `python3 predict.py` on whitespace.
    pub fn from_command_line(command: &str) -> Option<Self> {
        // ---
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl ModelLoader for CommandModelLoader {
    // ---
    fn load(&self, path: &Path) -> Result<Box<dyn ForecastModel>, ModelError> {
        // ---
        if !path.is_file() {
            return Err(ModelError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ModelError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ModelError::prediction("predictor pipes unavailable"));
        };

        Ok(Box::new(CommandModel {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        }))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PredictorReply {
    Forecast(Prediction),
    Failure { error: String },
}

struct CommandModel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ForecastModel for CommandModel {
    // ---
    fn predict(&mut self, at: NaiveDateTime) -> Result<Prediction, ModelError> {
        // ---
        writeln!(self.stdin, "{}", at.format(TIMESTAMP_FORMAT))?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(ModelError::prediction("predictor exited"));
        }
        parse_reply(&line)
    }
}

impl Drop for CommandModel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn parse_reply(line: &str) -> Result<Prediction, ModelError> {
    // ---
    match serde_json::from_str::<PredictorReply>(line.trim()) {
        Ok(PredictorReply::Forecast(p)) => Ok(p),
        Ok(PredictorReply::Failure { error }) => Err(ModelError::Prediction(error)),
        Err(e) => Err(ModelError::prediction(format!("malformed reply '{}': {e}", line.trim()))),
    }
}
