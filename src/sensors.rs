//! Static per-line sensor range table.
//!
//! The table is the allow-list for every line and sensor identifier that
//! ends up in SQL text: identifiers are validated once at construction and
//! every lookup of an unknown line or sensor fails with [`ConfigError`].

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::generator::round2;
use crate::models::SensorRange;

// ---

/// One production line and its sensors, in column order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineConfig {
    // ---
    pub id: String,
    pub sensors: Vec<SensorRange>,
}

impl LineConfig {
    // ---
    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|s| s.sensor_id.as_str())
    }

    pub fn sensor(&self, sensor_id: &str) -> Result<&SensorRange, ConfigError> {
        // ---
        self.sensors
            .iter()
            .find(|s| s.sensor_id == sensor_id)
            .ok_or_else(|| ConfigError::UnknownSensor {
                line: self.id.clone(),
                sensor: sensor_id.to_string(),
            })
    }

    /// Name of this line's forecast table.
    pub fn forecast_table(&self) -> String {
        format!("forecasted{}", self.id)
    }
}

/// Read-only `{line -> {sensor -> range}}` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRangeTable {
    lines: Vec<LineConfig>,
}

#[derive(Deserialize)]
struct RangeFile {
    lines: Vec<LineConfig>,
}

impl SensorRangeTable {
    // ---
    /// Build a table, validating identifiers and bounds.
    ///
    /// `min` and `max` must be exact at 2 decimals so that a clamped and
    /// rounded reading cannot leave its range.
    pub fn new(lines: Vec<LineConfig>) -> Result<Self, ConfigError> {
        // ---
        let mut line_ids = HashSet::new();
        for line in &lines {
            validate_identifier(&line.id)?;
            // forecasted{line} must stay a valid identifier too
            validate_identifier(&line.forecast_table())?;
            if !line_ids.insert(line.id.as_str()) {
                return Err(ConfigError::Duplicate(line.id.clone()));
            }
            if line.sensors.is_empty() {
                return Err(ConfigError::EmptyLine(line.id.clone()));
            }

            let mut sensor_ids = HashSet::new();
            for s in &line.sensors {
                validate_identifier(&s.sensor_id)?;
                if matches!(s.sensor_id.as_str(), "timestamp" | "timezone") {
                    return Err(ConfigError::InvalidIdentifier(s.sensor_id.clone()));
                }
                if !sensor_ids.insert(s.sensor_id.as_str()) {
                    return Err(ConfigError::Duplicate(format!("{}.{}", line.id, s.sensor_id)));
                }
                let finite = s.min.is_finite() && s.avg.is_finite() && s.max.is_finite();
                if !finite || s.min > s.avg || s.avg > s.max {
                    return Err(ConfigError::InvalidRange {
                        line: line.id.clone(),
                        sensor: s.sensor_id.clone(),
                        avg: s.avg,
                        min: s.min,
                        max: s.max,
                    });
                }
                // readings are rounded to 2 dp after clamping
                for value in [s.min, s.max] {
                    if round2(value) != value {
                        return Err(ConfigError::BoundPrecision {
                            line: line.id.clone(),
                            sensor: s.sensor_id.clone(),
                            value,
                        });
                    }
                }
            }
        }
        Ok(Self { lines })
    }

    /// Parse a `[[lines]]` / `[[lines.sensors]]` TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        // ---
        let file: RangeFile = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::new(file.lines)
    }

    /// The deployed configuration: line4 (r01..r08) and line5 (r01..r17).
    pub fn builtin() -> Self {
        // ---
        let lines = vec![
            line(
                "line4",
                &[
                    ("r01", 129.10, 16.00, 258.00),
                    ("r02", 264.81, 18.00, 526.00),
                    ("r03", 255.77, 17.00, 476.00),
                    ("r04", 309.04, 13.00, 554.00),
                    ("r05", 253.94, 10.00, 440.00),
                    ("r06", 268.39, 8.00, 485.00),
                    ("r07", 263.18, 9.00, 525.00),
                    ("r08", 210.97, 8.00, 434.00),
                ],
            ),
            line(
                "line5",
                &[
                    ("r01", 133.31, 18.00, 226.00),
                    ("r02", 203.01, 18.00, 308.00),
                    ("r03", 164.63, 16.00, 262.00),
                    ("r04", 223.17, 17.00, 354.00),
                    ("r05", 183.02, 16.00, 278.00),
                    ("r06", 280.04, 16.00, 430.00),
                    ("r07", 277.71, 17.00, 415.00),
                    ("r08", 229.20, 16.00, 364.00),
                    ("r09", 227.06, 16.00, 307.00),
                    ("r10", 321.24, 15.00, 489.00),
                    ("r11", 225.51, 14.00, 357.00),
                    ("r12", 297.59, 15.00, 403.00),
                    ("r13", 238.31, 16.00, 330.00),
                    ("r14", 284.27, 15.00, 421.00),
                    ("r15", 174.30, 15.00, 255.00),
                    ("r16", 220.43, 13.00, 365.00),
                    ("r17", 151.66, 0.00, 241.00),
                ],
            ),
        ];
        Self { lines }
    }

    pub fn lines(&self) -> &[LineConfig] {
        &self.lines
    }

    pub fn line(&self, line_id: &str) -> Result<&LineConfig, ConfigError> {
        // ---
        self.lines
            .iter()
            .find(|l| l.id == line_id)
            .ok_or_else(|| ConfigError::UnknownLine(line_id.to_string()))
    }

    pub fn get(&self, line_id: &str, sensor_id: &str) -> Result<&SensorRange, ConfigError> {
        self.line(line_id)?.sensor(sensor_id)
    }

    pub fn sensors_for(&self, line_id: &str) -> Result<Vec<&str>, ConfigError> {
        Ok(self.line(line_id)?.sensor_ids().collect())
    }
}

fn line(id: &str, sensors: &[(&str, f64, f64, f64)]) -> LineConfig {
    // ---
    LineConfig {
        id: id.to_string(),
        sensors: sensors
            .iter()
            .map(|&(sensor_id, avg, min, max)| SensorRange {
                sensor_id: sensor_id.to_string(),
                avg,
                min,
                max,
            })
            .collect(),
    }
}

/// Accept only lowercase `[a-z_][a-z0-9_]*` names that fit a Postgres identifier.
pub fn validate_identifier(ident: &str) -> Result<(), ConfigError> {
    // ---
    let mut chars = ident.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if head_ok && tail_ok && ident.len() <= 63 {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(ident.to_string()))
    }
}

/// Double-quote an identifier that already passed [`validate_identifier`].
pub fn quote_ident(ident: &str) -> String {
    format!("\"{ident}\"")
}
