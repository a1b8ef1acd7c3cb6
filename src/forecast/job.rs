//! Batch regeneration of the per-line forecast tables.

use std::{sync::Arc, time::Instant};

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::forecast::ForecastModelStore;
use crate::models::{ForecastPoint, TIMESTAMP_FORMAT};
use crate::sensors::{LineConfig, SensorRangeTable};
use crate::store::{EventKind, EventLog, ForecastStore};

// ---

/// Most timestamps a configured horizon may expand to.
pub const MAX_HORIZON_POINTS: i64 = 10_000;

/// Span of future timestamps to forecast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastHorizon {
    // ---
    pub start: NaiveDateTime,
    pub interval: TimeDelta,
    pub duration: TimeDelta,
}

impl ForecastHorizon {
    // ---
    /// `start, start + interval, ..., start + N * interval` with
    /// `N = floor(duration / interval)`, both ends included.
    ///
    /// A non-positive interval yields only `start`. Enumeration stops at the
    /// last representable timestamp.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        // ---
        let step = self.interval.num_milliseconds();
        if step <= 0 {
            return vec![self.start];
        }
        (0..self.points())
            .map_while(|i| {
                TimeDelta::try_milliseconds(step * i)
                    .and_then(|offset| self.start.checked_add_signed(offset))
            })
            .collect()
    }

    /// Number of timestamps [`timestamps`](Self::timestamps) yields.
    pub fn points(&self) -> i64 {
        // ---
        let step = self.interval.num_milliseconds();
        if step <= 0 {
            return 1;
        }
        self.duration.num_milliseconds().max(0) / step + 1
    }
}

/// Result of processing one line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LineOutcome {
    /// No artifacts found; nothing touched.
    Skipped,
    Stored {
        sensors: usize,
        rows: u64,
        skipped_points: usize,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineReport {
    pub line: String,
    #[serde(flatten)]
    pub outcome: LineOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub lines: Vec<LineReport>,
}

impl BatchReport {
    #[cfg(test)]
    pub fn outcome(&self, line_id: &str) -> Option<&LineOutcome> {
        self.lines
            .iter()
            .find(|r| r.line == line_id)
            .map(|r| &r.outcome)
    }
}

/// Regenerates every configured line's forecast table.
pub struct ForecastBatchJob<S> {
    store: S,
    models: ForecastModelStore,
    horizon: ForecastHorizon,
    ranges: Arc<SensorRangeTable>,
    // runs truncate and refill the same tables, so they must not overlap
    run_lock: Mutex<()>,
}

impl<S> ForecastBatchJob<S>
where
    S: ForecastStore + EventLog,
{
    // ---
    pub fn new(
        store: S,
        models: ForecastModelStore,
        horizon: ForecastHorizon,
        ranges: Arc<SensorRangeTable>,
    ) -> Self {
        Self {
            store,
            models,
            horizon,
            ranges,
            run_lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process all configured lines in order. Never fails as a whole:
    /// problems are reported per line.
    ///
    /// Concurrent calls are serialized, both within this process and,
    /// through [`ForecastStore::lock_runs`], across processes sharing the
    /// store.
    #[tracing::instrument(name = "forecast_job", skip_all)]
    pub async fn generate_and_store_forecasts(&self) -> BatchReport {
        // ---
        let _local = self.run_lock.lock().await;
        let _shared = match self.store.lock_runs().await {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!("Could not take the shared forecast run lock: {}", e);
                None
            }
        };

        let mut report = BatchReport::default();
        for line in self.ranges.lines() {
            let outcome = self.process_line(line).await;
            report.lines.push(LineReport {
                line: line.id.clone(),
                outcome,
            });
        }
        tracing::info!("Forecast generation complete");
        report
    }

    async fn process_line(&self, line: &LineConfig) -> LineOutcome {
        // ---
        let started = Instant::now();

        let sensors = self.models.detect_sensors(&line.id);
        if sensors.is_empty() {
            tracing::info!("No sensor models found for {}", line.id);
            return LineOutcome::Skipped;
        }

        if let Err(e) = self.store.reset_forecast_table(line).await {
            return self.fail(line, format!("failed to prepare forecast table: {e}")).await;
        }

        let timestamps = self.horizon.timestamps();
        tracing::info!(
            "Processing {} sensors for {} over {} timestamps starting {}",
            sensors.len(),
            line.id,
            timestamps.len(),
            self.horizon.start.format(TIMESTAMP_FORMAT)
        );

        let mut rows = 0;
        let mut skipped_points = 0;
        for sensor in &sensors {
            let models = self.models.clone();
            let (line_id, sensor_id, ts) = (line.id.clone(), sensor.clone(), timestamps.clone());
            let predictions = match tokio::task::spawn_blocking(move || {
                models.forecast_series(&line_id, &sensor_id, &ts)
            })
            .await
            {
                Ok(predictions) => predictions,
                Err(e) => {
                    tracing::error!("Forecast task for {}/{} panicked: {}", line.id, sensor, e);
                    skipped_points += timestamps.len();
                    continue;
                }
            };

            let points: Vec<ForecastPoint> = timestamps
                .iter()
                .zip(predictions)
                .filter_map(|(&at, p)| p.map(|p| ForecastPoint::new(sensor, at, p)))
                .collect();
            skipped_points += timestamps.len() - points.len();

            match self.store.insert_forecasts(line, &points).await {
                Ok(written) => rows += written,
                Err(e) => {
                    return self
                        .fail(line, format!("failed to store forecasts for {sensor}: {e}"))
                        .await;
                }
            }
        }

        let message = format!(
            "Forecasts generated for {}: {} rows, {} points skipped",
            line.id, rows, skipped_points
        );
        tracing::info!(
            "{} in {:.2}s",
            message,
            started.elapsed().as_secs_f64()
        );
        self.store.log_event(EventKind::Info, &message).await;

        LineOutcome::Stored {
            sensors: sensors.len(),
            rows,
            skipped_points,
        }
    }

    async fn fail(&self, line: &LineConfig, reason: String) -> LineOutcome {
        // ---
        tracing::error!("Forecast job aborted {}: {}", line.id, reason);
        self.store
            .log_event(EventKind::Error, &format!("Forecast error for {}: {}", line.id, reason))
            .await;
        LineOutcome::Failed { reason }
    }
}
