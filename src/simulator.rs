//! Background temperature simulator.
//!
//! Every tick produces one [`LineSnapshot`] per configured line from the
//! simulator's own [`SensorState`] and appends it to the line's readings
//! table. Each line is written independently; the first failed write ends
//! the tick (earlier lines stay written) and the loop retries after the
//! error backoff. Nothing here terminates the process.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use chrono::{Datelike, Local, NaiveDateTime, SubsecRound};
use rand::{rngs::StdRng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PersistenceError;
use crate::generator::ReadingStrategy;
use crate::models::{LineSnapshot, Reading, TIMESTAMP_FORMAT};
use crate::sensors::SensorRangeTable;
use crate::store::{EventKind, EventLog, SnapshotStore};

// ---

/// Timezone tag stored with each row: `+01` for April through October,
/// `+00` otherwise. A fixed calendar rule, not real DST.
pub fn timezone_offset(month: u32) -> &'static str {
    if (4..=10).contains(&month) {
        "+01"
    } else {
        "+00"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorSettings {
    // ---
    pub strategy: ReadingStrategy,
    pub tick_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            strategy: ReadingStrategy::default(),
            tick_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Current value of every sensor, aligned with the range table's order.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    values: Vec<Vec<f64>>,
}

impl SensorState {
    // ---
    /// Every sensor starts at its configured average.
    pub fn new(ranges: &SensorRangeTable) -> Self {
        Self {
            values: ranges
                .lines()
                .iter()
                .map(|line| line.sensors.iter().map(|s| s.avg).collect())
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn current(&self, ranges: &SensorRangeTable, line_id: &str, sensor_id: &str) -> Option<f64> {
        // ---
        let li = ranges.lines().iter().position(|l| l.id == line_id)?;
        let si = ranges.lines()[li]
            .sensors
            .iter()
            .position(|s| s.sensor_id == sensor_id)?;
        Some(self.values[li][si])
    }
}

/// The loop body, owned by the background task.
struct SimulationLoop<S> {
    ranges: Arc<SensorRangeTable>,
    settings: SimulatorSettings,
    store: Arc<S>,
    state: SensorState,
    rng: StdRng,
}

impl<S> SimulationLoop<S>
where
    S: SnapshotStore + EventLog,
{
    // ---
    fn new(ranges: Arc<SensorRangeTable>, settings: SimulatorSettings, store: Arc<S>, rng: StdRng) -> Self {
        let state = SensorState::new(&ranges);
        Self {
            ranges,
            settings,
            store,
            state,
            rng,
        }
    }

    /// Generate and persist one snapshot per line, all stamped with `now`.
    ///
    /// Returns how many lines were written; stops early (without error) once
    /// `cancel` fires.
    async fn tick(
        &mut self,
        now: NaiveDateTime,
        cancel: &CancellationToken,
    ) -> Result<usize, PersistenceError> {
        // ---
        let timezone = timezone_offset(now.month());
        let mut written = 0;

        for (line, values) in self.ranges.lines().iter().zip(self.state.values.iter_mut()) {
            let readings = line
                .sensors
                .iter()
                .zip(values.iter_mut())
                .map(|(range, current)| {
                    *current = self.settings.strategy.next_value(
                        *current,
                        range.avg,
                        range.min,
                        range.max,
                        &mut self.rng,
                    );
                    Reading {
                        sensor_id: range.sensor_id.clone(),
                        value: *current,
                    }
                })
                .collect();

            let snapshot = LineSnapshot {
                line_id: line.id.clone(),
                timestamp: now,
                timezone,
                readings,
            };

            if cancel.is_cancelled() {
                break;
            }
            self.store.insert_snapshot(&snapshot).await.map_err(|e| {
                tracing::error!("Error inserting {} data: {}", line.id, e);
                e
            })?;
            tracing::debug!("{} @ {}: {:?}", line.id, now.format(TIMESTAMP_FORMAT), snapshot.readings);
            written += 1;
        }
        Ok(written)
    }

    #[tracing::instrument(name = "simulator", skip_all)]
    async fn run(mut self, cancel: CancellationToken) {
        // ---
        while !cancel.is_cancelled() {
            let now = Local::now().naive_local().trunc_subsecs(0);

            let pause = match self.tick(now, &cancel).await {
                Ok(_) => {
                    self.store
                        .log_event(EventKind::Info, "Temperature readings generated successfully")
                        .await;
                    self.settings.tick_interval
                }
                Err(e) => {
                    tracing::error!("Simulation error: {}", e);
                    self.store
                        .log_event(EventKind::Error, &format!("Simulation error: {e}"))
                        .await;
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => break,
            }
        }
        tracing::info!("Temperature simulation stopped");
    }
}

/// Idle until [`start`](Self::start), then running for the rest of the
/// process unless the cancellation token fires.
pub struct TemperatureSimulator<S> {
    ranges: Arc<SensorRangeTable>,
    settings: SimulatorSettings,
    store: Arc<S>,
    cancel: CancellationToken,
    task: OnceLock<JoinHandle<()>>,
}

impl<S> TemperatureSimulator<S>
where
    S: SnapshotStore + EventLog + 'static,
{
    // ---
    pub fn new(
        ranges: Arc<SensorRangeTable>,
        settings: SimulatorSettings,
        store: Arc<S>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ranges,
            settings,
            store,
            cancel,
            task: OnceLock::new(),
        }
    }

    /// Spawn the loop on the current tokio runtime. Returns `false` if it
    /// was already started.
    pub fn start(&self) -> bool {
        // ---
        let mut spawned = false;
        self.task.get_or_init(|| {
            spawned = true;
            let sim = SimulationLoop::new(
                self.ranges.clone(),
                self.settings,
                self.store.clone(),
                StdRng::from_os_rng(),
            );
            let cancel = self.cancel.clone();
            let store = self.store.clone();
            let settings = self.settings;
            tokio::spawn(async move {
                tracing::info!(
                    "Temperature simulation started ({}, every {:?})",
                    settings.strategy,
                    settings.tick_interval
                );
                store
                    .log_event(EventKind::Info, "Temperature simulation started")
                    .await;
                sim.run(cancel).await;
            })
        });
        spawned
    }

    pub fn is_running(&self) -> bool {
        self.task.get().is_some_and(|task| !task.is_finished())
    }

    /// Request a cooperative stop; the loop exits at its next check.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Readings tables in memory; `failures[line]` makes the next N inserts fail.
    #[derive(Default)]
    struct MemoryReadings {
        rows: Mutex<Vec<LineSnapshot>>,
        failures: Mutex<HashMap<String, usize>>,
        events: Mutex<Vec<(EventKind, String)>>,
    }

    #[async_trait]
    impl SnapshotStore for MemoryReadings {
        async fn insert_snapshot(&self, snapshot: &LineSnapshot) -> Result<(), PersistenceError> {
            // ---
            if let Some(left) = self.failures.lock().unwrap().get_mut(&snapshot.line_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(PersistenceError::Unavailable("connection reset".into()));
                }
            }
            self.rows.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl EventLog for MemoryReadings {
        async fn log_event(&self, kind: EventKind, message: &str) {
            self.events.lock().unwrap().push((kind, message.to_string()));
        }
    }

    impl MemoryReadings {
        fn rows_for(&self, line_id: &str) -> Vec<LineSnapshot> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.line_id == line_id)
                .cloned()
                .collect()
        }
    }

    fn noon(month: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, month, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn sim_loop(strategy: ReadingStrategy, store: Arc<MemoryReadings>) -> SimulationLoop<MemoryReadings> {
        SimulationLoop::new(
            Arc::new(SensorRangeTable::builtin()),
            SimulatorSettings {
                strategy,
                ..SimulatorSettings::default()
            },
            store,
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_timezone_offset_for_every_month() {
        // ---
        for month in 1..=12 {
            let expected = if (4..=10).contains(&month) { "+01" } else { "+00" };
            assert_eq!(timezone_offset(month), expected, "month {month}");
        }
        assert_eq!(timezone_offset(4), "+01");
        assert_eq!(timezone_offset(10), "+01");
        assert_eq!(timezone_offset(3), "+00");
        assert_eq!(timezone_offset(11), "+00");
    }

    #[test]
    fn test_state_starts_at_average() {
        // ---
        let ranges = SensorRangeTable::builtin();
        let state = SensorState::new(&ranges);

        assert_eq!(state.current(&ranges, "line4", "r01"), Some(129.10));
        assert_eq!(state.current(&ranges, "line5", "r17"), Some(151.66));
        assert_eq!(state.current(&ranges, "line5", "r18"), None);
    }

    #[tokio::test]
    async fn test_tick_writes_one_consistent_row_per_line() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        let mut sim = sim_loop(ReadingStrategy::FixedDelta, store.clone());

        let written = tokio_test::assert_ok!(sim.tick(noon(7), &CancellationToken::new()).await);

        assert_eq!(written, 2);
        let rows = store.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.timestamp == noon(7) && r.timezone == "+01"));
        assert_eq!(rows[0].line_id, "line4");
        assert_eq!(rows[0].readings.len(), 8);
        assert_eq!(rows[1].line_id, "line5");
        assert_eq!(rows[1].readings.len(), 17);
        assert_eq!(rows[1].readings[16].sensor_id, "r17");
    }

    #[tokio::test]
    async fn test_fixed_delta_walks_state_forward() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        let mut sim = sim_loop(ReadingStrategy::FixedDelta, store.clone());

        for _ in 0..5 {
            sim.tick(noon(1), &CancellationToken::new()).await.unwrap();
        }

        let ranges = SensorRangeTable::builtin();
        let last = store.rows_for("line4").pop().unwrap();
        for reading in &last.readings {
            let r = ranges.get("line4", &reading.sensor_id).unwrap();
            assert_eq!(sim.state.current(&ranges, "line4", &reading.sensor_id), Some(reading.value));
            // five steps of at most 0.2 each
            assert!((reading.value - r.avg).abs() <= 1.0 + 1e-9);
        }
        assert_eq!(last.timezone, "+00");
    }

    #[tokio::test]
    async fn test_relative_fluctuation_stays_near_average() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        let mut sim = sim_loop(ReadingStrategy::RelativeFluctuation, store.clone());
        let ranges = SensorRangeTable::builtin();

        for _ in 0..20 {
            sim.tick(noon(5), &CancellationToken::new()).await.unwrap();
        }

        for row in store.rows.lock().unwrap().iter() {
            for reading in &row.readings {
                let r = ranges.get(&row.line_id, &reading.sensor_id).unwrap();
                assert!((reading.value - r.avg).abs() <= r.avg * 0.02 + 0.005);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_line_ends_tick_but_keeps_earlier_rows() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        store.failures.lock().unwrap().insert("line5".to_string(), 1);
        let mut sim = sim_loop(ReadingStrategy::FixedDelta, store.clone());

        let result = sim.tick(noon(2), &CancellationToken::new()).await;

        assert!(matches!(result, Err(PersistenceError::Unavailable(_))));
        assert_eq!(store.rows_for("line4").len(), 1);
        assert!(store.rows_for("line5").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_tick_writes_nothing() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        let mut sim = sim_loop(ReadingStrategy::FixedDelta, store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(sim.tick(noon(2), &cancel).await.unwrap(), 0);
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        let sim = TemperatureSimulator::new(
            Arc::new(SensorRangeTable::builtin()),
            SimulatorSettings::default(),
            store.clone(),
            CancellationToken::new(),
        );

        assert!(!sim.is_running());
        assert!(sim.start());
        assert!(!sim.start());
        assert!(sim.is_running());

        // ticks at 0s, 30s and 60s
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(store.rows_for("line4").len(), 3);
        assert_eq!(store.rows_for("line5").len(), 3);

        let started = store
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, msg)| msg == "Temperature simulation started")
            .count();
        assert_eq!(started, 1);

        sim.stop();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!sim.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_backs_off_and_recovers() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        store.failures.lock().unwrap().insert("line5".to_string(), 1);
        let sim = TemperatureSimulator::new(
            Arc::new(SensorRangeTable::builtin()),
            SimulatorSettings::default(),
            store.clone(),
            CancellationToken::new(),
        );
        sim.start();

        // 0s: line4 ok, line5 fails; 5s: both; 35s: both
        tokio::time::sleep(Duration::from_secs(36)).await;
        sim.stop();

        assert_eq!(store.rows_for("line4").len(), 3);
        assert_eq!(store.rows_for("line5").len(), 2);
        assert!(store
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|(kind, msg)| *kind == EventKind::Error && msg.starts_with("Simulation error")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick() {
        // ---
        let store = Arc::new(MemoryReadings::default());
        let cancel = CancellationToken::new();
        let sim = TemperatureSimulator::new(
            Arc::new(SensorRangeTable::builtin()),
            SimulatorSettings::default(),
            store.clone(),
            cancel.clone(),
        );
        cancel.cancel();
        sim.start();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.rows.lock().unwrap().is_empty());
        assert!(!sim.is_running());
    }
}
