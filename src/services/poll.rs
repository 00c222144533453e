use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::models::sensor::{tables, CommandRow, RelayTarget, SensorId};
use crate::present::{NotificationKind, Presenter};
use crate::services::alerts::{Alert, AlertEvaluator};
use crate::services::chart::{ChartAggregator, ChartWindow};
use crate::services::commands::{on_off, CommandSender};
use crate::services::latest::{fetch_recent, LatestReadings};
use crate::services::series::{project, ChartMetric, ChartSeries};
use crate::services::thresholds::ThresholdStore;
use crate::store::{FetchError, Query, StoreError, TableStore, WriteError};

/// Outcome of one fetch-evaluate-present cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub rows: usize,
    pub sensors: usize,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChartRequest {
    pub window: ChartWindow,
    pub metric: ChartMetric,
    pub room: &'static str,
}

impl ChartRequest {
    pub fn parse(window: &str, metric: Option<&str>, room: Option<&str>) -> Result<Self, String> {
        let window = ChartWindow::parse(window).ok_or_else(|| format!("unknown chart window: {window}"))?;
        let metric = match metric {
            Some(m) => ChartMetric::parse(m).ok_or_else(|| format!("unknown chart metric: {m}"))?,
            None => ChartMetric::RoomTempRh,
        };
        let room = match room.unwrap_or("all") {
            "all" => "all",
            "r1" => "r1",
            "r2" => "r2",
            other => return Err(format!("unknown room: {other} (expected all, r1 or r2)")),
        };
        Ok(ChartRequest { window, metric, room })
    }
}

/// Ties the store, the threshold mapping and the presenter together. The
/// presenter is given to the monitor, never looked up.
pub struct Monitor<'a> {
    store: &'a dyn TableStore,
    presenter: &'a dyn Presenter,
    evaluator: AlertEvaluator,
    aggregator: ChartAggregator,
    thresholds: ThresholdStore,
    readings_limit: usize,
    threshold_refresh_cycles: u64,
    cycles: u64,
    last_chart: Option<ChartSeries>,
}

impl<'a> Monitor<'a> {
    pub fn new(
        store: &'a dyn TableStore,
        presenter: &'a dyn Presenter,
        evaluator: AlertEvaluator,
        aggregator: ChartAggregator,
        readings_limit: usize,
    ) -> Self {
        Monitor {
            store,
            presenter,
            evaluator,
            aggregator,
            thresholds: ThresholdStore::new(),
            readings_limit,
            threshold_refresh_cycles: 0,
            cycles: 0,
            last_chart: None,
        }
    }

    pub fn with_threshold_refresh(mut self, every_cycles: u64) -> Self {
        self.threshold_refresh_cycles = every_cycles;
        self
    }

    pub fn thresholds(&self) -> &ThresholdStore {
        &self.thresholds
    }

    #[cfg(test)]
    pub fn last_chart(&self) -> Option<&ChartSeries> {
        self.last_chart.as_ref()
    }

    /// Probe the backend until it answers. Only `ConnectionUnavailable` keeps
    /// waiting; an http error still proves the backend is there.
    ///
    /// Returns the number of failed probes.
    pub fn wait_until_available(&self, delay: Duration, max_attempts: Option<u32>) -> Result<u32, StoreError> {
        let probe = Query::from(tables::ALERT_SETTINGS).limit(1);
        let mut failures = 0u32;
        loop {
            match self.store.select(&probe) {
                Err(e) if e.is_unavailable() => {
                    failures += 1;
                    if failures == 1 || failures % 100 == 0 {
                        warn!("Backend not reachable yet ({}), retrying every {}ms", e, delay.as_millis());
                    }
                    if max_attempts.is_some_and(|max| failures >= max) {
                        return Err(e);
                    }
                    thread::sleep(delay);
                }
                _ => return Ok(failures),
            }
        }
    }

    /// Reload thresholds. A failure keeps the previous mapping and is shown
    /// as an error notification.
    pub fn refresh_thresholds(&mut self) -> Result<usize, FetchError> {
        match self.thresholds.load(self.store) {
            Ok(lines) => {
                self.presenter.show_thresholds(&lines);
                Ok(self.thresholds.len())
            }
            Err(e) => {
                self.presenter
                    .notify(NotificationKind::Error, &format!("Failed to load alert settings: {}", e.source.message()));
                Err(e)
            }
        }
    }

    /// Fetch the newest rows, show the latest reading per sensor and the
    /// alerts against the current thresholds.
    pub fn run_cycle(&mut self) -> Result<CycleReport, FetchError> {
        self.cycles += 1;
        if self.threshold_refresh_cycles > 0 && self.cycles % self.threshold_refresh_cycles == 0 {
            // stale thresholds are still usable
            let _ = self.refresh_thresholds();
        }

        let rows = match fetch_recent(self.store, self.readings_limit) {
            Ok(rows) => rows,
            Err(e) => {
                self.presenter.notify(NotificationKind::Error, "Failed to fetch sensor data");
                return Err(e);
            }
        };
        let total = rows.len();
        let latest = LatestReadings::reduce(rows);
        self.presenter.show_readings(&latest, total);

        let alerts = self.evaluator.evaluate(&latest, &self.thresholds);
        self.presenter.show_alerts(&alerts);
        debug!(
            "Cycle {}: {} row(s), {} sensor(s), {} alert(s)",
            self.cycles,
            total,
            latest.len(),
            alerts.len()
        );
        Ok(CycleReport {
            rows: total,
            sensors: latest.len(),
            alerts,
        })
    }

    /// Build and show a chart. On failure the previously shown chart stays.
    pub fn refresh_chart(&mut self, request: ChartRequest, now: DateTime<Utc>) -> Result<&ChartSeries, FetchError> {
        let buckets = self
            .aggregator
            .fetch(self.store, request.window, request.room, now)
            .inspect_err(|e| warn!("Chart data fetch error: {}", e))?;
        let series = project(&buckets, request.metric, request.room);
        info!(
            "Chart '{}': {} label(s), {} dataset(s)",
            series.title,
            series.labels.len(),
            series.datasets.len()
        );
        self.presenter.show_chart(&series);
        Ok(&*self.last_chart.insert(series))
    }

    /// Insert an actuator command and, on success, run one extra cycle so the
    /// new relay state shows up.
    pub fn send_command(
        &mut self,
        sensor_id: &SensorId,
        target: RelayTarget,
        state: bool,
        now: DateTime<Utc>,
    ) -> Result<CommandRow, WriteError> {
        let sent = CommandSender::new(self.store).send(sensor_id, target, state, now);
        match &sent {
            Ok(row) => {
                self.presenter.notify(
                    NotificationKind::Success,
                    &format!("Command sent: {} → {} = {}", row.sensor_id, row.target, on_off(row.state)),
                );
                if let Err(e) = self.run_cycle() {
                    warn!("Refresh after command failed: {}", e);
                }
            }
            Err(e) => self.presenter.notify(
                NotificationKind::Error,
                &format!("Failed to send command: {}", e.source.message()),
            ),
        }
        sent
    }

    /// One cycle whose failure is logged, never returned. The error has
    /// already been shown through the presenter.
    pub fn poll_once(&mut self) -> Option<CycleReport> {
        match self.run_cycle() {
            Ok(report) => {
                info!(
                    "Poll: {} row(s), {} sensor(s), {} alert(s)",
                    report.rows,
                    report.sensors,
                    report.alerts.len()
                );
                Some(report)
            }
            Err(e) => {
                warn!("Poll failed: {}", e);
                None
            }
        }
    }

    /// Run cycles at a steady cadence. Failed cycles are reported and the
    /// loop carries on with the next one. `max_cycles` of `None` runs forever.
    pub fn run_loop(&mut self, interval: Duration, max_cycles: Option<u64>) {
        let mut done = 0u64;
        loop {
            let tick_start = Instant::now();

            self.poll_once();

            done += 1;
            if max_cycles.is_some_and(|max| done >= max) {
                return;
            }

            // Maintain steady cadence
            let elapsed = tick_start.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sensor::{Metric, SensorReading};
    use crate::present::RecordingPresenter;
    use crate::services::alerts::AlertProfile;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, FixedOffset, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap()
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_rows(
            tables::ALERT_SETTINGS,
            [json!({"sensor_type": "ecs", "parameter": "t1", "min_threshold": 20, "max_threshold": 30})],
        );
        let rows = [
            SensorReading::new(now(), "ecs_1").with(Metric::T1, 35.0),
            SensorReading::new(now() - ChronoDuration::minutes(1), "ecs_1").with(Metric::T1, 25.0),
            SensorReading::new(now() - ChronoDuration::minutes(2), "ecs_2").with(Metric::T1, 22.0),
        ];
        store.put_rows(tables::SENSOR_DATA, rows.iter().map(|r| serde_json::to_value(r).unwrap()));
        store
    }

    fn monitor<'a>(store: &'a MemoryStore, presenter: &'a RecordingPresenter) -> Monitor<'a> {
        Monitor::new(
            store,
            presenter,
            AlertEvaluator::new(AlertProfile::dual_humidity()),
            ChartAggregator::new(FixedOffset::east_opt(0).unwrap()),
            200,
        )
    }

    #[test]
    fn cycle_reports_latest_alerts_every_time() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let mut m = monitor(&store, &presenter);
        assert_eq!(m.refresh_thresholds().expect("thresholds"), 1);

        let first = m.run_cycle().expect("cycle");
        let second = m.run_cycle().expect("cycle");
        assert_eq!(first.rows, 3);
        assert_eq!(first.sensors, 2);
        assert_eq!(first, second);

        let shown = presenter.alerts.borrow();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[0], vec!["ECS alert in ecs_1: t1 above maximum (35 > 30)".to_string()]);
        assert_eq!(shown[0], shown[1]);
        assert_eq!(*presenter.thresholds.borrow(), vec!["ecs - t1: Min 20, Max 30".to_string()]);
    }

    #[test]
    fn fetch_failure_notifies_and_next_cycle_recovers() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let mut m = monitor(&store, &presenter);

        store.fail_table(tables::SENSOR_DATA);
        assert!(m.run_cycle().is_err());
        assert_eq!(
            presenter.notifications.borrow().last(),
            Some(&(NotificationKind::Error, "Failed to fetch sensor data".to_string()))
        );
        assert!(presenter.alerts.borrow().is_empty());

        store.heal_table(tables::SENSOR_DATA);
        assert_eq!(m.run_cycle().expect("recovered").sensors, 2);
    }

    #[test]
    fn single_poll_swallows_fetch_failure() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let mut m = monitor(&store, &presenter);

        store.fail_table(tables::SENSOR_DATA);
        assert_eq!(m.poll_once(), None);
        assert_eq!(presenter.notifications.borrow().len(), 1);

        store.heal_table(tables::SENSOR_DATA);
        let report = m.poll_once().expect("second poll succeeds");
        assert_eq!(report.rows, 3);
    }

    #[test]
    fn threshold_failure_keeps_old_rules() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let mut m = monitor(&store, &presenter).with_threshold_refresh(1);
        m.refresh_thresholds().expect("initial");

        store.fail_table(tables::ALERT_SETTINGS);
        let report = m.run_cycle().expect("cycle still runs");
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(m.thresholds().len(), 1);
        let notes = presenter.notifications.borrow();
        assert!(notes[0].1.starts_with("Failed to load alert settings"));
    }

    #[test]
    fn command_success_and_failure_notifications() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let mut m = monitor(&store, &presenter);

        m.send_command(&SensorId::new("ecs_1"), RelayTarget::Relay1, true, now())
            .expect("sent");
        assert_eq!(
            presenter.notifications.borrow()[0],
            (NotificationKind::Success, "Command sent: ecs_1 → relay1 = ON".to_string())
        );
        // follow-up refresh cycle
        assert_eq!(presenter.readings.borrow().len(), 1);

        store.fail_table(tables::COMMANDS);
        let err = m
            .send_command(&SensorId::new("ecs_1"), RelayTarget::Relay2, false, now())
            .expect_err("write fails");
        assert_eq!(err.table, "commands");
        let notes = presenter.notifications.borrow();
        assert_eq!(notes[1].0, NotificationKind::Error);
        assert!(notes[1].1.starts_with("Failed to send command: relation"));
        assert_eq!(store.rows(tables::COMMANDS).len(), 1);
    }

    #[test]
    fn waits_for_backend_then_proceeds() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let m = monitor(&store, &presenter);

        store.unavailable_for(3);
        assert_eq!(m.wait_until_available(Duration::from_millis(1), None).expect("available"), 3);

        store.unavailable_for(5);
        assert!(m.wait_until_available(Duration::from_millis(1), Some(2)).is_err());

        // http errors mean the backend is up
        store.unavailable_for(0);
        store.fail_table(tables::ALERT_SETTINGS);
        assert_eq!(m.wait_until_available(Duration::from_millis(1), Some(1)).expect("reachable"), 0);
    }

    #[test]
    fn chart_failure_keeps_last_chart() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let mut m = monitor(&store, &presenter);
        let req = ChartRequest::parse("1h", Some("room_temp_rh"), None).expect("request");

        let series = m.refresh_chart(req, now()).expect("chart").clone();
        assert_eq!(series.labels, vec!["11:58", "11:59", "12:00"]);
        assert_eq!(presenter.charts.borrow().len(), 1);

        store.fail_table(tables::SENSOR_DATA);
        assert!(m.refresh_chart(req, now()).is_err());
        assert_eq!(m.last_chart(), Some(&series));
        assert_eq!(presenter.charts.borrow().len(), 1);
    }

    #[test]
    fn run_loop_stops_after_max_cycles() {
        let store = seeded_store();
        let presenter = RecordingPresenter::default();
        let mut m = monitor(&store, &presenter);
        store.fail_table(tables::SENSOR_DATA);
        m.run_loop(Duration::from_millis(1), Some(3));
        assert_eq!(presenter.notifications.borrow().len(), 3);
    }

    #[test]
    fn chart_request_validation() {
        let req = ChartRequest::parse("7d", None, Some("r2")).expect("valid");
        assert_eq!(req.window, ChartWindow::Week);
        assert_eq!(req.metric, ChartMetric::RoomTempRh);
        assert_eq!(req.room, "r2");
        assert!(ChartRequest::parse("2w", None, None).is_err());
        assert!(ChartRequest::parse("1h", Some("co2"), None).is_err());
        assert!(ChartRequest::parse("1h", None, Some("r3")).is_err());
    }
}
