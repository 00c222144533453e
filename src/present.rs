//! Where monitor output goes.
//!
//! The monitor never renders anything itself; it hands plain data to a
//! `Presenter`. `LogPresenter` writes through the `log` facade and prints
//! chart series as JSON on stdout.

use log::{error, info, warn};
#[cfg(test)]
use std::cell::RefCell;

use crate::services::alerts::Alert;
use crate::services::latest::LatestReadings;
use crate::services::series::ChartSeries;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

pub trait Presenter {
    /// Called every cycle with the full alert list, empty included.
    fn show_alerts(&self, alerts: &[Alert]);
    fn show_readings(&self, latest: &LatestReadings, total_rows: usize);
    fn show_thresholds(&self, lines: &[String]);
    fn show_chart(&self, series: &ChartSeries);
    fn notify(&self, kind: NotificationKind, message: &str);
}

#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show_alerts(&self, alerts: &[Alert]) {
        for alert in alerts {
            warn!("🚨 {}", alert);
        }
    }

    fn show_readings(&self, latest: &LatestReadings, total_rows: usize) {
        info!("Data points: {} ({} sensor(s))", total_rows, latest.len());
        for reading in latest.iter() {
            let metrics = reading
                .present_metrics()
                .map(|(m, v)| format!("{}={}", m, v))
                .collect::<Vec<_>>()
                .join(" ");
            let relays = [("relay1", reading.relay1), ("relay2", reading.relay2)]
                .into_iter()
                .filter_map(|(name, state)| state.map(|s| format!("{}={}", name, if s { "ON" } else { "OFF" })))
                .collect::<Vec<_>>()
                .join(" ");
            info!(
                "  {} @ {}: {} {}",
                reading.sensor_id,
                reading.timestamp.format("%Y-%m-%d %H:%M:%S"),
                metrics,
                relays
            );
        }
    }

    fn show_thresholds(&self, lines: &[String]) {
        for line in lines {
            info!("  threshold {}", line);
        }
    }

    fn show_chart(&self, series: &ChartSeries) {
        match serde_json::to_string_pretty(series) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Serializing chart failed: {}", e),
        }
    }

    fn notify(&self, kind: NotificationKind, message: &str) {
        match kind {
            NotificationKind::Success => info!("✅ {}", message),
            NotificationKind::Error => error!("❌ {}", message),
        }
    }
}

/// Keeps everything it is shown.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub alerts: RefCell<Vec<Vec<String>>>,
    pub notifications: RefCell<Vec<(NotificationKind, String)>>,
    pub charts: RefCell<Vec<ChartSeries>>,
    pub readings: RefCell<Vec<usize>>,
    pub thresholds: RefCell<Vec<String>>,
}

#[cfg(test)]
impl Presenter for RecordingPresenter {
    fn show_alerts(&self, alerts: &[Alert]) {
        self.alerts
            .borrow_mut()
            .push(alerts.iter().map(|a| a.message.clone()).collect());
    }

    fn show_readings(&self, latest: &LatestReadings, _total_rows: usize) {
        self.readings.borrow_mut().push(latest.len());
    }

    fn show_thresholds(&self, lines: &[String]) {
        self.thresholds.borrow_mut().extend(lines.iter().cloned());
    }

    fn show_chart(&self, series: &ChartSeries) {
        self.charts.borrow_mut().push(series.clone());
    }

    fn notify(&self, kind: NotificationKind, message: &str) {
        self.notifications.borrow_mut().push((kind, message.to_string()));
    }
}
