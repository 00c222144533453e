//! Projection of chart buckets into plottable series.

use serde::Serialize;

use crate::models::sensor::{Metric, SensorId};
use crate::services::chart::{ChartBuckets, ChartWindow};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChartMetric {
    AcTemp,
    RoomTempRh,
    Pm,
    Nc,
    AvgParticleSize,
}

impl ChartMetric {
    pub const ALL: [ChartMetric; 5] = [
        ChartMetric::AcTemp,
        ChartMetric::RoomTempRh,
        ChartMetric::Pm,
        ChartMetric::Nc,
        ChartMetric::AvgParticleSize,
    ];

    pub fn parse(s: &str) -> Option<ChartMetric> {
        ChartMetric::ALL.into_iter().find(|m| m.as_str() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChartMetric::AcTemp => "ac_temp",
            ChartMetric::RoomTempRh => "room_temp_rh",
            ChartMetric::Pm => "pm",
            ChartMetric::Nc => "nc",
            ChartMetric::AvgParticleSize => "avg_particle_size",
        }
    }

    pub fn title(self, room: &str) -> String {
        let room_prefix = match room {
            "r1" => "Room 1 ",
            "r2" => "Room 2 ",
            _ => "",
        };
        match self {
            ChartMetric::AcTemp => format!("{room_prefix}AC Vent & Motor Temp (°C)"),
            ChartMetric::RoomTempRh if room_prefix.is_empty() => "Room Temperature & Humidity (°C, %)".to_string(),
            ChartMetric::RoomTempRh => format!("{room_prefix}Temperature & Humidity (°C, %)"),
            ChartMetric::Pm => "Particulate Matter (PM1.0/2.5/10) (μg/m³)".to_string(),
            ChartMetric::Nc => "Particle Count (NC0.5/1.0/2.5/10) (/L)".to_string(),
            ChartMetric::AvgParticleSize => "Average Particle Size (μm)".to_string(),
        }
    }

    fn accepts(self, sensor: &SensorId) -> bool {
        let id = sensor.as_str();
        match self {
            ChartMetric::AcTemp => id.starts_with("ac1_") || id.starts_with("ac2_"),
            _ => id.starts_with("ecs_"),
        }
    }

    /// `(metric, label stem, axis)` per dataset for one sensor.
    fn lines(self, sensor: &SensorId) -> Vec<(Metric, String, Option<Axis>)> {
        match self {
            ChartMetric::AcTemp => {
                let unit = sensor.as_str().split('_').next().unwrap_or_default().to_uppercase();
                vec![
                    (Metric::T1, format!("{unit} Vent"), Some(Axis::Left)),
                    (Metric::T2, format!("{unit} Motor"), Some(Axis::Right)),
                ]
            }
            ChartMetric::RoomTempRh => vec![
                (Metric::T1, "Room Temp 1".to_string(), Some(Axis::Left)),
                (Metric::T2, "Room Temp 2".to_string(), Some(Axis::Left)),
                (Metric::Rh, "Humidity".to_string(), Some(Axis::Right)),
            ],
            ChartMetric::Pm => [Metric::Pm1, Metric::Pm25, Metric::Pm10]
                .into_iter()
                .map(|m| (m, m.column().to_uppercase(), None))
                .collect(),
            ChartMetric::Nc => [Metric::Nc0_5, Metric::Nc1_0, Metric::Nc2_5, Metric::Nc10]
                .into_iter()
                .map(|m| (m, m.column().to_uppercase(), None))
                .collect(),
            ChartMetric::AvgParticleSize => vec![(Metric::AvgParticleSize, "Avg Particle Size".to_string(), None)],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Axis {
    #[serde(rename = "y")]
    Left,
    #[serde(rename = "y1")]
    Right,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Band {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub label: String,
    pub sensor_id: SensorId,
    pub metric: Metric,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis: Option<Axis>,
    pub points: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band: Option<Vec<Band>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub title: String,
    pub window: ChartWindow,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

/// Room suffix used in dataset labels.
fn label_suffix(sensor: &SensorId) -> &'static str {
    if sensor.as_str().to_uppercase().ends_with("_R1") {
        "_R1"
    } else {
        "_R2"
    }
}

pub fn project(buckets: &ChartBuckets, metric: ChartMetric, room: &str) -> ChartSeries {
    let labels: Vec<String> = buckets.labels().map(str::to_string).collect();
    let with_band = buckets.window.is_rollup();
    let mut datasets = Vec::new();

    for sensor in buckets.sensors() {
        if !sensor.in_room(room) || !metric.accepts(sensor) {
            continue;
        }
        let suffix = label_suffix(sensor);
        for (m, stem, axis) in metric.lines(sensor) {
            let cells: Vec<_> = buckets
                .buckets
                .iter()
                .map(|b| b.sensors.get(sensor).and_then(|r| r.get(&m)).copied())
                .collect();
            let points = cells.iter().map(|c| c.and_then(|c| c.value)).collect();
            let band = with_band.then(|| {
                cells
                    .iter()
                    .map(|c| Band {
                        min: c.and_then(|c| c.min),
                        max: c.and_then(|c| c.max),
                    })
                    .collect()
            });
            datasets.push(Dataset {
                label: format!("{stem}{suffix}"),
                sensor_id: sensor.clone(),
                metric: m,
                axis,
                points,
                band,
            });
        }
    }

    ChartSeries {
        title: format!("{} — {}", metric.title(room), buckets.window.title()),
        window: buckets.window,
        labels,
        datasets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sensor::SensorReading;
    use crate::services::chart::{ChartAggregator, ChartRow};
    use chrono::{FixedOffset, TimeZone, Utc};
    use serde_json::json;

    fn buckets(window: ChartWindow, rows: Vec<serde_json::Value>) -> ChartBuckets {
        let rows: Vec<_> = rows
            .into_iter()
            .map(|v| ChartRow::from_value(v, window.is_rollup()).unwrap())
            .collect();
        ChartAggregator::new(FixedOffset::east_opt(0).unwrap()).bucket(&rows, window)
    }

    #[test]
    fn ac_temp_splits_vent_and_motor_axes() {
        let b = buckets(
            ChartWindow::Hour,
            vec![
                json!({"timestamp": "2024-08-14T10:00:00Z", "sensor_id": "ac1_r1", "t1": 12.0, "t2": 55.0}),
                json!({"timestamp": "2024-08-14T10:01:00Z", "sensor_id": "ecs_1", "t1": 24.0}),
                json!({"timestamp": "2024-08-14T10:02:00Z", "sensor_id": "ac2_r2", "t1": 14.0}),
            ],
        );
        let series = project(&b, ChartMetric::AcTemp, "all");
        assert_eq!(series.title, "AC Vent & Motor Temp (°C) — Last 1 Hour");
        assert_eq!(series.labels, vec!["10:00", "10:01", "10:02"]);
        let labels: Vec<_> = series.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["AC1 Vent_R1", "AC1 Motor_R1", "AC2 Vent_R2", "AC2 Motor_R2"]);
        assert_eq!(series.datasets[0].axis, Some(Axis::Left));
        assert_eq!(series.datasets[1].axis, Some(Axis::Right));
        assert_eq!(series.datasets[0].points, vec![Some(12.0), None, None]);
        assert_eq!(series.datasets[3].points, vec![None, None, None]);
        assert!(series.datasets[0].band.is_none());
    }

    #[test]
    fn room_filter_and_titles() {
        let b = buckets(
            ChartWindow::Hour,
            vec![
                json!({"timestamp": "2024-08-14T10:00:00Z", "sensor_id": "ac1_r1", "t1": 12.0}),
                json!({"timestamp": "2024-08-14T10:00:00Z", "sensor_id": "ac2_r2", "t1": 14.0}),
            ],
        );
        let series = project(&b, ChartMetric::AcTemp, "r2");
        assert_eq!(series.title, "Room 2 AC Vent & Motor Temp (°C) — Last 1 Hour");
        assert!(series.datasets.iter().all(|d| d.sensor_id.as_str() == "ac2_r2"));
        assert_eq!(
            ChartMetric::RoomTempRh.title("r1"),
            "Room 1 Temperature & Humidity (°C, %)"
        );
        assert_eq!(ChartMetric::RoomTempRh.title("all"), "Room Temperature & Humidity (°C, %)");
    }

    #[test]
    fn rollup_windows_include_bands() {
        let b = buckets(
            ChartWindow::Day,
            vec![json!({
                "timestamp": "2024-08-14T10:00:00Z", "sensor_id": "ecs_1",
                "t1": 22.0, "t1_min": 21.0, "t1_max": 23.0, "rh": 45.0
            })],
        );
        let series = project(&b, ChartMetric::RoomTempRh, "all");
        assert_eq!(series.title, "Room Temperature & Humidity (°C, %) — Last 24 Hours");
        let labels: Vec<_> = series.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["Room Temp 1_R2", "Room Temp 2_R2", "Humidity_R2"]);
        let band = series.datasets[0].band.as_ref().expect("band on rollup");
        assert_eq!(
            band[0],
            Band {
                min: Some(21.0),
                max: Some(23.0)
            }
        );
        assert_eq!(series.datasets[2].axis, Some(Axis::Right));
        assert_eq!(series.datasets[2].points, vec![Some(45.0)]);
    }

    #[test]
    fn particulate_selectors_only_take_ecs() {
        let ts = Utc.with_ymd_and_hms(2024, 8, 14, 10, 0, 0).unwrap();
        let rows = vec![
            ChartRow::from_reading(SensorReading::new(ts, "ecs_2").with(Metric::Pm25, 9.0).with(Metric::Nc10, 3.0)),
            ChartRow::from_reading(SensorReading::new(ts, "ac1_r1").with(Metric::Pm25, 1.0)),
        ];
        let b = ChartAggregator::new(FixedOffset::east_opt(0).unwrap()).bucket(&rows, ChartWindow::Hour);

        let pm = project(&b, ChartMetric::Pm, "all");
        let labels: Vec<_> = pm.datasets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["PM1_R2", "PM25_R2", "PM10_R2"]);
        assert_eq!(pm.datasets[1].points, vec![Some(9.0)]);

        let nc = project(&b, ChartMetric::Nc, "all");
        assert_eq!(nc.datasets.len(), 4);
        assert_eq!(nc.datasets[3].label, "NC10_R2");

        let avg = project(&b, ChartMetric::AvgParticleSize, "all");
        assert_eq!(avg.datasets[0].label, "Avg Particle Size_R2");
        assert_eq!(avg.datasets[0].points, vec![None]);
    }

    #[test]
    fn selectors_parse() {
        for m in ChartMetric::ALL {
            assert_eq!(ChartMetric::parse(m.as_str()), Some(m));
        }
        assert_eq!(ChartMetric::parse("co2"), None);
    }
}
