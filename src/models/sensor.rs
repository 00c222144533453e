//! Row models for the hosted tables the monitor reads and writes.
//!
//! Notes
//! - Reading fields are sparse: `None` means the device does not report that
//!   metric, never zero.
//! - Timestamps use `chrono` (`DateTime<Utc>`); see `utils::deserialize_timestamp`
//!   for the accepted wire formats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{deserialize_bool_like, deserialize_timestamp};

// =====================
// Table names
// =====================

pub mod tables {
    pub const SENSOR_DATA: &str = "sensor_data";
    pub const AVG_10MIN: &str = "avg_10min";
    pub const AVG_1HR: &str = "avg_1hr";
    pub const AVG_4HR: &str = "avg_4hr";
    pub const AVG_1DAY: &str = "avg_1day";
    pub const ALERT_SETTINGS: &str = "alert_settings";
    pub const COMMANDS: &str = "commands";
}

// =====================
// Identifiers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub String);

impl SensorId {
    pub fn new(id: impl Into<String>) -> Self {
        SensorId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Device class encoded in the identifier: the segment before the first
    /// `_` with trailing digits removed (`ecs_1` -> `ecs`, `ac1_r2` -> `ac`).
    pub fn class(&self) -> &str {
        let head = self.0.split('_').next().unwrap_or_default();
        head.trim_end_matches(|c: char| c.is_ascii_digit())
    }

    /// True for room filter `all` or when the id carries the `_{room}` segment.
    pub fn in_room(&self, room: &str) -> bool {
        room == "all" || self.0.contains(&format!("_{room}"))
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =====================
// Metrics
// =====================

/// Numeric reading columns. The column name doubles as the `parameter` of an
/// alert setting and as the prefix of a rollup's `_min`/`_max` columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    T1,
    T2,
    Rh,
    Rh1,
    Rh2,
    Pm1,
    Pm25,
    Pm10,
    #[serde(rename = "nc0_5")]
    Nc0_5,
    #[serde(rename = "nc1_0")]
    Nc1_0,
    #[serde(rename = "nc2_5")]
    Nc2_5,
    Nc10,
    Nc,
    AvgParticleSize,
}

impl Metric {
    pub const ALL: [Metric; 14] = [
        Metric::T1,
        Metric::T2,
        Metric::Rh,
        Metric::Rh1,
        Metric::Rh2,
        Metric::Pm1,
        Metric::Pm25,
        Metric::Pm10,
        Metric::Nc0_5,
        Metric::Nc1_0,
        Metric::Nc2_5,
        Metric::Nc10,
        Metric::Nc,
        Metric::AvgParticleSize,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Metric::T1 => "t1",
            Metric::T2 => "t2",
            Metric::Rh => "rh",
            Metric::Rh1 => "rh1",
            Metric::Rh2 => "rh2",
            Metric::Pm1 => "pm1",
            Metric::Pm25 => "pm25",
            Metric::Pm10 => "pm10",
            Metric::Nc0_5 => "nc0_5",
            Metric::Nc1_0 => "nc1_0",
            Metric::Nc2_5 => "nc2_5",
            Metric::Nc10 => "nc10",
            Metric::Nc => "nc",
            Metric::AvgParticleSize => "avg_particle_size",
        }
    }

    #[cfg(test)]
    pub fn from_column(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.column() == name)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

// =====================
// Rows
// =====================

/// One row of `sensor_data` or of a rollup table (rollup extrema are read
/// separately, see `services::chart::ChartRow`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub sensor_id: SensorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rh1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rh2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pm1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pm25: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pm10: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nc0_5: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nc1_0: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nc2_5: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nc10: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_particle_size: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_bool_like", skip_serializing_if = "Option::is_none")]
    pub relay1: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_bool_like", skip_serializing_if = "Option::is_none")]
    pub relay2: Option<bool>,
}

impl SensorReading {
    /// Empty reading; fields are filled in by the caller.
    pub fn new(timestamp: DateTime<Utc>, sensor_id: impl Into<String>) -> Self {
        SensorReading {
            timestamp,
            sensor_id: SensorId::new(sensor_id),
            t1: None,
            t2: None,
            rh: None,
            rh1: None,
            rh2: None,
            pm1: None,
            pm25: None,
            pm10: None,
            nc0_5: None,
            nc1_0: None,
            nc2_5: None,
            nc10: None,
            nc: None,
            avg_particle_size: None,
            relay1: None,
            relay2: None,
        }
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::T1 => self.t1,
            Metric::T2 => self.t2,
            Metric::Rh => self.rh,
            Metric::Rh1 => self.rh1,
            Metric::Rh2 => self.rh2,
            Metric::Pm1 => self.pm1,
            Metric::Pm25 => self.pm25,
            Metric::Pm10 => self.pm10,
            Metric::Nc0_5 => self.nc0_5,
            Metric::Nc1_0 => self.nc1_0,
            Metric::Nc2_5 => self.nc2_5,
            Metric::Nc10 => self.nc10,
            Metric::Nc => self.nc,
            Metric::AvgParticleSize => self.avg_particle_size,
        }
    }

    pub fn set_value(&mut self, metric: Metric, value: Option<f64>) {
        let slot = match metric {
            Metric::T1 => &mut self.t1,
            Metric::T2 => &mut self.t2,
            Metric::Rh => &mut self.rh,
            Metric::Rh1 => &mut self.rh1,
            Metric::Rh2 => &mut self.rh2,
            Metric::Pm1 => &mut self.pm1,
            Metric::Pm25 => &mut self.pm25,
            Metric::Pm10 => &mut self.pm10,
            Metric::Nc0_5 => &mut self.nc0_5,
            Metric::Nc1_0 => &mut self.nc1_0,
            Metric::Nc2_5 => &mut self.nc2_5,
            Metric::Nc10 => &mut self.nc10,
            Metric::Nc => &mut self.nc,
            Metric::AvgParticleSize => &mut self.avg_particle_size,
        };
        *slot = value;
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set_value(metric, Some(value));
        self
    }

    /// Metrics this row reports, in column order.
    pub fn present_metrics(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .into_iter()
            .filter_map(|m| self.value(m).map(|v| (m, v)))
    }
}

/// Row of `alert_settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettingRow {
    pub sensor_type: String,
    pub parameter: String,
    #[serde(default)]
    pub min_threshold: Option<f64>,
    #[serde(default)]
    pub max_threshold: Option<f64>,
}

/// Actuator channel addressed by a command.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayTarget {
    /// Air purifier
    Relay1,
    /// Dehumidifier
    Relay2,
}

impl RelayTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayTarget::Relay1 => "relay1",
            RelayTarget::Relay2 => "relay2",
        }
    }

    pub fn device_name(self) -> &'static str {
        match self {
            RelayTarget::Relay1 => "Air Purifier",
            RelayTarget::Relay2 => "Dehumidifier",
        }
    }

    pub fn parse(s: &str) -> Option<RelayTarget> {
        match s {
            "relay1" => Some(RelayTarget::Relay1),
            "relay2" => Some(RelayTarget::Relay2),
            _ => None,
        }
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row inserted into `commands`. There is no acknowledgement column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRow {
    pub sensor_id: SensorId,
    pub target: RelayTarget,
    pub state: bool,
    pub issued_at: DateTime<Utc>,
}
