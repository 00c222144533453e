//! Threshold alerts over the latest reading of each sensor.
//!
//! What is checked is data, not code: an `AlertProfile` lists, per sensor
//! class, the monitored parameters with their unit group and which bounds
//! apply. The two field-naming conventions in the fleet (`rh1`/`rh2` per
//! channel versus a single `rh` with an `nc` aggregate) are two profiles.
//!
//! There is no state between cycles: a breach that persists produces the same
//! alert every time `evaluate` runs.

use core::fmt;
use serde::Serialize;

use crate::models::sensor::{Metric, SensorId};
use crate::services::latest::LatestReadings;
use crate::services::thresholds::ThresholdStore;
use crate::utils::format_number;

/// Unit family of a parameter; decides how values are printed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParameterGroup {
    Temperature,
    Humidity,
    MassConcentration,
    CountDensity,
    ParticleSize,
}

impl ParameterGroup {
    pub fn unit(self) -> &'static str {
        match self {
            ParameterGroup::Temperature => "",
            ParameterGroup::Humidity => "%",
            ParameterGroup::MassConcentration => "μg/m³",
            ParameterGroup::CountDensity => "/L",
            ParameterGroup::ParticleSize => "μm",
        }
    }

    fn label(self, metric: Metric) -> String {
        match self {
            ParameterGroup::Temperature => metric.column().to_string(),
            _ => metric.column().to_uppercase(),
        }
    }

    fn with_unit(self, value: f64) -> String {
        match self {
            ParameterGroup::Temperature => format_number(value),
            ParameterGroup::Humidity => format!("{}%", format_number(value)),
            _ => format!("{} {}", format_number(value), self.unit()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoundCheck {
    Both,
    MaxOnly,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParameterRule {
    pub metric: Metric,
    pub group: ParameterGroup,
    pub checks: BoundCheck,
}

impl ParameterRule {
    const fn new(metric: Metric, group: ParameterGroup, checks: BoundCheck) -> Self {
        ParameterRule { metric, group, checks }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassRules {
    /// Class as derived by `SensorId::class` and stored in `alert_settings.sensor_type`.
    pub class: &'static str,
    pub parameters: Vec<ParameterRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertProfile {
    pub name: &'static str,
    pub classes: Vec<ClassRules>,
}

impl AlertProfile {
    pub const DUAL_HUMIDITY: &'static str = "dual-rh";
    pub const SINGLE_HUMIDITY: &'static str = "single-rh";

    /// ECS units with two SHT35 channels (`t1`/`rh1`, `t2`/`rh2`) and an
    /// SPS30 particulate sensor. Only temperatures have a lower bound.
    pub fn dual_humidity() -> Self {
        use BoundCheck::*;
        use ParameterGroup::*;
        AlertProfile {
            name: Self::DUAL_HUMIDITY,
            classes: vec![ClassRules {
                class: "ecs",
                parameters: vec![
                    ParameterRule::new(Metric::T1, Temperature, Both),
                    ParameterRule::new(Metric::T2, Temperature, Both),
                    ParameterRule::new(Metric::Rh1, Humidity, MaxOnly),
                    ParameterRule::new(Metric::Rh2, Humidity, MaxOnly),
                    ParameterRule::new(Metric::Pm1, MassConcentration, MaxOnly),
                    ParameterRule::new(Metric::Pm25, MassConcentration, MaxOnly),
                    ParameterRule::new(Metric::Pm10, MassConcentration, MaxOnly),
                    ParameterRule::new(Metric::AvgParticleSize, ParticleSize, MaxOnly),
                    ParameterRule::new(Metric::Nc0_5, CountDensity, MaxOnly),
                    ParameterRule::new(Metric::Nc1_0, CountDensity, MaxOnly),
                    ParameterRule::new(Metric::Nc2_5, CountDensity, MaxOnly),
                    ParameterRule::new(Metric::Nc10, CountDensity, MaxOnly),
                ],
            }],
        }
    }

    /// Single-humidity ECS units plus AC vent/motor probes.
    pub fn single_humidity() -> Self {
        use BoundCheck::*;
        use ParameterGroup::*;
        AlertProfile {
            name: Self::SINGLE_HUMIDITY,
            classes: vec![
                ClassRules {
                    class: "ecs",
                    parameters: vec![
                        ParameterRule::new(Metric::T1, Temperature, Both),
                        ParameterRule::new(Metric::T2, Temperature, Both),
                        ParameterRule::new(Metric::Rh, Humidity, Both),
                        ParameterRule::new(Metric::Pm1, MassConcentration, Both),
                        ParameterRule::new(Metric::Pm25, MassConcentration, Both),
                        ParameterRule::new(Metric::Pm10, MassConcentration, Both),
                        ParameterRule::new(Metric::Nc, CountDensity, Both),
                        ParameterRule::new(Metric::AvgParticleSize, ParticleSize, Both),
                    ],
                },
                ClassRules {
                    class: "ac",
                    parameters: vec![
                        ParameterRule::new(Metric::T1, Temperature, Both),
                        ParameterRule::new(Metric::T2, Temperature, Both),
                    ],
                },
            ],
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            Self::DUAL_HUMIDITY => Some(Self::dual_humidity()),
            Self::SINGLE_HUMIDITY => Some(Self::single_humidity()),
            _ => None,
        }
    }

    pub fn class_rules(&self, class: &str) -> Option<&ClassRules> {
        self.classes.iter().find(|c| c.class == class)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Breach {
    BelowMinimum,
    AboveMaximum,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub sensor_id: SensorId,
    pub class: String,
    pub parameter: Metric,
    pub breach: Breach,
    pub value: f64,
    pub bound: f64,
    pub message: String,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvaluator {
    profile: AlertProfile,
}

impl AlertEvaluator {
    pub fn new(profile: AlertProfile) -> Self {
        AlertEvaluator { profile }
    }

    /// Alerts in sensor order, then parameter order. Sensors whose class is not
    /// in the profile, parameters without a rule, and absent fields are skipped.
    pub fn evaluate(&self, latest: &LatestReadings, thresholds: &ThresholdStore) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for reading in latest.iter() {
            let class = reading.sensor_id.class();
            let Some(rules) = self.profile.class_rules(class) else {
                continue;
            };
            for param in &rules.parameters {
                let Some(rule) = thresholds.get(class, param.metric.column()) else {
                    continue;
                };
                let Some(value) = reading.value(param.metric) else {
                    continue;
                };
                let make = |breach, bound| {
                    build_alert(&reading.sensor_id, class, param, breach, value, bound)
                };
                // min > max is not rejected; both may fire
                if param.checks == BoundCheck::Both
                    && let Some(min) = rule.min
                    && value < min
                {
                    alerts.push(make(Breach::BelowMinimum, min));
                }
                if let Some(max) = rule.max
                    && value > max
                {
                    alerts.push(make(Breach::AboveMaximum, max));
                }
            }
        }
        alerts
    }
}

fn build_alert(
    sensor_id: &SensorId,
    class: &str,
    param: &ParameterRule,
    breach: Breach,
    value: f64,
    bound: f64,
) -> Alert {
    let (what, op) = match breach {
        Breach::BelowMinimum => ("below minimum", '<'),
        Breach::AboveMaximum => ("above maximum", '>'),
    };
    let message = format!(
        "{} alert in {}: {} {} ({} {} {})",
        class.to_uppercase(),
        sensor_id,
        param.group.label(param.metric),
        what,
        param.group.with_unit(value),
        op,
        param.group.with_unit(bound),
    );
    Alert {
        sensor_id: sensor_id.clone(),
        class: class.to_string(),
        parameter: param.metric,
        breach,
        value,
        bound,
        message,
    }
}
