//! Synthetic fleet for `--demo`: three ECS units and two AC probes with raw
//! readings for the last hour and rollups covering every chart window.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::f64::consts::PI;

use crate::models::sensor::{tables, Metric, SensorReading};
use crate::store::MemoryStore;

const SEED: u64 = 0x0ec5_2024_5eed_cafe;
const ECS_IDS: [&str; 3] = ["ecs_1", "ecs_2", "ecs_3"];
const AC_IDS: [&str; 2] = ["ac1_r1", "ac2_r2"];
/// Samples folded into each rollup row.
const ROLLUP_SAMPLES: usize = 6;

pub fn seed(store: &MemoryStore, now: DateTime<Utc>) {
    let mut rng = SmallRng::seed_from_u64(SEED);
    let now = now.duration_trunc(Duration::minutes(1)).unwrap_or(now);

    store.put_rows(tables::ALERT_SETTINGS, default_alert_settings());

    let mut raw = Vec::new();
    let mut ts = now - Duration::hours(1);
    while ts <= now {
        for (i, id) in ECS_IDS.iter().enumerate() {
            raw.push(reading_value(&ecs_reading(id, i, ts, &mut rng)));
        }
        for (i, id) in AC_IDS.iter().enumerate() {
            raw.push(reading_value(&ac_reading(id, i, ts, &mut rng)));
        }
        ts += Duration::minutes(1);
    }
    let raw_count = raw.len();
    store.put_rows(tables::SENSOR_DATA, raw);

    let rollups = [
        (tables::AVG_10MIN, Duration::minutes(10), Duration::hours(24)),
        (tables::AVG_1HR, Duration::hours(1), Duration::hours(168)),
        (tables::AVG_4HR, Duration::hours(4), Duration::hours(720)),
        (tables::AVG_1DAY, Duration::days(1), Duration::hours(8760)),
    ];
    for (table, step, span) in rollups {
        let rows = rollup_rows(now, step, span, &mut rng);
        info!("Demo: {} row(s) in {}", rows.len(), table);
        store.put_rows(table, rows);
    }
    info!("Demo: {} raw row(s) in {}", raw_count, tables::SENSOR_DATA);
}

fn default_alert_settings() -> Vec<Value> {
    let rule = |sensor_type: &str, parameter: &str, min: Option<f64>, max: Option<f64>| {
        json!({
            "sensor_type": sensor_type,
            "parameter": parameter,
            "min_threshold": min,
            "max_threshold": max,
        })
    };
    vec![
        rule("ecs", "t1", Some(18.0), Some(30.0)),
        rule("ecs", "t2", Some(18.0), Some(30.0)),
        rule("ecs", "rh", Some(30.0), Some(65.0)),
        rule("ecs", "rh1", None, Some(65.0)),
        rule("ecs", "rh2", None, Some(65.0)),
        rule("ecs", "pm25", None, Some(35.0)),
        rule("ecs", "pm10", None, Some(50.0)),
        rule("ecs", "nc", None, Some(3000.0)),
        rule("ecs", "nc0_5", None, Some(2500.0)),
        rule("ecs", "avg_particle_size", None, Some(2.5)),
        rule("ac", "t1", Some(5.0), Some(25.0)),
        rule("ac", "t2", None, Some(80.0)),
    ]
}

fn day_fraction(ts: DateTime<Utc>) -> f64 {
    ts.num_seconds_from_midnight() as f64 / 86_400.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn ecs_reading(id: &str, index: usize, ts: DateTime<Utc>, rng: &mut SmallRng) -> SensorReading {
    let daily = (2.0 * PI * (day_fraction(ts) - 0.375)).sin();
    // ecs_3 sits in a warm room so the demo shows alerts
    let base_temp = 23.0 + index as f64 * 3.5;
    let t1 = base_temp + 2.0 * daily + rng.random_range(-0.3..0.3);
    let t2 = t1 + rng.random_range(-0.6..0.6);
    let rh1 = 50.0 - 6.0 * daily + rng.random_range(-2.0..2.0);
    let rh2 = rh1 + rng.random_range(-1.5..1.5);
    let pm1 = 4.0 + rng.random_range(0.0..3.0) + index as f64;
    let pm25 = pm1 * rng.random_range(1.4..1.8);
    let pm10 = pm25 * rng.random_range(1.1..1.4);
    let nc0_5 = pm1 * rng.random_range(90.0..120.0);
    let nc1_0 = nc0_5 * 0.85;
    let nc2_5 = nc1_0 * 0.12;
    let nc10 = nc2_5 * 0.05;

    let mut r = SensorReading::new(ts, id)
        .with(Metric::T1, round1(t1))
        .with(Metric::T2, round1(t2))
        .with(Metric::Rh1, round1(rh1))
        .with(Metric::Rh2, round1(rh2))
        .with(Metric::Rh, round1((rh1 + rh2) / 2.0))
        .with(Metric::Pm1, round1(pm1))
        .with(Metric::Pm25, round1(pm25))
        .with(Metric::Pm10, round1(pm10))
        .with(Metric::Nc0_5, round1(nc0_5))
        .with(Metric::Nc1_0, round1(nc1_0))
        .with(Metric::Nc2_5, round1(nc2_5))
        .with(Metric::Nc10, round1(nc10))
        .with(Metric::Nc, round1(nc0_5 + nc1_0 + nc2_5 + nc10))
        .with(Metric::AvgParticleSize, round1(rng.random_range(0.4..0.9)));
    r.relay1 = Some(pm25 > 10.0);
    r.relay2 = Some(rh1 > 55.0);
    r
}

fn ac_reading(id: &str, index: usize, ts: DateTime<Utc>, rng: &mut SmallRng) -> SensorReading {
    let daily = (2.0 * PI * (day_fraction(ts) - 0.375)).sin();
    let vent = 12.0 + index as f64 + 1.5 * daily + rng.random_range(-0.5..0.5);
    let motor = 55.0 + 8.0 * daily + rng.random_range(-2.0..2.0);
    SensorReading::new(ts, id)
        .with(Metric::T1, round1(vent))
        .with(Metric::T2, round1(motor))
}

fn reading_value(r: &SensorReading) -> Value {
    serde_json::to_value(r).unwrap_or(Value::Null)
}

/// One row per sensor and step: mean plus `_min`/`_max` over a few samples.
fn rollup_rows(now: DateTime<Utc>, step: Duration, span: Duration, rng: &mut SmallRng) -> Vec<Value> {
    let mut rows = Vec::new();
    let start = (now - span).duration_trunc(step).unwrap_or(now - span);
    let sample_gap = step / ROLLUP_SAMPLES as i32;
    let mut ts = start;
    while ts <= now {
        let sensors = ECS_IDS
            .iter()
            .enumerate()
            .map(|(i, id)| (true, i, *id))
            .chain(AC_IDS.iter().enumerate().map(|(i, id)| (false, i, *id)));
        for (is_ecs, index, id) in sensors {
            let samples: Vec<SensorReading> = (0..ROLLUP_SAMPLES)
                .map(|k| {
                    let at = ts + sample_gap * k as i32;
                    if is_ecs {
                        ecs_reading(id, index, at, rng)
                    } else {
                        ac_reading(id, index, at, rng)
                    }
                })
                .collect();
            rows.push(fold_samples(id, ts, &samples));
        }
        ts += step;
    }
    rows
}

fn fold_samples(id: &str, ts: DateTime<Utc>, samples: &[SensorReading]) -> Value {
    let mut row = Map::new();
    row.insert("timestamp".into(), json!(ts));
    row.insert("sensor_id".into(), json!(id));
    for metric in Metric::ALL {
        let values: Vec<f64> = samples.iter().filter_map(|s| s.value(metric)).collect();
        if values.is_empty() {
            continue;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let col = metric.column();
        row.insert(col.into(), json!(round1(mean)));
        row.insert(format!("{col}_min"), json!(min));
        row.insert(format!("{col}_max"), json!(max));
    }
    Value::Object(row)
}
