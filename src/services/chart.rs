//! Time-bucketed chart data.
//!
//! A window picks the source table (raw or one of the rollups) and the
//! lookback. Rows are grouped under a display label whose resolution depends
//! on the window; rows that format to the same label for the same sensor
//! replace each other, last one wins.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use log::debug;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::models::sensor::{tables, Metric, SensorId, SensorReading};
use crate::store::{FetchError, Order, Query, StoreError, TableStore};
use crate::utils::number_field;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChartWindow {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl ChartWindow {
    pub const ALL: [ChartWindow; 5] = [
        ChartWindow::Hour,
        ChartWindow::Day,
        ChartWindow::Week,
        ChartWindow::Month,
        ChartWindow::Year,
    ];

    pub fn parse(s: &str) -> Option<ChartWindow> {
        ChartWindow::ALL.into_iter().find(|w| w.as_str() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChartWindow::Hour => "1h",
            ChartWindow::Day => "24h",
            ChartWindow::Week => "7d",
            ChartWindow::Month => "30d",
            ChartWindow::Year => "1y",
        }
    }

    pub fn source_table(self) -> &'static str {
        match self {
            ChartWindow::Hour => tables::SENSOR_DATA,
            ChartWindow::Day => tables::AVG_10MIN,
            ChartWindow::Week => tables::AVG_1HR,
            ChartWindow::Month => tables::AVG_4HR,
            ChartWindow::Year => tables::AVG_1DAY,
        }
    }

    pub fn lookback(self) -> Duration {
        let hours = match self {
            ChartWindow::Hour => 1,
            ChartWindow::Day => 24,
            ChartWindow::Week => 168,
            ChartWindow::Month => 720,
            ChartWindow::Year => 8760,
        };
        Duration::hours(hours)
    }

    /// Everything except the raw window reads pre-aggregated rows carrying
    /// `<metric>_min` / `<metric>_max`.
    pub fn is_rollup(self) -> bool {
        self != ChartWindow::Hour
    }

    fn label_format(self) -> &'static str {
        match self {
            ChartWindow::Hour | ChartWindow::Day => "%H:%M",
            ChartWindow::Week | ChartWindow::Month => "%d/%m %H:%M",
            ChartWindow::Year => "%d/%m",
        }
    }

    pub fn label(self, ts: DateTime<Utc>, offset: FixedOffset) -> String {
        ts.with_timezone(&offset).format(self.label_format()).to_string()
    }

    pub fn title(self) -> &'static str {
        match self {
            ChartWindow::Hour => "Last 1 Hour",
            ChartWindow::Day => "Last 24 Hours",
            ChartWindow::Week => "Last 7 Days",
            ChartWindow::Month => "Last 30 Days",
            ChartWindow::Year => "Last 1 Year",
        }
    }
}

impl Serialize for ChartWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One metric of one sensor in one bucket. `min`/`max` are only set for
/// rollup sources.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize)]
pub struct MetricCell {
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

pub type MetricRecord = BTreeMap<Metric, MetricCell>;

/// A fetched chart row: the reading plus, for rollups, per-metric extrema.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRow {
    pub reading: SensorReading,
    pub record: MetricRecord,
}

impl ChartRow {
    pub fn from_value(row: Value, rollup: bool) -> Result<Self, String> {
        let reading: SensorReading = serde_path_to_error::deserialize(&row).map_err(|e| e.to_string())?;
        let record = Metric::ALL
            .into_iter()
            .filter_map(|m| {
                let value = reading.value(m);
                let (min, max) = if rollup {
                    (
                        number_field(&row, &format!("{}_min", m.column())),
                        number_field(&row, &format!("{}_max", m.column())),
                    )
                } else {
                    (None, None)
                };
                let cell = MetricCell { value, min, max };
                (cell != MetricCell::default()).then_some((m, cell))
            })
            .collect();
        Ok(ChartRow { reading, record })
    }

    pub fn from_reading(reading: SensorReading) -> Self {
        let record = reading
            .present_metrics()
            .map(|(m, v)| {
                let cell = MetricCell {
                    value: Some(v),
                    ..MetricCell::default()
                };
                (m, cell)
            })
            .collect();
        ChartRow { reading, record }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucket {
    pub label: String,
    pub sensors: BTreeMap<SensorId, MetricRecord>,
}

/// Buckets in first-seen label order (chronological for ascending input).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBuckets {
    pub window: ChartWindow,
    pub buckets: Vec<TimeBucket>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ChartBuckets {
    pub fn new(window: ChartWindow) -> Self {
        ChartBuckets {
            window,
            buckets: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn get(&self, label: &str) -> Option<&TimeBucket> {
        self.index.get(label).map(|&i| &self.buckets[i])
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Sensors in order of first appearance across buckets.
    pub fn sensors(&self) -> Vec<&SensorId> {
        let mut seen: Vec<&SensorId> = Vec::new();
        for bucket in &self.buckets {
            for id in bucket.sensors.keys() {
                if !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen
    }

    fn put(&mut self, label: String, sensor: SensorId, record: MetricRecord) {
        let i = match self.index.get(&label) {
            Some(&i) => i,
            None => {
                self.buckets.push(TimeBucket {
                    label: label.clone(),
                    sensors: BTreeMap::new(),
                });
                self.index.insert(label, self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };
        self.buckets[i].sensors.insert(sensor, record);
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ChartAggregator {
    offset: FixedOffset,
}

impl ChartAggregator {
    /// `offset` is the timezone labels are rendered in.
    pub fn new(offset: FixedOffset) -> Self {
        ChartAggregator { offset }
    }

    pub fn bucket(&self, rows: &[ChartRow], window: ChartWindow) -> ChartBuckets {
        let mut out = ChartBuckets::new(window);
        for row in rows {
            let label = window.label(row.reading.timestamp, self.offset);
            out.put(label, row.reading.sensor_id.clone(), row.record.clone());
        }
        out
    }

    /// Query the window's table from `now - lookback`, ascending, keep the
    /// sensors in `room` and bucket them. Any failure discards the whole pass.
    pub fn fetch(
        &self,
        store: &dyn TableStore,
        window: ChartWindow,
        room: &str,
        now: DateTime<Utc>,
    ) -> Result<ChartBuckets, FetchError> {
        let table = window.source_table();
        let fetch_err = |source| FetchError {
            table: table.to_string(),
            source,
        };
        let query = Query::from(table)
            .gte("timestamp", now - window.lookback())
            .order("timestamp", Order::Ascending);
        let raw = store.select(&query).map_err(fetch_err)?;
        let total = raw.len();

        let rows = raw
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                ChartRow::from_value(v, window.is_rollup())
                    .map_err(|e| fetch_err(StoreError::Decode(format!("row {i}: {e}"))))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|r| r.reading.sensor_id.in_room(room))
            .collect::<Vec<_>>();
        debug!(
            "Chart: {} row(s) from {} ({} in room {})",
            total,
            table,
            rows.len(),
            room
        );
        Ok(self.bucket(&rows, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::series::{project, ChartMetric};
    use crate::store::MemoryStore;
    use crate::utils::format_timestamp;
    use chrono::TimeZone;
    use serde_json::json;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 14, h, m, s).unwrap()
    }

    fn raw(ts: DateTime<Utc>, id: &str, t1: f64) -> ChartRow {
        ChartRow::from_reading(SensorReading::new(ts, id).with(Metric::T1, t1))
    }

    #[test]
    fn window_table_and_lookback() {
        let expect = [
            ("1h", "sensor_data", 1),
            ("24h", "avg_10min", 24),
            ("7d", "avg_1hr", 168),
            ("30d", "avg_4hr", 720),
            ("1y", "avg_1day", 8760),
        ];
        for (name, table, hours) in expect {
            let w = ChartWindow::parse(name).expect("known window");
            assert_eq!(w.source_table(), table);
            assert_eq!(w.lookback(), Duration::hours(hours));
            assert_eq!(w.is_rollup(), name != "1h");
        }
        assert_eq!(ChartWindow::parse("2h"), None);
    }

    #[test]
    fn label_resolution_depends_on_window() {
        let ts = at(16, 5, 42);
        assert_eq!(ChartWindow::Hour.label(ts, utc()), "16:05");
        assert_eq!(ChartWindow::Day.label(ts, utc()), "16:05");
        assert_eq!(ChartWindow::Week.label(ts, utc()), "14/08 16:05");
        assert_eq!(ChartWindow::Month.label(ts, utc()), "14/08 16:05");
        assert_eq!(ChartWindow::Year.label(ts, utc()), "14/08");

        let cest = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(ChartWindow::Week.label(at(23, 30, 0), cest), "15/08 01:30");
    }

    #[test]
    fn same_label_same_sensor_keeps_last_row() {
        let agg = ChartAggregator::new(utc());
        let rows = vec![
            raw(at(10, 20, 0), "ecs_1", 21.0),
            raw(at(10, 20, 30), "ecs_1", 23.0),
            raw(at(10, 20, 45), "ecs_2", 30.0),
        ];
        let buckets = agg.bucket(&rows, ChartWindow::Day);
        assert_eq!(buckets.len(), 1);
        let bucket = buckets.get("10:20").expect("bucket");
        assert_eq!(bucket.sensors.len(), 2);
        assert_eq!(bucket.sensors[&SensorId::new("ecs_1")][&Metric::T1].value, Some(23.0));
        assert_eq!(bucket.sensors[&SensorId::new("ecs_2")][&Metric::T1].value, Some(30.0));
    }

    #[test]
    fn bucketing_is_idempotent_and_ordered() {
        let agg = ChartAggregator::new(utc());
        let rows = vec![
            raw(at(9, 0, 0), "ecs_1", 20.0),
            raw(at(9, 1, 0), "ecs_1", 20.5),
            raw(at(9, 2, 0), "ac1_r1", 12.0),
        ];
        let first = agg.bucket(&rows, ChartWindow::Hour);
        let second = agg.bucket(&rows, ChartWindow::Hour);
        assert_eq!(first, second);
        assert_eq!(first.labels().collect::<Vec<_>>(), vec!["09:00", "09:01", "09:02"]);
        let sensors: Vec<_> = first.sensors().into_iter().map(|s| s.as_str()).collect();
        assert_eq!(sensors, vec!["ecs_1", "ac1_r1"]);
    }

    #[test]
    fn rollup_rows_carry_extrema() {
        let row = json!({
            "timestamp": "2024-08-14T10:00:00Z",
            "sensor_id": "ecs_1",
            "t1": 22.0, "t1_min": 21.0, "t1_max": 23.5,
            "pm25": 8.0,
            "rh": null
        });
        let rolled = ChartRow::from_value(row.clone(), true).expect("decode");
        assert_eq!(
            rolled.record[&Metric::T1],
            MetricCell {
                value: Some(22.0),
                min: Some(21.0),
                max: Some(23.5)
            }
        );
        assert_eq!(rolled.record[&Metric::Pm25].min, None);
        assert!(!rolled.record.contains_key(&Metric::Rh));

        let plain = ChartRow::from_value(row, false).expect("decode");
        assert_eq!(plain.record[&Metric::T1].max, None);
    }

    fn load_hourly_fixture() -> Vec<Value> {
        let json = std::fs::read_to_string("tests/data/avg_1hr.json").expect("fixture present");
        serde_json::from_str(&json).expect("parse avg_1hr rows")
    }

    #[test]
    fn hourly_rollup_fixture_decodes_cells_and_bands() {
        let store = MemoryStore::new();
        store.put_rows(tables::AVG_1HR, load_hourly_fixture());
        let now = at(12, 0, 0);
        let buckets = ChartAggregator::new(utc())
            .fetch(&store, ChartWindow::Week, "all", now)
            .expect("fetch fixture");

        assert_eq!(buckets.labels().collect::<Vec<_>>(), vec!["14/08 10:00", "14/08 11:00"]);
        let first = &buckets.get("14/08 10:00").expect("10:00 bucket").sensors;
        let ecs = &first[&SensorId::new("ecs_1")];
        assert_eq!(ecs.len(), 12);
        assert_eq!(
            ecs[&Metric::Nc0_5],
            MetricCell {
                value: Some(512.0),
                min: Some(401.0),
                max: Some(640.5)
            }
        );
        assert!(!ecs.contains_key(&Metric::Rh));
        let ac = &first[&SensorId::new("ac1_r1")];
        assert_eq!(ac.keys().copied().collect::<Vec<_>>(), vec![Metric::T1, Metric::T2]);

        // value without extrema
        let later = &buckets.get("14/08 11:00").expect("11:00 bucket").sensors[&SensorId::new("ecs_1")];
        assert_eq!(later[&Metric::Pm25].value, Some(7.4));
        assert_eq!(later[&Metric::Pm25].min, None);

        let series = project(&buckets, ChartMetric::RoomTempRh, "all");
        let temp = series
            .datasets
            .iter()
            .find(|d| d.metric == Metric::T1)
            .expect("t1 dataset");
        assert_eq!(temp.points, vec![Some(23.4), Some(24.0)]);
        let band = temp.band.as_ref().expect("rollup band");
        assert_eq!((band[0].min, band[0].max), (Some(22.9), Some(24.1)));
        assert_eq!((band[1].min, band[1].max), (Some(23.5), Some(24.6)));
        let humidity = series
            .datasets
            .iter()
            .find(|d| d.metric == Metric::Rh)
            .expect("rh dataset");
        assert_eq!(humidity.points, vec![None, None]);
    }

    #[test]
    fn fetch_filters_window_and_room() {
        let now = at(12, 0, 0);
        let store = MemoryStore::new();
        store.put_rows(
            "avg_10min",
            [
                json!({"timestamp": format_timestamp(now - Duration::hours(30)), "sensor_id": "ac1_r1", "t1": 1.0}),
                json!({"timestamp": format_timestamp(now - Duration::hours(2)), "sensor_id": "ac2_r2", "t1": 2.0}),
                json!({"timestamp": format_timestamp(now - Duration::hours(1)), "sensor_id": "ac1_r1", "t1": 3.0, "t1_min": 2.5, "t1_max": 3.5}),
            ],
        );
        let agg = ChartAggregator::new(utc());
        let buckets = agg.fetch(&store, ChartWindow::Day, "r1", now).expect("fetch");
        assert_eq!(buckets.labels().collect::<Vec<_>>(), vec!["11:00"]);
        let cell = buckets.get("11:00").unwrap().sensors[&SensorId::new("ac1_r1")][&Metric::T1];
        assert_eq!(cell.max, Some(3.5));

        let all = agg.fetch(&store, ChartWindow::Day, "all", now).expect("fetch");
        assert_eq!(all.labels().collect::<Vec<_>>(), vec!["10:00", "11:00"]);
    }

    #[test]
    fn fetch_failure_returns_no_partial_result() {
        let store = MemoryStore::new();
        store.put_rows(
            "avg_1hr",
            [
                json!({"timestamp": "2024-08-14T10:00:00Z", "sensor_id": "ecs_1", "t1": 1.0}),
                json!({"timestamp": "2024-08-14T11:00:00Z", "sensor_id": "ecs_1", "t1": "bad"}),
            ],
        );
        let agg = ChartAggregator::new(utc());
        let err = agg
            .fetch(&store, ChartWindow::Week, "all", at(12, 0, 0))
            .expect_err("second row is malformed");
        assert_eq!(err.table, "avg_1hr");
        assert!(matches!(err.source, StoreError::Decode(_)));

        store.fail_table("avg_1hr");
        assert!(agg.fetch(&store, ChartWindow::Week, "all", at(12, 0, 0)).is_err());
    }
}
