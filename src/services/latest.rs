use std::collections::HashSet;

#[cfg(test)]
use crate::models::sensor::SensorId;
use crate::models::sensor::{tables, SensorReading};
use crate::store::{FetchError, Order, Query, StoreError, TableStore};
use crate::utils::decode_rows;

/// Newest `limit` raw rows, newest first.
pub fn fetch_recent(store: &dyn TableStore, limit: usize) -> Result<Vec<SensorReading>, FetchError> {
    let fetch_err = |source| FetchError {
        table: tables::SENSOR_DATA.to_string(),
        source,
    };
    let query = Query::from(tables::SENSOR_DATA)
        .order("timestamp", Order::Descending)
        .limit(limit);
    let raw = store.select(&query).map_err(fetch_err)?;
    decode_rows(raw).map_err(|e| fetch_err(StoreError::Decode(e)))
}

/// Most recent reading per sensor, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestReadings {
    readings: Vec<SensorReading>,
}

impl LatestReadings {
    /// Keep the first row per `sensor_id`. Rows must already be newest-first;
    /// nothing is sorted here.
    pub fn reduce(rows: impl IntoIterator<Item = SensorReading>) -> Self {
        let mut seen = HashSet::new();
        let readings = rows
            .into_iter()
            .filter(|r| seen.insert(r.sensor_id.clone()))
            .collect();
        LatestReadings { readings }
    }

    #[cfg(test)]
    pub fn get(&self, sensor_id: &str) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.sensor_id.as_str() == sensor_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }

    #[cfg(test)]
    pub fn sensor_ids(&self) -> impl Iterator<Item = &SensorId> {
        self.readings.iter().map(|r| &r.sensor_id)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
