use log::{debug, info};
use std::collections::BTreeMap;

use crate::models::sensor::{tables, AlertSettingRow};
use crate::store::{FetchError, Query, StoreError, TableStore};
use crate::utils::{decode_rows, format_number};

/// Bounds for one `(sensor_class, parameter)` pair. `None` means no limit in
/// that direction.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct ThresholdRule {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

pub fn threshold_key(sensor_class: &str, parameter: &str) -> String {
    format!("{}_{}", sensor_class, parameter)
}

/// Threshold mapping loaded from `alert_settings`, keyed
/// `"{sensor_type}_{parameter}"`. Owned by the monitor and lent to the
/// evaluator for each cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdStore {
    rules: BTreeMap<String, ThresholdRule>,
}

impl ThresholdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: &[AlertSettingRow]) -> Self {
        let rules = rows
            .iter()
            .map(|r| {
                (
                    threshold_key(&r.sensor_type, &r.parameter),
                    ThresholdRule {
                        min: r.min_threshold,
                        max: r.max_threshold,
                    },
                )
            })
            .collect();
        ThresholdStore { rules }
    }

    pub fn get(&self, sensor_class: &str, parameter: &str) -> Option<&ThresholdRule> {
        self.rules.get(&threshold_key(sensor_class, parameter))
    }

    pub fn insert(&mut self, sensor_class: &str, parameter: &str, rule: ThresholdRule) {
        self.rules.insert(threshold_key(sensor_class, parameter), rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Replace the whole mapping with the current contents of
    /// `alert_settings`. On failure the existing mapping is kept.
    ///
    /// Returns the list-view lines for the loaded rows.
    pub fn load(&mut self, store: &dyn TableStore) -> Result<Vec<String>, FetchError> {
        let fetch_err = |source| FetchError {
            table: tables::ALERT_SETTINGS.to_string(),
            source,
        };
        let raw = store
            .select(&Query::from(tables::ALERT_SETTINGS))
            .map_err(fetch_err)?;
        let rows: Vec<AlertSettingRow> = decode_rows(raw).map_err(|e| fetch_err(StoreError::Decode(e)))?;

        let replacement = ThresholdStore::from_rows(&rows);
        debug!("Thresholds: {} row(s) -> {} rule(s)", rows.len(), replacement.len());
        *self = replacement;
        info!("Loaded {} alert threshold(s)", self.len());

        Ok(rows.iter().map(list_line).collect())
    }
}

fn list_line(row: &AlertSettingRow) -> String {
    let show = |v: Option<f64>| v.map(format_number).unwrap_or_else(|| "-".to_string());
    format!(
        "{} - {}: Min {}, Max {}",
        row.sensor_type,
        row.parameter,
        show(row.min_threshold),
        show(row.max_threshold)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn settings_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_rows(
            tables::ALERT_SETTINGS,
            [
                json!({"sensor_type": "ecs", "parameter": "t1", "min_threshold": 20, "max_threshold": 30}),
                json!({"sensor_type": "ecs", "parameter": "rh1", "min_threshold": null, "max_threshold": 60}),
            ],
        );
        store
    }

    #[test]
    fn load_replaces_mapping_and_lists_rows() {
        let store = settings_store();
        let mut thresholds = ThresholdStore::new();
        thresholds.insert(
            "ac",
            "t2",
            ThresholdRule {
                min: None,
                max: Some(90.0),
            },
        );

        let lines = thresholds.load(&store).expect("load");
        assert_eq!(
            lines,
            vec!["ecs - t1: Min 20, Max 30".to_string(), "ecs - rh1: Min -, Max 60".to_string()]
        );
        assert_eq!(thresholds.len(), 2);
        assert_eq!(
            thresholds.get("ecs", "t1"),
            Some(&ThresholdRule {
                min: Some(20.0),
                max: Some(30.0)
            })
        );
        assert_eq!(thresholds.get("ecs", "rh1").and_then(|r| r.min), None);
        // no merge with previous contents
        assert!(thresholds.get("ac", "t2").is_none());
    }

    #[test]
    fn failed_load_keeps_previous_mapping() {
        let store = settings_store();
        let mut thresholds = ThresholdStore::new();
        thresholds.load(&store).expect("first load");
        let before = thresholds.clone();

        store.fail_table(tables::ALERT_SETTINGS);
        let err = thresholds.load(&store).expect_err("second load fails");
        assert_eq!(err.table, "alert_settings");
        assert!(err.source.message().contains("alert_settings"));
        assert_eq!(thresholds, before);
    }

    #[test]
    fn malformed_rows_fail_without_partial_update() {
        let store = settings_store();
        store.put_rows(tables::ALERT_SETTINGS, [json!({"sensor_type": "ecs"})]);
        let mut thresholds = ThresholdStore::new();
        thresholds.insert("ecs", "t2", ThresholdRule::default());

        let err = thresholds.load(&store).expect_err("missing parameter column");
        assert!(matches!(err.source, StoreError::Decode(_)));
        assert_eq!(thresholds.len(), 1);
    }
}
