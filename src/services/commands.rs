use chrono::{DateTime, Utc};
use log::info;

use crate::models::sensor::{tables, CommandRow, RelayTarget, SensorId};
use crate::store::{StoreError, TableStore, WriteError};

/// Writes actuator requests to `commands`. Fire-and-forget: the device picks
/// the row up on its own; there is no acknowledgement to wait for.
pub struct CommandSender<'a> {
    store: &'a dyn TableStore,
}

impl<'a> CommandSender<'a> {
    pub fn new(store: &'a dyn TableStore) -> Self {
        CommandSender { store }
    }

    pub fn send(
        &self,
        sensor_id: &SensorId,
        target: RelayTarget,
        state: bool,
        now: DateTime<Utc>,
    ) -> Result<CommandRow, WriteError> {
        let write_err = |source| WriteError {
            table: tables::COMMANDS.to_string(),
            source,
        };
        let row = CommandRow {
            sensor_id: sensor_id.clone(),
            target,
            state,
            issued_at: now,
        };
        let value = serde_json::to_value(&row).map_err(|e| write_err(StoreError::Json(e)))?;
        self.store.insert(tables::COMMANDS, &[value]).map_err(write_err)?;
        info!(
            "Command issued: {} {} ({}) -> {}",
            row.sensor_id,
            row.target,
            row.target.device_name(),
            on_off(row.state)
        );
        Ok(row)
    }
}

pub fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}

/// Parse `SENSOR:TARGET:on|off`, as accepted by `--command`.
pub fn parse_command_spec(spec: &str) -> Result<(SensorId, RelayTarget, bool), String> {
    let mut parts = spec.split(':');
    let (Some(sensor), Some(target), Some(state), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("command must look like SENSOR:TARGET:on|off, got {spec:?}"));
    };
    if sensor.is_empty() {
        return Err("command sensor id is empty".to_string());
    }
    let target = RelayTarget::parse(target).ok_or_else(|| format!("unknown command target: {target}"))?;
    let state = match state.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => true,
        "off" | "false" | "0" => false,
        other => return Err(format!("command state must be on or off, got {other}")),
    };
    Ok((SensorId::new(sensor), target, state))
}
