//! Minimal runtime configuration helpers.
//! Defaults match the dashboard's behaviour (30 s polling, 200 latest rows).

use chrono::FixedOffset;
use std::time::Duration;
use std::{fs, path::Path};

use crate::services::alerts::AlertProfile;

pub const DEFAULT_POLL_SECS: u64 = 30;
pub const DEFAULT_READINGS_LIMIT: usize = 200;
pub const DEFAULT_CONNECT_RETRY_MS: u64 = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const KEY_FILE: &str = "supabase.key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Project URL, e.g. `https://abcd.supabase.co`.
    pub url: String,
    /// Project (anon) key sent with every request.
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` only in demo mode.
    pub backend: Option<Backend>,
    pub poll_interval: Duration,
    /// Rows fetched per cycle for the latest-reading pass.
    pub readings_limit: usize,
    pub alert_profile: AlertProfile,
    /// Timezone chart labels are rendered in.
    pub chart_offset: FixedOffset,
    /// Delay between reachability probes at startup.
    pub connect_retry: Duration,
    pub request_timeout: Duration,
    /// Reload `alert_settings` every N cycles; 0 loads once at startup.
    pub threshold_refresh_cycles: u64,
}

impl Config {
    pub fn from_env(demo: bool) -> Result<Self, String> {
        Self::from_lookup(demo, |k| std::env::var(k).ok(), || {
            fs::read_to_string(Path::new(KEY_FILE)).ok()
        })
    }

    /// `lookup` reads a variable; `key_file` returns the contents of the
    /// fallback key file, if any.
    pub fn from_lookup(
        demo: bool,
        lookup: impl Fn(&str) -> Option<String>,
        key_file: impl Fn() -> Option<String>,
    ) -> Result<Self, String> {
        let non_empty = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = if demo {
            None
        } else {
            let url = non_empty("SUPABASE_URL").ok_or_else(|| "Missing SUPABASE_URL".to_string())?;
            // Prefer env var; fallback to supabase.key in working directory
            let api_key = match non_empty("SUPABASE_KEY") {
                Some(v) => v,
                None => match key_file() {
                    Some(s) if !s.trim().is_empty() => s.trim().to_string(),
                    _ => {
                        return Err(format!(
                            "Missing project key: set SUPABASE_KEY or provide {KEY_FILE} in working directory"
                        ));
                    }
                },
            };
            Some(Backend { url, api_key })
        };

        let parse_u64 = |k: &str, default: u64| -> Result<u64, String> {
            match non_empty(k) {
                Some(v) => v.parse::<u64>().map_err(|_| format!("{k} must be a non-negative integer")),
                None => Ok(default),
            }
        };

        let poll_secs = parse_u64("POLL_INTERVAL_SECS", DEFAULT_POLL_SECS)?;
        if poll_secs == 0 {
            return Err("POLL_INTERVAL_SECS must be at least 1".to_string());
        }
        let readings_limit = parse_u64("READINGS_LIMIT", DEFAULT_READINGS_LIMIT as u64)? as usize;
        if readings_limit == 0 {
            return Err("READINGS_LIMIT must be at least 1".to_string());
        }

        let alert_profile = match non_empty("ALERT_PROFILE") {
            Some(name) => AlertProfile::by_name(&name).ok_or_else(|| {
                format!(
                    "ALERT_PROFILE must be {} or {}, got {}",
                    AlertProfile::DUAL_HUMIDITY,
                    AlertProfile::SINGLE_HUMIDITY,
                    name
                )
            })?,
            None => AlertProfile::dual_humidity(),
        };

        let chart_offset = match non_empty("CHART_UTC_OFFSET") {
            Some(s) => parse_utc_offset(&s).ok_or_else(|| "CHART_UTC_OFFSET must look like +02:00".to_string())?,
            None => FixedOffset::east_opt(0).ok_or_else(|| "invalid UTC offset".to_string())?,
        };

        Ok(Config {
            backend,
            poll_interval: Duration::from_secs(poll_secs),
            readings_limit,
            alert_profile,
            chart_offset,
            connect_retry: Duration::from_millis(parse_u64("CONNECT_RETRY_MS", DEFAULT_CONNECT_RETRY_MS)?),
            request_timeout: Duration::from_secs(parse_u64("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?),
            threshold_refresh_cycles: parse_u64("THRESHOLD_REFRESH_CYCLES", 0)?,
        })
    }
}

/// `+HH:MM`, `-HH:MM`, `+HH`, or `Z`.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    if s == "Z" || s == "z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => (rest, "0"),
    };
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if !(0..=14).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}
