pub mod models {
    pub mod sensor;
}

pub mod client;
pub mod config;
pub mod present;
pub mod store;
pub mod utils;
pub mod services {
    pub mod alerts;
    pub mod chart;
    pub mod commands;
    pub mod fake_data;
    pub mod latest;
    pub mod poll;
    pub mod series;
    pub mod thresholds;
}

use crate::client::SupabaseClient;
use crate::config::Config;
use crate::present::LogPresenter;
use crate::services::alerts::AlertEvaluator;
use crate::services::chart::ChartAggregator;
use crate::services::commands::parse_command_spec;
use crate::services::fake_data;
use crate::services::poll::{ChartRequest, Monitor};
use crate::store::{MemoryStore, TableStore};
use chrono::Utc;
use log::{error, info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Default, PartialEq)]
struct Cli {
    env_file: Option<PathBuf>,
    demo: bool,
    once: bool,
    chart: Option<String>,
    room: Option<String>,
    metric: Option<String>,
    commands: Vec<String>,
}

fn run(cli: &Cli) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env(cli.demo)?;
    info!(
        "Config loaded (backend={}, poll_interval={}s, readings_limit={}, alert_profile={}, chart_offset={}, threshold_refresh_cycles={})",
        cfg.backend.as_ref().map(|b| b.url.as_str()).unwrap_or("demo"),
        cfg.poll_interval.as_secs(),
        cfg.readings_limit,
        cfg.alert_profile.name,
        cfg.chart_offset,
        cfg.threshold_refresh_cycles
    );

    // Validate CLI requests before touching the backend
    let chart = match cli.chart.as_deref() {
        Some(window) => Some(ChartRequest::parse(window, cli.metric.as_deref(), cli.room.as_deref())?),
        None => None,
    };
    let commands = cli
        .commands
        .iter()
        .map(|c| parse_command_spec(c))
        .collect::<Result<Vec<_>, _>>()?;

    // 2) Build the store
    let demo_store;
    let remote_store;
    let store: &dyn TableStore = match cfg.backend.as_ref() {
        Some(backend) => {
            remote_store = SupabaseClient::new(&backend.url, &backend.api_key, cfg.request_timeout);
            &remote_store
        }
        None => {
            demo_store = MemoryStore::new();
            fake_data::seed(&demo_store, Utc::now());
            info!("Demo mode: using generated in-memory data");
            &demo_store
        }
    };

    // 3) Wire the monitor
    let presenter = LogPresenter;
    let mut monitor = Monitor::new(
        store,
        &presenter,
        AlertEvaluator::new(cfg.alert_profile.clone()),
        ChartAggregator::new(cfg.chart_offset),
        cfg.readings_limit,
    )
    .with_threshold_refresh(cfg.threshold_refresh_cycles);

    // 4) Wait for the backend
    let failed_probes = monitor
        .wait_until_available(cfg.connect_retry, None)
        .map_err(|e| format!("Backend unavailable: {}", e))?;
    if failed_probes > 0 {
        info!("Backend reachable after {} failed probe(s)", failed_probes);
    }

    // 5) Thresholds
    match monitor.refresh_thresholds() {
        Ok(n) => info!("Loaded {} threshold rule(s)", n),
        Err(e) => warn!("Continuing without thresholds: {}", e),
    }
    if monitor.thresholds().is_empty() {
        warn!("No threshold rules loaded; no alerts will be raised");
    }

    // 6) Commands
    for (sensor_id, target, state) in &commands {
        if let Err(e) = monitor.send_command(sensor_id, *target, *state, Utc::now()) {
            error!("Command failed: {}", e);
        }
    }

    // 7) Chart
    if let Some(request) = chart
        && let Err(e) = monitor.refresh_chart(request, Utc::now())
    {
        error!("Chart failed: {}", e);
    }

    // 8) Poll
    if cli.once {
        monitor.poll_once();
    } else {
        info!("Starting poll loop: interval={}s", cfg.poll_interval.as_secs());
        monitor.run_loop(cfg.poll_interval, None);
    }

    Ok(())
}

fn parse_cli(args: impl IntoIterator<Item = OsString>) -> Result<Cli, String> {
    let mut args = args.into_iter();
    let mut cli = Cli::default();

    while let Some(arg) = args.next() {
        let arg = arg.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())?;
        if arg == "--" {
            break;
        }
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg, None),
        };

        match flag.as_str() {
            "--demo" | "--once" if inline.is_some() => return Err(format!("`{}` takes no value", flag)),
            "--demo" => cli.demo = true,
            "--once" => cli.once = true,
            "--env-file" | "--chart" | "--room" | "--metric" | "--command" => {
                let value = match inline {
                    Some(v) => v,
                    None => args
                        .next()
                        .and_then(|v| v.into_string().ok())
                        .ok_or_else(|| format!("`{}` requires a value", flag))?,
                };
                if value.is_empty() {
                    return Err(format!("`{}` requires a value", flag));
                }
                let slot = match flag.as_str() {
                    "--env-file" => {
                        if cli.env_file.replace(PathBuf::from(&value)).is_some() {
                            return Err("`--env-file` provided more than once".to_string());
                        }
                        continue;
                    }
                    "--command" => {
                        cli.commands.push(value);
                        continue;
                    }
                    "--chart" => &mut cli.chart,
                    "--room" => &mut cli.room,
                    _ => &mut cli.metric,
                };
                if slot.replace(value).is_some() {
                    return Err(format!("`{}` provided more than once", flag));
                }
            }
            other => return Err(format!("unrecognised argument: {}", other)),
        }
    }

    if cli.chart.is_none() && (cli.room.is_some() || cli.metric.is_some()) {
        return Err("`--room` and `--metric` need `--chart`".to_string());
    }
    Ok(cli)
}

fn configure_env(cli: &Cli) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = cli.env_file.clone() {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    load_env_file(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
    }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in contents.lines().enumerate() {
        let Some((key, value)) =
            parse_env_assignment(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Process environment wins over the file.
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}

/// `KEY=value`, optionally prefixed with `export`. Blank lines and `#`
/// comments yield `None`.
fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => parse_quoted(&raw[1..], q)?,
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

/// Backslash escapes apply inside double quotes only.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let kind = if quote == '"' { "double" } else { "single" };
    let mut out = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| "unterminated escape sequence in double-quoted value".to_string())?;
                out.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => {
                let rest = chars.as_str().trim();
                if rest.is_empty() || rest.starts_with('#') {
                    return Ok(out);
                }
                return Err(format!("unexpected characters after closing {} quote", kind));
            }
            other => out.push(other),
        }
    }

    Err(format!("unterminated {}-quoted value", kind))
}

fn main() {
    let cli = match parse_cli(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(2);
        }
    };
    let loaded_env = match configure_env(&cli) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "ecs-monitor {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
