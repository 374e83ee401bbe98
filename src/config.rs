use crate::error::ConfigError;
use std::env;
use std::time::Duration;

/// Value shipped in the sample configuration that must be replaced before use
const PLACEHOLDER_ADDRESS: &str = "IP_ADDR";

/// Runtime configuration, read from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub grid_meter_url: String,
    pub load_meter_url: String,
    pub grid_control_url: String,
    pub battery_source_url: String,
    /// One "time unit" of both control loops
    pub cycle_period: Duration,
    pub grid_backoff: Duration,
    pub load_backoff: Duration,
    pub meter_timeout: Duration,
    pub ac_frequency_hz: f64,
    pub storm_override: bool,
}

impl Config {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let grid_meter_url = device_url(&lookup, "GRID_METER_ADDR")?;
        let load_meter_url = device_url(&lookup, "LOAD_METER_ADDR")?;
        let grid_control_url = device_url(&lookup, "GRID_CONTROL_ADDR")?;
        let battery_source_url = device_url(&lookup, "BATTERY_SOURCE_URL")?;

        let cycle_period =
            Duration::from_millis(parse_or(&lookup, "CYCLE_PERIOD_MS", 1000u64)?.max(1));
        let grid_backoff_cycles: u32 = parse_or(&lookup, "GRID_BACKOFF_CYCLES", 3)?;
        let load_backoff_cycles: u32 = parse_or(&lookup, "LOAD_BACKOFF_CYCLES", 5)?;
        let meter_timeout = Duration::from_millis(parse_or(&lookup, "METER_TIMEOUT_MS", 1000u64)?);
        let ac_frequency_hz = parse_or(&lookup, "AC_FREQUENCY_HZ", 60.0f64)?;
        let storm_override = parse_bool_safe(lookup("STORM_OVERRIDE"));

        Ok(Self {
            grid_meter_url,
            load_meter_url,
            grid_control_url,
            battery_source_url,
            cycle_period,
            grid_backoff: cycle_period * grid_backoff_cycles,
            load_backoff: cycle_period * load_backoff_cycles,
            meter_timeout,
            ac_frequency_hz,
            storm_override,
        })
    }
}

/// Turns `host`, `host:port` or a full URL into a base URL without a trailing slash
fn device_url<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name).unwrap_or_default();
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    if value.contains(PLACEHOLDER_ADDRESS) {
        return Err(ConfigError::Placeholder {
            name,
            value: value.to_string(),
        });
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "addresses cannot contain whitespace".to_string(),
        });
    }
    let url = if value.starts_with("http://") || value.starts_with("https://") {
        value.to_string()
    } else {
        format!("http://{value}")
    };
    Ok(url.trim_end_matches('/').to_string())
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
