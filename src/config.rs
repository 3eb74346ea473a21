use std::path::PathBuf;

use chrono_tz::Tz;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Sao_Paulo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

/// Server settings, read once at startup from `CLINIC_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Bearer token required on `/api/v1`. `None` disables the check.
    pub api_token: Option<String>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    /// Zone given to professionals registered without one.
    pub default_timezone: Tz,
    pub environment: Environment,
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            api_token: None,
            metrics_port: None,
            compact_threshold: 1000,
            default_timezone: DEFAULT_TIMEZONE,
            environment: Environment::Production,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers fall back to defaults;
    /// an unknown timezone is an error.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let default_timezone = match get("CLINIC_DEFAULT_TIMEZONE") {
            Some(name) => name
                .parse()
                .map_err(|_| ConfigError(format!("unknown CLINIC_DEFAULT_TIMEZONE: {name}")))?,
            None => defaults.default_timezone,
        };
        let environment = match get("CLINIC_ENV").as_deref() {
            Some("development") | Some("dev") => Environment::Development,
            _ => Environment::Production,
        };

        Ok(Self {
            port: get("CLINIC_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            bind: get("CLINIC_BIND").unwrap_or(defaults.bind),
            data_dir: get("CLINIC_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            api_token: get("CLINIC_API_TOKEN").filter(|t| !t.is_empty()),
            metrics_port: get("CLINIC_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: get("CLINIC_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            default_timezone,
            environment,
        })
    }

    /// Whether persistence error details may reach API clients.
    pub fn expose_internal_errors(&self) -> bool {
        self.environment == Environment::Development
    }
}
