use crate::error::{Result, RotaError};
use crate::models::ProxyEndpoint;
use crate::proxy::rotation::{
    create_rotator, ProxyRotator, RotationStrategy, RotatorOptions, DEFAULT_MAX_FAILURES,
    DEFAULT_SINGLE_WAIT,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Rotating transport settings
    pub transport: TransportConfig,
    /// Proxy pool, absent when requests go out directly
    pub rotator: Option<RotatorConfig>,
    /// Logging configuration
    pub log: LogConfig,
}

/// Settings of a [`RotatingTransport`](crate::proxy::RotatingTransport)
///
/// Intervals count requests, durations and timeouts are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct TransportConfig {
    /// Bounds for the scheduled proxy switch; unset means switch on failure only
    pub switch_interval_min: Option<u64>,
    pub switch_interval_max: Option<u64>,
    /// Bounds for the number of requests between two throttle pauses
    pub throttle_interval_min: u64,
    pub throttle_interval_max: u64,
    /// Bounds for the length of a throttle pause; zero disables the pause
    pub throttle_duration_min: u64,
    pub throttle_duration_max: u64,
    /// Default connect timeout per attempt
    pub connect_timeout: u64,
    /// Fixed pause after every successful request
    pub post_request_pause: u64,
    /// Proxy-attributable retries allowed per request, unlimited when unset
    pub max_retries_per_request: Option<u32>,
    /// Sent as the `Cookie` header on every attempt when non-empty
    pub cookie: String,
    /// Overall request timeout of the default client
    pub request_timeout: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            switch_interval_min: Some(400),
            switch_interval_max: Some(800),
            throttle_interval_min: 2000,
            throttle_interval_max: 5000,
            throttle_duration_min: 120,
            throttle_duration_max: 300,
            connect_timeout: 1,
            post_request_pause: 1,
            max_retries_per_request: None,
            cookie: String::new(),
            request_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Build from a configuration mapping, rejecting unknown keys
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match (self.switch_interval_min, self.switch_interval_max) {
            (Some(min), Some(max)) => check_range("switch-interval", min, max)?,
            (None, None) => {}
            _ => {
                return Err(RotaError::InvalidConfig(
                    "switch-interval-min and switch-interval-max must be set together".into(),
                ))
            }
        }
        check_range(
            "throttle-interval",
            self.throttle_interval_min,
            self.throttle_interval_max,
        )?;
        check_range(
            "throttle-duration",
            self.throttle_duration_min,
            self.throttle_duration_max,
        )?;
        Ok(())
    }

    pub fn switch_interval(&self) -> Option<(u64, u64)> {
        match (self.switch_interval_min, self.switch_interval_max) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn post_request_pause(&self) -> Duration {
        Duration::from_secs(self.post_request_pause)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout.map(Duration::from_secs)
    }
}

fn check_range(name: &str, min: u64, max: u64) -> Result<()> {
    if min > max {
        return Err(RotaError::InvalidConfig(format!(
            "{}-min ({}) must not exceed {}-max ({})",
            name, min, name, max
        )));
    }
    Ok(())
}

/// Proxy pool settings
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Rotation policy (array, single)
    pub strategy: RotationStrategy,
    pub proxies: Vec<ProxyEndpoint>,
    pub options: RotatorOptions,
}

impl RotatorConfig {
    pub fn build(&self) -> Result<Box<dyn ProxyRotator>> {
        create_rotator(self.strategy, self.proxies.clone(), &self.options)
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = TransportConfig::default();

        let (switch_interval_min, switch_interval_max) = parse_switch_interval(&defaults)?;

        let transport = TransportConfig {
            switch_interval_min,
            switch_interval_max,
            throttle_interval_min: parse_env(
                "ROTA_THROTTLE_INTERVAL_MIN",
                defaults.throttle_interval_min,
            )?,
            throttle_interval_max: parse_env(
                "ROTA_THROTTLE_INTERVAL_MAX",
                defaults.throttle_interval_max,
            )?,
            throttle_duration_min: parse_env(
                "ROTA_THROTTLE_DURATION_MIN",
                defaults.throttle_duration_min,
            )?,
            throttle_duration_max: parse_env(
                "ROTA_THROTTLE_DURATION_MAX",
                defaults.throttle_duration_max,
            )?,
            connect_timeout: parse_env("ROTA_CONNECT_TIMEOUT", defaults.connect_timeout)?,
            post_request_pause: parse_env("ROTA_POST_REQUEST_PAUSE", defaults.post_request_pause)?,
            max_retries_per_request: parse_optional_env("ROTA_MAX_RETRIES")?,
            cookie: get_env_or("ROTA_COOKIE", ""),
            request_timeout: parse_optional_env("ROTA_REQUEST_TIMEOUT")?,
        };
        transport.validate()?;

        Ok(Config {
            transport,
            rotator: parse_rotator()?,
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }
}

fn parse_rotator() -> Result<Option<RotatorConfig>> {
    let proxies = get_env_or("ROTA_PROXIES", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ProxyEndpoint::parse)
        .collect::<Result<Vec<_>>>()?;
    if proxies.is_empty() {
        return Ok(None);
    }

    let strategy_name = get_env_or("ROTA_ROTATOR", "array");
    let strategy = RotationStrategy::from_str(&strategy_name).ok_or_else(|| {
        RotaError::InvalidConfig(format!("ROTA_ROTATOR has unknown value: {}", strategy_name))
    })?;

    let non_empty = |key: &str| Some(get_env_or(key, "")).filter(|v| !v.is_empty());

    Ok(Some(RotatorConfig {
        strategy,
        proxies,
        options: RotatorOptions {
            max_failures: parse_env("ROTA_MAX_FAILURES", DEFAULT_MAX_FAILURES)?,
            single_wait: Duration::from_secs(parse_env(
                "ROTA_SINGLE_WAIT",
                DEFAULT_SINGLE_WAIT.as_secs(),
            )?),
            username: non_empty("ROTA_PROXY_USERNAME"),
            password: non_empty("ROTA_PROXY_PASSWORD"),
        },
    }))
}

/// Switch bounds from the environment; `none` or `off` on either bound
/// disables scheduled switching
fn parse_switch_interval(defaults: &TransportConfig) -> Result<(Option<u64>, Option<u64>)> {
    const KEYS: [&str; 2] = ["ROTA_SWITCH_INTERVAL_MIN", "ROTA_SWITCH_INTERVAL_MAX"];

    let disabled = KEYS.iter().any(|key| {
        matches!(
            get_env_or(key, "").trim().to_lowercase().as_str(),
            "none" | "off"
        )
    });
    if disabled {
        return Ok((None, None));
    }

    Ok((
        parse_optional_env(KEYS[0])?.or(defaults.switch_interval_min),
        parse_optional_env(KEYS[1])?.or(defaults.switch_interval_max),
    ))
}

/// Parse a numeric environment variable, falling back to `default` when unset
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    Ok(parse_optional_env(key)?.unwrap_or(default))
}

fn parse_optional_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    let raw = get_env_or(key, "");
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| RotaError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
