//! Proxy rotation policies
//!
//! A rotator owns the "which proxy are we on" state: the pool, the active
//! endpoint and the set of endpoints that must never be used again. The
//! transport only talks to it through [`ProxyRotator`].

mod array;
mod pool;
mod single;

pub use array::ArrayRotator;
pub use pool::{ProxyKey, ProxyPool};
pub use single::SingleRotator;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Result, RotaError, TransportError};
use crate::models::ProxyEndpoint;

/// Failures tolerated per endpoint before the array policy gives up on it
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// How long the single-endpoint policy waits instead of switching
pub const DEFAULT_SINGLE_WAIT: Duration = Duration::from_secs(60);

/// Rotation policy types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    Array,
    Single,
}

impl RotationStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "array" | "pool" | "round_robin" | "round-robin" => Some(Self::Array),
            "single" => Some(Self::Single),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Single => "single",
        }
    }
}

/// Proxy selection and invalidation contract
///
/// Implementations are driven by a single transport; every mutating call takes
/// `&mut self`, so a rotator is never shared between concurrent requests.
#[async_trait]
pub trait ProxyRotator: Send {
    /// Policy name used in diagnostics
    fn name(&self) -> &'static str;

    /// The endpoint requests are currently routed through
    fn current_endpoint(&self) -> &ProxyEndpoint;

    /// `[scheme://][user:pass@]host:port`, or `host:port` when `address_only`
    fn current_address(&self, address_only: bool) -> String {
        self.current_endpoint().url(address_only)
    }

    fn current_key(&self) -> ProxyKey;

    fn is_invalid(&self, key: ProxyKey) -> bool;

    /// Move to the next usable endpoint
    async fn rotate(&mut self) -> Result<()>;

    /// Mark the current endpoint as permanently unusable
    fn invalidate(&mut self);

    /// Called when a request failed in a way attributable to the proxy
    async fn record_failure(&mut self, _cause: Option<&TransportError>) -> Result<()> {
        Ok(())
    }

    fn record_success(&mut self) {}

    /// Called on an unhandled 429 response
    async fn record_rate_limited(&mut self) -> Result<()> {
        self.invalidate();
        self.rotate().await
    }
}

/// Construction options shared by the built-in policies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatorOptions {
    /// Failures before the array policy invalidates an endpoint
    pub max_failures: u32,
    /// Pause used by the single-endpoint policy in place of switching
    pub single_wait: Duration,
    /// Pool-wide credentials applied to endpoints that carry none
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for RotatorOptions {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            single_wait: DEFAULT_SINGLE_WAIT,
            username: None,
            password: None,
        }
    }
}

/// Create a rotator for the given policy
pub fn create_rotator(
    strategy: RotationStrategy,
    endpoints: Vec<ProxyEndpoint>,
    options: &RotatorOptions,
) -> Result<Box<dyn ProxyRotator>> {
    let endpoints: Vec<ProxyEndpoint> = endpoints
        .into_iter()
        .map(|endpoint| apply_pool_credentials(endpoint, options))
        .collect();

    match strategy {
        RotationStrategy::Array => Ok(Box::new(
            ArrayRotator::new(endpoints)?.with_max_failures(options.max_failures)?,
        )),
        RotationStrategy::Single => {
            let mut endpoints = endpoints.into_iter();
            match (endpoints.next(), endpoints.next()) {
                (Some(endpoint), None) => Ok(Box::new(
                    SingleRotator::new(endpoint).with_wait(options.single_wait),
                )),
                (None, _) => Err(RotaError::InvalidConfig(
                    "single rotator requires a proxy address".into(),
                )),
                (Some(_), Some(_)) => Err(RotaError::InvalidConfig(
                    "single rotator accepts exactly one proxy address".into(),
                )),
            }
        }
    }
}

fn apply_pool_credentials(mut endpoint: ProxyEndpoint, options: &RotatorOptions) -> ProxyEndpoint {
    if endpoint.username.is_none() && endpoint.password.is_none() {
        endpoint.username = options.username.clone();
        endpoint.password = options.password.clone();
    }
    endpoint
}
