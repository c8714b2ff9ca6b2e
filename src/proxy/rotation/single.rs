//! Single-endpoint "rotation"

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::{ProxyKey, ProxyRotator, DEFAULT_SINGLE_WAIT};
use crate::error::{Result, RotaError, TransportError};
use crate::models::ProxyEndpoint;

const SINGLE_KEY: ProxyKey = ProxyKey(0);

/// Routes everything through one fixed proxy
///
/// There is nothing to switch to, so `rotate` waits for the proxy to recover
/// and every proxy-attributable failure is surfaced to the caller.
pub struct SingleRotator {
    endpoint: ProxyEndpoint,
    invalid: bool,
    wait: Duration,
}

impl SingleRotator {
    pub fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            invalid: false,
            wait: DEFAULT_SINGLE_WAIT,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

#[async_trait]
impl ProxyRotator for SingleRotator {
    fn name(&self) -> &'static str {
        "single"
    }

    fn current_endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    fn current_key(&self) -> ProxyKey {
        SINGLE_KEY
    }

    fn is_invalid(&self, key: ProxyKey) -> bool {
        key == SINGLE_KEY && self.invalid
    }

    async fn rotate(&mut self) -> Result<()> {
        info!(
            proxy = %self.endpoint.url(true),
            wait_secs = self.wait.as_secs_f64(),
            "Can't switch proxy, waiting for it to recover"
        );
        tokio::time::sleep(self.wait).await;
        info!("Continuing with the same proxy");
        Ok(())
    }

    fn invalidate(&mut self) {
        self.invalid = true;
    }

    async fn record_failure(&mut self, cause: Option<&TransportError>) -> Result<()> {
        Err(cause
            .cloned()
            .map(RotaError::Transport)
            .unwrap_or(RotaError::ProxyFailed))
    }

    async fn record_rate_limited(&mut self) -> Result<()> {
        Err(RotaError::RateLimited)
    }
}
