//! Pool-based rotation with per-endpoint failure counting

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::warn;

use super::{ProxyKey, ProxyPool, ProxyRotator, DEFAULT_MAX_FAILURES};
use crate::error::{Result, RotaError, TransportError};
use crate::models::ProxyEndpoint;

/// Cycles through a pool in order, moving on after every failure
///
/// A failing endpoint is not dropped straight away: it is retried once per
/// cycle until it has failed `max_failures` times in total, which keeps a
/// briefly unavailable proxy in the rotation.
pub struct ArrayRotator {
    pool: ProxyPool,
    max_failures: u32,
    failure_counts: HashMap<ProxyKey, u32>,
}

impl ArrayRotator {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Result<Self> {
        Ok(Self::from_pool(ProxyPool::new(endpoints)?))
    }

    pub fn from_pool(pool: ProxyPool) -> Self {
        Self {
            pool,
            max_failures: DEFAULT_MAX_FAILURES,
            failure_counts: HashMap::new(),
        }
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Result<Self> {
        if max_failures == 0 {
            return Err(RotaError::InvalidConfig(
                "max failures per proxy must be at least 1".into(),
            ));
        }
        self.max_failures = max_failures;
        Ok(self)
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// Total failures recorded against an endpoint
    pub fn failure_count(&self, key: ProxyKey) -> u32 {
        self.failure_counts.get(&key).copied().unwrap_or(0)
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }
}

#[async_trait]
impl ProxyRotator for ArrayRotator {
    fn name(&self) -> &'static str {
        "array"
    }

    fn current_endpoint(&self) -> &ProxyEndpoint {
        self.pool.current()
    }

    fn current_key(&self) -> ProxyKey {
        self.pool.current_key()
    }

    fn is_invalid(&self, key: ProxyKey) -> bool {
        self.pool.is_invalid(key)
    }

    async fn rotate(&mut self) -> Result<()> {
        self.pool.advance()
    }

    fn invalidate(&mut self) {
        self.pool.invalidate();
    }

    async fn record_failure(&mut self, _cause: Option<&TransportError>) -> Result<()> {
        let key = self.pool.current_key();
        let count = self.failure_counts.entry(key).or_insert(0);
        *count += 1;

        if *count >= self.max_failures {
            warn!(
                proxy = %self.pool.current().url(true),
                failures = *count,
                "Proxy reached failure limit, dropping it from rotation"
            );
            self.pool.invalidate();
        }

        self.pool.advance()
    }
}
