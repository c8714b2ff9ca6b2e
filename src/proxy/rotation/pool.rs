//! Ordered proxy pool with a cursor and an invalid set

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RotaError};
use crate::models::ProxyEndpoint;

/// Stable identifier of an endpoint inside a pool
///
/// Keys survive rotation and invalidation and need not be contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyKey(pub u64);

impl std::fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Round-robin pool state
///
/// Entries live in insertion order; `cursor` indexes into them. The pool is
/// never empty, so `cursor` always names a real endpoint.
#[derive(Debug, Clone)]
pub struct ProxyPool {
    entries: Vec<(ProxyKey, ProxyEndpoint)>,
    cursor: usize,
    invalid: HashSet<ProxyKey>,
}

impl ProxyPool {
    /// Build a pool keyed by position, starting at the first endpoint
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Result<Self> {
        Self::with_keys(
            endpoints
                .into_iter()
                .enumerate()
                .map(|(i, endpoint)| (ProxyKey(i as u64), endpoint))
                .collect(),
        )
    }

    /// Build a pool with caller-chosen keys
    pub fn with_keys(entries: Vec<(ProxyKey, ProxyEndpoint)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(RotaError::InvalidConfig("proxy pool is empty".into()));
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for (key, _) in &entries {
            if !seen.insert(*key) {
                return Err(RotaError::InvalidConfig(format!(
                    "duplicate proxy key {} in pool",
                    key
                )));
            }
        }

        Ok(Self {
            entries,
            cursor: 0,
            invalid: HashSet::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> &ProxyEndpoint {
        &self.entries[self.cursor].1
    }

    pub fn current_key(&self) -> ProxyKey {
        self.entries[self.cursor].0
    }

    pub fn get(&self, key: ProxyKey) -> Option<&ProxyEndpoint> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, endpoint)| endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (ProxyKey, &ProxyEndpoint)> {
        self.entries.iter().map(|(key, endpoint)| (*key, endpoint))
    }

    pub fn is_invalid(&self, key: ProxyKey) -> bool {
        self.invalid.contains(&key)
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    /// Mark the current endpoint as unusable for the lifetime of the pool
    pub fn invalidate(&mut self) {
        let key = self.current_key();
        if self.invalid.insert(key) {
            debug!(proxy = %self.current().url(true), key = %key, "Proxy marked invalid");
        }
    }

    /// Step to the next endpoint that is not invalid, wrapping around
    ///
    /// At most `len()` candidates are examined. When none of them is usable the
    /// cursor is left where the scan ended and `ExhaustedPool` is returned.
    pub fn advance(&mut self) -> Result<()> {
        let size = self.entries.len();

        for _ in 0..size {
            self.cursor = (self.cursor + 1) % size;
            if !self.is_invalid(self.current_key()) {
                debug!(proxy = %self.current().url(true), "Switching proxy");
                return Ok(());
            }
        }

        Err(RotaError::ExhaustedPool { pool_size: size })
    }
}
