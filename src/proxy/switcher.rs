//! Rotating transport: the retry loop around an [`HttpClient`]
//!
//! Every request first advances the jittered schedules (proxy switch and
//! throttle pause), then runs attempts until one succeeds or the classifier
//! decides to give up.

use bytes::Bytes;
use http::header::{HeaderValue, COOKIE};
use http::{Method, Response};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::classify::{AttemptState, ErrorClassifier, RetryAction, TIMEOUT_EXTENSION};
use super::hooks::{AfterResponseEvent, Hooks, RateLimitedEvent};
use super::rotation::ProxyRotator;
use super::transport::{HttpClient, RequestOptions};
use crate::config::TransportConfig;
use crate::error::{Result, RotaError};

/// Snapshot of the transport's request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub requests_since_switch: u64,
    /// Unset when scheduled switching is disabled
    pub switch_threshold: Option<u64>,
    pub requests_since_throttle: u64,
    pub throttle_threshold: u64,
    pub requests_since_rate_limit: u64,
}

/// Sends requests through a rotating set of proxies
///
/// One request is in flight at a time; use one transport per worker.
pub struct RotatingTransport<C> {
    client: C,
    rotator: Option<Box<dyn ProxyRotator>>,
    config: TransportConfig,
    hooks: Hooks,
    rng: Box<dyn RngCore + Send>,
    cookie: Option<HeaderValue>,
    requests_since_switch: u64,
    switch_threshold: Option<u64>,
    requests_since_throttle: u64,
    throttle_threshold: u64,
    requests_since_rate_limit: u64,
}

impl<C: HttpClient> RotatingTransport<C> {
    pub fn new(client: C, config: TransportConfig) -> Result<Self> {
        config.validate()?;

        let cookie = if config.cookie.is_empty() {
            None
        } else {
            Some(HeaderValue::from_str(&config.cookie).map_err(|_| {
                RotaError::InvalidConfig("cookie is not a valid header value".into())
            })?)
        };

        let mut transport = Self {
            client,
            rotator: None,
            config,
            hooks: Hooks::new(),
            rng: Box::new(StdRng::from_entropy()),
            cookie,
            requests_since_switch: 0,
            switch_threshold: None,
            requests_since_throttle: 0,
            throttle_threshold: 0,
            requests_since_rate_limit: 0,
        };
        transport.draw_thresholds();
        Ok(transport)
    }

    /// Replace the random source and redraw both thresholds from it
    pub fn with_rng<R: RngCore + Send + 'static>(mut self, rng: R) -> Self {
        self.rng = Box::new(rng);
        self.draw_thresholds();
        self
    }

    pub fn with_rotator(mut self, rotator: Box<dyn ProxyRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Swap the rotator, returning the previous one
    pub fn set_rotator(
        &mut self,
        rotator: Option<Box<dyn ProxyRotator>>,
    ) -> Option<Box<dyn ProxyRotator>> {
        std::mem::replace(&mut self.rotator, rotator)
    }

    pub fn rotator(&self) -> Option<&(dyn ProxyRotator + 'static)> {
        self.rotator.as_deref()
    }

    pub fn rotator_mut(&mut self) -> Option<&mut (dyn ProxyRotator + 'static)> {
        self.rotator.as_deref_mut()
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            requests_since_switch: self.requests_since_switch,
            switch_threshold: self.switch_threshold,
            requests_since_throttle: self.requests_since_throttle,
            throttle_threshold: self.throttle_threshold,
            requests_since_rate_limit: self.requests_since_rate_limit,
        }
    }

    pub async fn get(&mut self, url: &str, options: RequestOptions) -> Result<Response<Bytes>> {
        self.request(Method::GET, url, options).await
    }

    pub async fn post(&mut self, url: &str, options: RequestOptions) -> Result<Response<Bytes>> {
        self.request(Method::POST, url, options).await
    }

    /// Send a request, switching proxies on proxy-attributable failures
    ///
    /// Fails with the last transport failure once the classifier gives up, or
    /// with the rotator's error when no usable proxy is left.
    pub async fn request(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response<Bytes>> {
        self.requests_since_switch += 1;
        self.requests_since_throttle += 1;
        self.requests_since_rate_limit += 1;

        self.maybe_switch().await?;
        self.maybe_throttle().await;

        let classifier =
            ErrorClassifier::new(self.rotator.is_some(), self.config.max_retries_per_request);
        let mut attempt = AttemptState::default();
        let mut extended_timeout: Option<Duration> = None;

        let response = loop {
            let attempt_options = self.attempt_options(&options, extended_timeout);

            let failure = match self.client.execute(&method, url, &attempt_options).await {
                Ok(response) => {
                    self.hooks.dispatch_after_response(&AfterResponseEvent {
                        method: &method,
                        url,
                        response: &response,
                    });
                    break response;
                }
                Err(failure) => failure,
            };

            let action = classifier.classify(&failure, &attempt);
            debug!(
                url = %url,
                action = action.as_str(),
                retries = attempt.retries,
                error = %failure,
                "Request attempt failed"
            );

            match action {
                RetryAction::ExtendTimeoutAndRetry => {
                    let base = attempt_options
                        .connect_timeout
                        .unwrap_or_else(|| self.config.connect_timeout());
                    extended_timeout = Some(base.saturating_add(TIMEOUT_EXTENSION));
                    attempt.timeout_extended = true;
                }
                RetryAction::MarkFailedAndRetryNext => {
                    attempt.retries += 1;
                    attempt.timeout_extended = false;
                    extended_timeout = None;

                    let rotator = self.rotator.as_mut().ok_or_else(missing_rotator)?;
                    warn!(
                        proxy = %rotator.current_address(true),
                        error = %failure,
                        "Proxy failed"
                    );
                    rotator.record_failure(Some(&failure)).await?;
                }
                RetryAction::RateLimitedAndRetryNext => {
                    attempt.retries += 1;
                    attempt.timeout_extended = false;
                    extended_timeout = None;

                    self.handle_rate_limited().await?;
                }
                RetryAction::Abort => return Err(failure.into()),
            }
        };

        if let Some(rotator) = self.rotator.as_mut() {
            rotator.record_success();
        }

        let pause = self.config.post_request_pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        Ok(response)
    }

    fn attempt_options(
        &self,
        options: &RequestOptions,
        extended_timeout: Option<Duration>,
    ) -> RequestOptions {
        let mut attempt_options = options.clone();
        attempt_options.connect_timeout = extended_timeout
            .or(options.connect_timeout)
            .or(Some(self.config.connect_timeout()));

        if let Some(cookie) = &self.cookie {
            attempt_options.headers.insert(COOKIE, cookie.clone());
        }
        if let Some(rotator) = &self.rotator {
            attempt_options.proxy = Some(rotator.current_address(false));
        }

        attempt_options
    }

    async fn maybe_switch(&mut self) -> Result<()> {
        let (Some(rotator), Some(threshold)) = (self.rotator.as_mut(), self.switch_threshold)
        else {
            return Ok(());
        };
        if self.requests_since_switch < threshold {
            return Ok(());
        }

        debug!(
            requests = self.requests_since_switch,
            "Scheduled proxy switch"
        );
        rotator.rotate().await?;

        self.requests_since_switch = 0;
        self.switch_threshold = self.draw_switch_threshold();
        Ok(())
    }

    async fn maybe_throttle(&mut self) {
        if self.requests_since_throttle < self.throttle_threshold {
            return;
        }

        let secs = self.rng.gen_range(
            self.config.throttle_duration_min..=self.config.throttle_duration_max,
        );
        info!(
            requests = self.requests_since_throttle,
            pause_secs = secs,
            "Throttling requests"
        );
        tokio::time::sleep(Duration::from_secs(secs)).await;
        info!("Resuming requests");

        self.requests_since_throttle = 0;
        self.throttle_threshold = self.draw_throttle_threshold();
    }

    async fn handle_rate_limited(&mut self) -> Result<()> {
        let stats = self.stats();
        let rotator = self.rotator.as_deref_mut().ok_or_else(missing_rotator)?;

        let mut event = RateLimitedEvent::new(Some(rotator), stats);
        let handled = self.hooks.dispatch_rate_limited(&mut event);

        warn!(
            requests_since_last = self.requests_since_rate_limit,
            handled,
            "429 Too Many Requests"
        );
        self.requests_since_rate_limit = 0;

        if !handled {
            if let Some(rotator) = self.rotator.as_mut() {
                rotator.record_rate_limited().await?;
            }
        }
        Ok(())
    }

    fn draw_thresholds(&mut self) {
        self.switch_threshold = self.draw_switch_threshold();
        self.throttle_threshold = self.draw_throttle_threshold();
    }

    fn draw_switch_threshold(&mut self) -> Option<u64> {
        let (min, max) = self.config.switch_interval()?;
        Some(self.rng.gen_range(min..=max))
    }

    fn draw_throttle_threshold(&mut self) -> u64 {
        self.rng
            .gen_range(self.config.throttle_interval_min..=self.config.throttle_interval_max)
    }
}

fn missing_rotator() -> RotaError {
    RotaError::InvalidConfig("no proxy rotator configured".into())
}
