//! Notification hooks raised by the rotating transport
//!
//! Observers run in registration order. Every `after-response` observer sees
//! every response; `rate-limited` dispatch stops at the first observer that
//! marks the event handled.

use bytes::Bytes;
use http::{Method, Response};

use super::rotation::ProxyRotator;
use super::switcher::TransportStats;

/// Handle returned on registration, used to remove a single observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    AfterResponse,
    RateLimited,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::AfterResponse => "after-response",
            HookKind::RateLimited => "rate-limited",
        }
    }
}

/// A response the transport is about to hand back to the caller
pub struct AfterResponseEvent<'a> {
    pub method: &'a Method,
    pub url: &'a str,
    pub response: &'a Response<Bytes>,
}

/// A 429 answer seen during a request
///
/// Marking the event handled keeps the rotator untouched; the transport then
/// retries through the same proxy.
pub struct RateLimitedEvent<'a> {
    rotator: Option<&'a mut (dyn ProxyRotator + 'static)>,
    stats: TransportStats,
    handled: bool,
}

impl<'a> RateLimitedEvent<'a> {
    pub fn new(rotator: Option<&'a mut (dyn ProxyRotator + 'static)>, stats: TransportStats) -> Self {
        Self {
            rotator,
            stats,
            handled: false,
        }
    }

    pub fn rotator(&self) -> Option<&(dyn ProxyRotator + 'static)> {
        self.rotator.as_deref()
    }

    pub fn rotator_mut(&mut self) -> Option<&mut (dyn ProxyRotator + 'static)> {
        self.rotator.as_deref_mut()
    }

    /// Counters of the transport at the time of the 429
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn set_handled(&mut self) {
        self.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }
}

type AfterResponseHook = Box<dyn FnMut(&AfterResponseEvent<'_>) + Send>;
type RateLimitedHook = Box<dyn FnMut(&mut RateLimitedEvent<'_>) + Send>;

/// Observer registry owned by a transport
#[derive(Default)]
pub struct Hooks {
    next_id: u64,
    after_response: Vec<(HookId, AfterResponseHook)>,
    rate_limited: Vec<(HookId, RateLimitedHook)>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_after_response<F>(&mut self, hook: F) -> HookId
    where
        F: FnMut(&AfterResponseEvent<'_>) + Send + 'static,
    {
        let id = self.next_id();
        self.after_response.push((id, Box::new(hook)));
        id
    }

    pub fn on_rate_limited<F>(&mut self, hook: F) -> HookId
    where
        F: FnMut(&mut RateLimitedEvent<'_>) + Send + 'static,
    {
        let id = self.next_id();
        self.rate_limited.push((id, Box::new(hook)));
        id
    }

    /// Remove one observer; returns false if it was not registered
    pub fn off(&mut self, id: HookId) -> bool {
        let before = self.len(HookKind::AfterResponse) + self.len(HookKind::RateLimited);
        self.after_response.retain(|(hook_id, _)| *hook_id != id);
        self.rate_limited.retain(|(hook_id, _)| *hook_id != id);
        before != self.len(HookKind::AfterResponse) + self.len(HookKind::RateLimited)
    }

    /// Remove every observer of a notification
    pub fn clear(&mut self, kind: HookKind) {
        match kind {
            HookKind::AfterResponse => self.after_response.clear(),
            HookKind::RateLimited => self.rate_limited.clear(),
        }
    }

    pub fn len(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::AfterResponse => self.after_response.len(),
            HookKind::RateLimited => self.rate_limited.len(),
        }
    }

    pub fn dispatch_after_response(&mut self, event: &AfterResponseEvent<'_>) {
        for (_, hook) in self.after_response.iter_mut() {
            hook(event);
        }
    }

    /// Returns whether an observer handled the event
    pub fn dispatch_rate_limited(&mut self, event: &mut RateLimitedEvent<'_>) -> bool {
        for (_, hook) in self.rate_limited.iter_mut() {
            hook(event);
            if event.is_handled() {
                break;
            }
        }
        event.is_handled()
    }

    fn next_id(&mut self) -> HookId {
        self.next_id += 1;
        HookId(self.next_id)
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("after_response", &self.after_response.len())
            .field("rate_limited", &self.rate_limited.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyEndpoint;
    use crate::proxy::rotation::ArrayRotator;
    use std::sync::{Arc, Mutex};

    fn response() -> Response<Bytes> {
        Response::new(Bytes::from_static(b"body"))
    }

    #[test]
    fn test_after_response_runs_every_observer_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::new();
        for n in 0..3 {
            let seen = seen.clone();
            hooks.on_after_response(move |event| {
                seen.lock().unwrap().push((n, event.response.body().len()));
            });
        }

        let response = response();
        hooks.dispatch_after_response(&AfterResponseEvent {
            method: &Method::GET,
            url: "http://example.com/",
            response: &response,
        });

        assert_eq!(*seen.lock().unwrap(), vec![(0, 4), (1, 4), (2, 4)]);
    }

    #[test]
    fn test_rate_limited_stops_at_first_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::new();

        let c = calls.clone();
        hooks.on_rate_limited(move |_| c.lock().unwrap().push("first"));
        let c = calls.clone();
        hooks.on_rate_limited(move |event| {
            c.lock().unwrap().push("second");
            event.set_handled();
        });
        let c = calls.clone();
        hooks.on_rate_limited(move |_| c.lock().unwrap().push("third"));

        let mut event = RateLimitedEvent::new(None, TransportStats::default());
        assert!(hooks.dispatch_rate_limited(&mut event));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_rate_limited_event_exposes_rotator() {
        let mut rotator =
            ArrayRotator::new(vec![ProxyEndpoint::new("a:1"), ProxyEndpoint::new("b:1")]).unwrap();
        let mut hooks = Hooks::new();
        hooks.on_rate_limited(|event| {
            if let Some(rotator) = event.rotator_mut() {
                rotator.invalidate();
            }
            event.set_handled();
        });

        let target: &mut (dyn ProxyRotator + 'static) = &mut rotator;
        let mut event = RateLimitedEvent::new(Some(target), TransportStats::default());
        assert!(hooks.dispatch_rate_limited(&mut event));
        assert!(rotator.is_invalid(rotator.current_key()));
    }

    #[test]
    fn test_off_and_clear() {
        let mut hooks = Hooks::new();
        let first = hooks.on_after_response(|_| {});
        hooks.on_after_response(|_| {});
        let limited = hooks.on_rate_limited(|_| {});

        assert!(hooks.off(first));
        assert!(!hooks.off(first));
        assert_eq!(hooks.len(HookKind::AfterResponse), 1);

        hooks.clear(HookKind::AfterResponse);
        assert_eq!(hooks.len(HookKind::AfterResponse), 0);
        assert_eq!(hooks.len(HookKind::RateLimited), 1);

        assert!(hooks.off(limited));
        assert_eq!(hooks.len(HookKind::RateLimited), 0);
    }

    #[test]
    fn test_unhandled_without_observers() {
        let mut hooks = Hooks::new();
        let mut event = RateLimitedEvent::new(None, TransportStats::default());
        assert!(!hooks.dispatch_rate_limited(&mut event));
    }
}
