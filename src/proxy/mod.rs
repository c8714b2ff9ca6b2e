//! Proxy rotation and the rotating transport
//!
//! This module provides:
//! - Proxy rotation policies (array, single)
//! - Failure classification for the retry loop
//! - Notification hooks
//! - A hyper-based client that tunnels through HTTP and SOCKS5 proxies

pub mod classify;
pub mod client;
pub mod egress;
pub mod hooks;
pub mod rotation;
pub mod switcher;
pub mod transport;

pub use classify::{ErrorClassifier, RetryAction};
pub use client::HyperClient;
pub use hooks::{AfterResponseEvent, HookId, HookKind, Hooks, RateLimitedEvent};
pub use rotation::{create_rotator, ArrayRotator, ProxyRotator, RotationStrategy, SingleRotator};
pub use switcher::{RotatingTransport, TransportStats};
pub use transport::{HttpClient, RequestOptions};
