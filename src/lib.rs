//! Rota Switch - proxy-rotating HTTP transport
//!
//! Sends HTTP requests through a pool of upstream proxies, switching proxies
//! on a jittered schedule and whenever a proxy fails.
//!
//! ## Features
//!
//! - Array (pool) and single-proxy rotation policies
//! - Failure classification: timeout extension, proxy switch, rate limiting
//! - Jittered proxy switching and request throttling
//! - Per-request retry budget
//! - HTTP CONNECT and SOCKS5 upstream proxies

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;

pub use config::{Config, TransportConfig};
pub use error::{Result, RotaError, TransportError};
pub use proxy::{HyperClient, ProxyRotator, RequestOptions, RotatingTransport};
