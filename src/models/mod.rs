pub mod proxy;

pub use proxy::{ProxyEndpoint, ProxyProtocol};
