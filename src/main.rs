//! rota-fetch - fetch URLs through a rotating proxy pool
//!
//! Proxies and transport settings come from the environment (see `Config`).

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rota_switch::config::LogConfig;
use rota_switch::proxy::{HyperClient, RequestOptions, RotatingTransport};
use rota_switch::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log);

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        anyhow::bail!("usage: rota-fetch <url>...");
    }

    let mut client = HyperClient::new();
    if let Some(timeout) = config.transport.request_timeout() {
        client = client.with_request_timeout(timeout);
    }

    let mut transport = RotatingTransport::new(client, config.transport.clone())?;
    match &config.rotator {
        Some(rotator_config) => {
            let rotator = rotator_config.build()?;
            info!(
                rotator = rotator.name(),
                proxies = rotator_config.proxies.len(),
                "Using proxy rotation"
            );
            transport = transport.with_rotator(rotator);
        }
        None => info!("No proxies configured, connecting directly"),
    }

    for url in &urls {
        match transport.get(url, RequestOptions::new()).await {
            Ok(response) => {
                info!(
                    url = %url,
                    status = response.status().as_u16(),
                    bytes = response.body().len(),
                    proxy = transport.rotator().map(|r| r.current_address(true)).unwrap_or_default(),
                    "Fetched"
                );
            }
            Err(e) => {
                error!(url = %url, error = %e, "Request failed");
                return Err(e).with_context(|| format!("failed to fetch {}", url));
            }
        }
    }

    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_switch={},rota_fetch={}", log.level, log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "pretty" {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}
