use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;

use crate::collector::CollectorConfig;
use crate::probe::duration::parse_go_duration;
use crate::probe::ProbeEndpoint;

/// Command-line flags, each also readable from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "azmon-bridge", version, about = "Prometheus exporter for Azure Monitor metrics")]
pub struct Opts {
    /// Address the HTTP server listens on.
    #[arg(long = "server.bind", env = "SERVER_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Subscriptions collected in parallel per scrape.
    #[arg(
        long = "concurrency.subscription",
        env = "CONCURRENCY_SUBSCRIPTION",
        default_value_t = 5,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub subscription_concurrency: u16,

    /// Resource fetches in flight per subscription.
    #[arg(
        long = "concurrency.subscription.resource",
        env = "CONCURRENCY_SUBSCRIPTION_RESOURCE",
        default_value_t = 10,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub resource_concurrency: u16,

    /// Scrape budget of the list endpoint when Prometheus sends none.
    #[arg(long = "timeout.list", env = "TIMEOUT_LIST", default_value = "120s", value_parser = parse_timeout)]
    pub list_timeout: Duration,

    /// Scrape budget of the resource endpoint when Prometheus sends none.
    #[arg(long = "timeout.resource", env = "TIMEOUT_RESOURCE", default_value = "10s", value_parser = parse_timeout)]
    pub resource_timeout: Duration,

    #[arg(long = "cache.backend", env = "CACHE_BACKEND", value_enum, default_value_t = CacheBackend::Memory)]
    pub cache_backend: CacheBackend,

    /// Only used with `--cache.backend=redis`.
    #[arg(long = "redis.url", env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/")]
    pub redis_url: String,

    #[arg(
        long = "azure.management-endpoint",
        env = "AZURE_MANAGEMENT_ENDPOINT",
        default_value = "https://management.azure.com/"
    )]
    pub management_endpoint: Url,

    #[arg(long = "azure.authority", env = "AZURE_AUTHORITY_HOST", default_value = "https://login.microsoftonline.com")]
    pub authority: String,

    /// Emit logs as JSON lines.
    #[arg(long = "log.json", env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    Memory,
    Redis,
    None,
}

/// Default scrape budgets per endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTimeouts {
    pub list: Duration,
    pub resource: Duration,
}

impl ProbeTimeouts {
    pub fn for_endpoint(&self, endpoint: ProbeEndpoint) -> Duration {
        match endpoint {
            ProbeEndpoint::List => self.list,
            ProbeEndpoint::Resource => self.resource,
        }
    }
}

impl Opts {
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig::new(
            usize::from(self.subscription_concurrency),
            usize::from(self.resource_concurrency),
        )
    }

    pub fn timeouts(&self) -> ProbeTimeouts {
        ProbeTimeouts {
            list: self.list_timeout,
            resource: self.resource_timeout,
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, String> {
    match parse_go_duration(raw) {
        Ok(d) if d.is_zero() => Err("timeout must be greater than zero".to_string()),
        Ok(d) => Ok(d),
        Err(e) => Err(e.to_string()),
    }
}
