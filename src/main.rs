use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod azure;
mod cache;
mod collector;
mod config;
mod handlers;
mod metrics;
mod middleware;
mod probe;
mod render;
mod results;
mod server;

use azure::auth::{Credentials, TokenProvider};
use cache::{MemoryCache, NoCache, ProbeCache, RedisCache, ResultCache};
use config::{CacheBackend, Opts, ProbeTimeouts};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Fan-out engine behind both probe endpoints.
    pub collector: collector::FanOutCollector,

    /// Scrape result cache; a miss when the request sets no `cache`.
    pub cache: ProbeCache,

    /// Exporter health counters served on `/metrics`.
    pub exporter: Arc<metrics::ExporterMetrics>,

    /// Recent-scrape feed served on `/api/stats`.
    pub stats: Arc<metrics::ScrapeStats>,

    /// Budgets used when Prometheus sends no timeout header.
    pub timeouts: ProbeTimeouts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_tracing(opts.log_json);

    // ── 1. Azure client ──────────────────────────────────────────
    let credentials = Credentials::from_env().context(
        "no Azure credentials: set AZURE_ACCESS_TOKEN, or AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET",
    )?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("azmon-bridge/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let tokens = TokenProvider::new(
        http.clone(),
        &opts.authority,
        opts.management_endpoint.as_str(),
        credentials,
    );
    let client = Arc::new(azure::AzureClient::new(http, opts.management_endpoint.clone(), tokens));

    // ── 2. Cache backend ─────────────────────────────────────────
    let backend: Arc<dyn ResultCache> = match opts.cache_backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Redis => {
            tracing::info!(url = %opts.redis_url, "connecting to Redis");
            Arc::new(RedisCache::connect(&opts.redis_url).await?)
        }
        CacheBackend::None => Arc::new(NoCache),
    };

    // ── 3. Build shared state ────────────────────────────────────
    let exporter = Arc::new(metrics::ExporterMetrics::new().context("failed to register exporter metrics")?);
    let state = Arc::new(AppState {
        collector: collector::FanOutCollector::new(client, exporter.clone(), opts.collector_config()),
        cache: ProbeCache::new(backend),
        exporter,
        stats: Arc::new(metrics::ScrapeStats::new()),
        timeouts: opts.timeouts(),
    });

    // ── 4. Bind & serve ──────────────────────────────────────────
    let app = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(opts.bind)
        .await
        .with_context(|| format!("failed to bind {}", opts.bind))?;

    tracing::info!(
        addr = %opts.bind,
        cache = ?opts.cache_backend,
        subscription_concurrency = opts.subscription_concurrency,
        resource_concurrency = opts.resource_concurrency,
        "azmon-bridge listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    tracing::info!("shut down");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
