use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::cache::Fingerprint;
use crate::collector::CollectionReport;
use crate::metrics::instrumentation::RequestLabels;
use crate::metrics::{Instrumentation, ScrapeSample};
use crate::probe::deadline::{scrape_timeout, CollectionDeadline};
use crate::probe::settings::RequestSettings;
use crate::probe::ProbeEndpoint;
use crate::render::render;
use crate::AppState;

use super::AppError;

type Params = Query<Vec<(String, String)>>;

// ─── GET /probe/metrics/list ─────────────────────────────────────

pub async fn probe_list(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    probe(&state, ProbeEndpoint::List, &method, &uri, &headers, &params).await
}

// ─── GET /probe/metrics/resource ─────────────────────────────────

pub async fn probe_resource(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Params,
) -> Response {
    probe(&state, ProbeEndpoint::Resource, &method, &uri, &headers, &params).await
}

// ─── Shared flow ─────────────────────────────────────────────────

async fn probe(
    state: &AppState,
    endpoint: ProbeEndpoint,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    params: &[(String, String)],
) -> Response {
    let t0 = Instant::now();
    let mut scrape = ScrapeSample {
        endpoint: endpoint.path(),
        name: String::new(),
        total_us: 0,
        samples: 0,
        failures: 0,
        cache_hit: false,
        success: false,
    };

    let outcome = scrape_once(state, endpoint, method, uri, headers, params, t0, &mut scrape).await;

    scrape.total_us = t0.elapsed().as_micros() as u64;
    scrape.success = outcome.is_ok();
    state.stats.record(scrape);

    match outcome {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn scrape_once(
    state: &AppState,
    endpoint: ProbeEndpoint,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    params: &[(String, String)],
    t0: Instant,
    scrape: &mut ScrapeSample,
) -> Result<String, AppError> {
    let budget = scrape_timeout(headers, state.timeouts.for_endpoint(endpoint)).map_err(|e| {
        error!(endpoint = endpoint.path(), error = %e, "invalid scrape timeout header");
        AppError::from(e)
    })?;
    // Dropping the guard cancels whatever is still in flight.
    let (deadline, _guard) = CollectionDeadline::start(budget);

    let settings = RequestSettings::resolve(params, endpoint).map_err(|e| {
        error!(endpoint = endpoint.path(), error = %e, "rejected probe request");
        AppError::from(e)
    })?;
    scrape.name = settings.name.clone();
    let settings = Arc::new(settings);

    let key = Fingerprint::of_request(endpoint, method.as_str(), uri.path(), params);

    let results = match state.cache.fetch(&key, settings.cache_ttl, &deadline).await {
        Some(hit) => {
            debug!(name = %settings.name, key = %key, samples = hit.len(), "serving cached samples");
            scrape.cache_hit = true;
            if endpoint == ProbeEndpoint::Resource {
                observe_cached_resource_scrape(state, &settings, t0.elapsed());
            }
            hit
        }
        None => {
            let report = state.collector.collect(settings.clone(), endpoint, &deadline).await;
            scrape.failures = report.failures.len();
            info!(
                name = %settings.name,
                subscriptions = settings.subscriptions.len(),
                samples = report.results.len(),
                failures = report.failures.len(),
                timeouts = report.timeouts(),
                expired = deadline.is_done(),
                "collection finished"
            );

            if report.faulted {
                return Err(AppError::Internal);
            }
            if let Some(message) = surfaced_failure(endpoint, &report) {
                return Err(AppError::Collection(message));
            }

            state.cache.save(&key, &report.results, settings.cache_ttl, &deadline).await;
            report.results
        }
    };

    scrape.samples = results.len();
    render(&settings.name, &results).map_err(|e| {
        error!(name = %settings.name, error = %e, "failed to render exposition");
        AppError::Internal
    })
}

/// Resource scrapes feed the collect-time histogram on every request,
/// cached or not.
fn observe_cached_resource_scrape(state: &AppState, settings: &RequestSettings, elapsed: Duration) {
    let Some(subscription) = settings.subscriptions.first() else {
        return;
    };
    let labels = RequestLabels {
        subscription,
        handler: ProbeEndpoint::Resource.path(),
        filter: "",
    };
    state.exporter.observe_collect_time(&labels, elapsed);
}

/// The failure a probe answers with instead of samples, if any.
/// List probes tolerate broken resources and deadline-truncated
/// enumeration, but not an enumeration the remote refused; resource
/// probes tolerate nothing.
fn surfaced_failure(endpoint: ProbeEndpoint, report: &CollectionReport) -> Option<String> {
    match endpoint {
        ProbeEndpoint::List => report.first_enumeration_failure().map(|f| {
            format!(
                "failed to list resources of subscription {}: {}",
                f.subscription, f.error
            )
        }),
        ProbeEndpoint::Resource => report.failures.first().map(|f| {
            format!(
                "failed to fetch metrics for {}: {}",
                f.resource.as_deref().unwrap_or(&f.subscription),
                f.error
            )
        }),
    }
}
