use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::duration::{parse_go_duration, DurationParseError};
use super::ProbeEndpoint;

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_METRIC_NAME: &str = "azurerm_resource_metric";
pub const DEFAULT_TIMESPAN: &str = "PT1M";

/// Longest accepted `cache` value.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const AGGREGATIONS: &[&str] = &["average", "minimum", "maximum", "total", "count"];

static METRIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("static regex"));

// ─── Types ───────────────────────────────────────────────────────

/// Validated, immutable description of one scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSettings {
    /// Gauge name; also used to tag log lines.
    pub name: String,
    pub subscriptions: Vec<String>,
    /// Resource filter handed to enumeration. May be empty.
    pub filter: String,
    /// Explicit resource ids. `Some` skips enumeration.
    pub targets: Option<Vec<String>>,
    /// `None` disables caching for this request.
    pub cache_ttl: Option<Duration>,

    pub timespan: String,
    pub interval: Option<String>,
    pub metrics: Vec<String>,
    pub aggregations: Vec<String>,
    pub metric_namespace: Option<String>,
    pub metric_top: Option<u32>,
    pub metric_filter: Option<String>,
    pub metric_order_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("parameter \"subscription\" is missing")]
    MissingSubscription,

    #[error("parameter \"name\" is not a valid metric name: {0:?}")]
    InvalidName(String),

    #[error("parameter \"target\" is only accepted by the resource endpoint")]
    TargetNotAllowed,

    #[error("parameter \"target\" is missing")]
    MissingTarget,

    #[error("exactly one subscription is required when targeting resources, got {0}")]
    SubscriptionCount(usize),

    #[error("parameter \"cache\" is invalid: {0}")]
    CacheTtl(#[from] DurationParseError),

    #[error("parameter \"cache\" must be greater than zero and at most 24h, got {0:?}")]
    CacheTtlRange(Duration),

    #[error("parameter \"aggregation\" has unsupported value {0:?}")]
    InvalidAggregation(String),

    #[error("parameter \"metricTop\" must be a positive integer, got {0:?}")]
    InvalidMetricTop(String),
}

// ─── Resolver ────────────────────────────────────────────────────

impl RequestSettings {
    /// Build settings from decoded query pairs for the given endpoint.
    pub fn resolve(
        params: &[(String, String)],
        endpoint: ProbeEndpoint,
    ) -> Result<Self, ValidationError> {
        let name = single(params, "name").unwrap_or_else(|| DEFAULT_METRIC_NAME.to_string());
        if !METRIC_NAME.is_match(&name) {
            return Err(ValidationError::InvalidName(name));
        }

        let subscriptions = dedup(list(params, "subscription"));
        if subscriptions.is_empty() {
            return Err(ValidationError::MissingSubscription);
        }

        let target_values = list(params, "target");
        let targets = match endpoint {
            ProbeEndpoint::List => {
                if !target_values.is_empty() {
                    return Err(ValidationError::TargetNotAllowed);
                }
                None
            }
            ProbeEndpoint::Resource => {
                if subscriptions.len() != 1 {
                    return Err(ValidationError::SubscriptionCount(subscriptions.len()));
                }
                if target_values.is_empty() {
                    return Err(ValidationError::MissingTarget);
                }
                Some(target_values)
            }
        };

        let cache_ttl = match single(params, "cache") {
            None => None,
            Some(raw) => {
                let ttl = parse_go_duration(&raw)?;
                if ttl.is_zero() || ttl > MAX_CACHE_TTL {
                    return Err(ValidationError::CacheTtlRange(ttl));
                }
                Some(ttl)
            }
        };

        let aggregations = list(params, "aggregation")
            .into_iter()
            .map(|a| {
                let lower = a.to_ascii_lowercase();
                if AGGREGATIONS.contains(&lower.as_str()) {
                    Ok(lower)
                } else {
                    Err(ValidationError::InvalidAggregation(a))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let metric_top = match single(params, "metricTop") {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(top) if top > 0 => Some(top),
                _ => return Err(ValidationError::InvalidMetricTop(raw)),
            },
        };

        Ok(Self {
            name,
            subscriptions,
            filter: single(params, "filter").unwrap_or_default(),
            targets,
            cache_ttl,
            timespan: single(params, "timespan").unwrap_or_else(|| DEFAULT_TIMESPAN.to_string()),
            interval: single(params, "interval"),
            metrics: list(params, "metric"),
            aggregations,
            metric_namespace: single(params, "metricNamespace"),
            metric_top,
            metric_filter: single(params, "metricFilter"),
            metric_order_by: single(params, "metricOrderBy"),
        })
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// First non-blank value of `key`, trimmed.
fn single(params: &[(String, String)], key: &str) -> Option<String> {
    params
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Every value of `key`, accepting both repeated parameters and
/// comma-separated lists.
fn list(params: &[(String, String)], key: &str) -> Vec<String> {
    params
        .iter()
        .filter(|(k, _)| k == key)
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
