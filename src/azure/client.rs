use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use super::auth::{truncate, TokenProvider};
use super::model::{MetricsResponse, ResourceListResponse};
use super::{RemoteClient, RemoteError, ResourcePage};
use crate::probe::deadline::CollectionDeadline;
use crate::probe::settings::RequestSettings;
use crate::results::MetricSample;

const RESOURCES_API_VERSION: &str = "2021-04-01";
const METRICS_API_VERSION: &str = "2018-01-01";

/// Azure Resource Manager client for resource enumeration and
/// Azure Monitor metric queries.
pub struct AzureClient {
    http: reqwest::Client,
    endpoint: Url,
    tokens: TokenProvider,
}

impl AzureClient {
    pub fn new(http: reqwest::Client, endpoint: Url, tokens: TokenProvider) -> Self {
        Self { http, endpoint, tokens }
    }

    fn resources_url(&self, subscription: &str, filter: &str) -> Result<Url, RemoteError> {
        let mut url = self.join(&format!("/subscriptions/{subscription}/resources"))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("api-version", RESOURCES_API_VERSION);
            if !filter.is_empty() {
                q.append_pair("$filter", filter);
            }
        }
        Ok(url)
    }

    fn metrics_url(&self, resource_id: &str, settings: &RequestSettings) -> Result<Url, RemoteError> {
        let path = format!(
            "/{}/providers/microsoft.insights/metrics",
            resource_id.trim_matches('/')
        );
        let mut url = self.join(&path)?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("api-version", METRICS_API_VERSION);
            q.append_pair("timespan", &settings.timespan);
            if let Some(interval) = &settings.interval {
                q.append_pair("interval", interval);
            }
            if !settings.metrics.is_empty() {
                q.append_pair("metricnames", &settings.metrics.join(","));
            }
            if !settings.aggregations.is_empty() {
                q.append_pair("aggregation", &settings.aggregations.join(","));
            }
            if let Some(ns) = &settings.metric_namespace {
                q.append_pair("metricnamespace", ns);
            }
            if let Some(top) = settings.metric_top {
                q.append_pair("top", &top.to_string());
            }
            if let Some(filter) = &settings.metric_filter {
                q.append_pair("$filter", filter);
            }
            if let Some(order_by) = &settings.metric_order_by {
                q.append_pair("orderby", order_by);
            }
        }
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, RemoteError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|e| RemoteError::Transport(format!("invalid request URL for {path}: {e}")))
    }

    /// GET `url` as JSON, bounded by whatever time the deadline has left.
    async fn get_json<T: DeserializeOwned>(
        &self,
        deadline: &CollectionDeadline,
        url: Url,
    ) -> Result<T, RemoteError> {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(RemoteError::Timeout);
        }
        let token = self.tokens.token().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .timeout(remaining.max(Duration::from_millis(1)))
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = truncate(body.trim(), 512).to_string();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(message),
                _ => RemoteError::Status {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let body = response.bytes().await.map_err(map_transport)?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

fn map_transport(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

impl AzureClient {
    /// The bearer token only goes to the management endpoint, so a
    /// continuation link pointing anywhere else is refused.
    fn next_link_url(&self, next: &str) -> Result<Url, RemoteError> {
        let url = Url::parse(next)
            .map_err(|e| RemoteError::Decode(format!("invalid nextLink {next:?}: {e}")))?;
        if url.origin() != self.endpoint.origin() {
            return Err(RemoteError::Decode(format!(
                "nextLink {next:?} leaves the management endpoint {}",
                self.endpoint.origin().ascii_serialization()
            )));
        }
        Ok(url)
    }
}

#[async_trait]
impl RemoteClient for AzureClient {
    async fn list_resources(
        &self,
        deadline: &CollectionDeadline,
        subscription: &str,
        filter: &str,
        page: Option<String>,
    ) -> Result<ResourcePage, RemoteError> {
        let url = match page {
            Some(next) => self.next_link_url(&next)?,
            None => self.resources_url(subscription, filter)?,
        };

        let listing: ResourceListResponse = self.get_json(deadline, url).await?;
        Ok(ResourcePage {
            resources: listing.value.into_iter().map(Into::into).collect(),
            next: listing.next_link.filter(|n| !n.is_empty()),
        })
    }

    async fn fetch_metrics(
        &self,
        deadline: &CollectionDeadline,
        subscription: &str,
        resource_id: &str,
        settings: &RequestSettings,
    ) -> Result<Vec<MetricSample>, RemoteError> {
        let url = self.metrics_url(resource_id, settings)?;
        let response: MetricsResponse = self.get_json(deadline, url).await?;
        Ok(response.into_samples(subscription, resource_id, settings))
    }
}
