pub mod auth;
pub mod client;
pub mod model;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::probe::deadline::CollectionDeadline;
use crate::probe::settings::RequestSettings;
use crate::results::MetricSample;

pub use client::AzureClient;

// ─── Remote types ────────────────────────────────────────────────

/// One resource returned by subscription enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub kind: Option<String>,
}

/// A single page of an enumeration. `next` is an opaque continuation
/// handed back to `list_resources` to fetch the following page.
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub resources: Vec<ResourceDescriptor>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("deadline exceeded before the remote call completed")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("remote API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

// ─── Client seam ─────────────────────────────────────────────────

/// The monitoring API as seen by the collector. Implementations must
/// return promptly once `deadline` expires.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one page of resources. `page` is `None` for the first page.
    async fn list_resources(
        &self,
        deadline: &CollectionDeadline,
        subscription: &str,
        filter: &str,
        page: Option<String>,
    ) -> Result<ResourcePage, RemoteError>;

    async fn fetch_metrics(
        &self,
        deadline: &CollectionDeadline,
        subscription: &str,
        resource_id: &str,
        settings: &RequestSettings,
    ) -> Result<Vec<MetricSample>, RemoteError>;
}
