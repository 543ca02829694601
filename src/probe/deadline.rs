use std::future::Future;
use std::time::Duration;

use axum::http::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::azure::RemoteError;

/// Header Prometheus sets to the scrape timeout of the job, in seconds.
pub const TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

/// Upper bound accepted from the header.
pub const MAX_SCRAPE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeoutHeaderError {
    #[error("X-Prometheus-Scrape-Timeout-Seconds is not valid ASCII")]
    NotText,

    #[error("X-Prometheus-Scrape-Timeout-Seconds is not a number: {0:?}")]
    Invalid(String),

    #[error("X-Prometheus-Scrape-Timeout-Seconds must be within (0, 3600] seconds, got {0}")]
    OutOfRange(f64),
}

/// Resolve the collection budget for a request.
///
/// A missing header yields `default`. A header that is present but
/// unusable is an error; the caller's explicit value is never replaced.
pub fn scrape_timeout(headers: &HeaderMap, default: Duration) -> Result<Duration, TimeoutHeaderError> {
    let Some(raw) = headers.get(TIMEOUT_HEADER) else {
        return Ok(default);
    };
    let text = raw.to_str().map_err(|_| TimeoutHeaderError::NotText)?.trim();
    let secs: f64 = text
        .parse()
        .map_err(|_| TimeoutHeaderError::Invalid(text.to_string()))?;

    if !secs.is_finite() || secs <= 0.0 || secs > MAX_SCRAPE_TIMEOUT.as_secs_f64() {
        return Err(TimeoutHeaderError::OutOfRange(secs));
    }
    Ok(Duration::from_secs_f64(secs))
}

// ─── Deadline ────────────────────────────────────────────────────

/// Cancellation token plus absolute expiry shared by every remote call
/// of one collection run.
#[derive(Debug, Clone)]
pub struct CollectionDeadline {
    token: CancellationToken,
    expires_at: Instant,
}

impl CollectionDeadline {
    /// Start a deadline `budget` from now.
    ///
    /// The returned guard cancels the token when dropped, so whichever
    /// way the request ends the token is cancelled. Cancelling is
    /// idempotent.
    pub fn start(budget: Duration) -> (Self, DropGuard) {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        let deadline = Self {
            token,
            expires_at: Instant::now() + budget,
        };
        (deadline, guard)
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.expires_at
    }

    /// Drive `fut` until it completes or the deadline fires, whichever
    /// comes first. An expired deadline never polls `fut`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(RemoteError::Timeout),
            _ = tokio::time::sleep_until(self.expires_at) => {
                self.token.cancel();
                Err(RemoteError::Timeout)
            }
            result = fut => result,
        }
    }
}
