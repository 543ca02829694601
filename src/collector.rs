use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::azure::{RemoteClient, RemoteError};
use crate::metrics::instrumentation::{FetchOutcome, Instrumentation, RequestLabels};
use crate::probe::deadline::CollectionDeadline;
use crate::probe::settings::RequestSettings;
use crate::probe::ProbeEndpoint;
use crate::results::{ResultSet, ResultSink};

// ─── Configuration ───────────────────────────────────────────────

/// Pool bounds for the two fan-out tiers.
#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    /// Subscriptions collected at once.
    pub subscription_concurrency: usize,
    /// Resource fetches in flight per subscription.
    pub resource_concurrency: usize,
}

impl CollectorConfig {
    pub fn new(subscription_concurrency: usize, resource_concurrency: usize) -> Self {
        Self {
            subscription_concurrency: subscription_concurrency.max(1),
            resource_concurrency: resource_concurrency.max(1),
        }
    }
}

// ─── Output ──────────────────────────────────────────────────────

/// A remote call that did not produce samples.
#[derive(Debug, Clone)]
pub struct CollectFailure {
    pub subscription: String,
    /// `None` when enumerating the subscription failed.
    pub resource: Option<String>,
    pub error: RemoteError,
}

impl CollectFailure {
    pub fn is_enumeration(&self) -> bool {
        self.resource.is_none()
    }
}

/// Everything one collection run produced. Only built after every
/// task of the run has been joined.
#[derive(Debug)]
pub struct CollectionReport {
    pub results: ResultSet,
    pub failures: Vec<CollectFailure>,
    /// A task panicked; its work is missing from `results`.
    pub faulted: bool,
}

impl CollectionReport {
    /// First enumeration that the remote refused. Enumerations cut short
    /// by the deadline are ordinary timeouts and are not returned here.
    pub fn first_enumeration_failure(&self) -> Option<&CollectFailure> {
        self.failures
            .iter()
            .find(|f| f.is_enumeration() && !f.error.is_timeout())
    }

    pub fn timeouts(&self) -> usize {
        self.failures.iter().filter(|f| f.error.is_timeout()).count()
    }
}

// ─── Collector ───────────────────────────────────────────────────

/// Two-tier bounded fan-out over subscriptions and their resources.
#[derive(Clone)]
pub struct FanOutCollector {
    client: Arc<dyn RemoteClient>,
    instrumentation: Arc<dyn Instrumentation>,
    config: CollectorConfig,
}

/// State shared by every task of one run.
struct Run {
    client: Arc<dyn RemoteClient>,
    instrumentation: Arc<dyn Instrumentation>,
    settings: Arc<RequestSettings>,
    endpoint: ProbeEndpoint,
    deadline: CollectionDeadline,
    sink: ResultSink,
    faulted: AtomicBool,
    started: Instant,
}

impl FanOutCollector {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        instrumentation: Arc<dyn Instrumentation>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            client,
            instrumentation,
            config,
        }
    }

    /// Collect every sample `settings` asks for.
    ///
    /// Explicit targets are fetched one after another; otherwise each
    /// subscription is enumerated and its resources fetched in parallel.
    /// Individual failures are reported, never propagated.
    pub async fn collect(
        &self,
        settings: Arc<RequestSettings>,
        endpoint: ProbeEndpoint,
        deadline: &CollectionDeadline,
    ) -> CollectionReport {
        let sink = ResultSink::new();
        let run = Arc::new(Run {
            client: self.client.clone(),
            instrumentation: self.instrumentation.clone(),
            settings,
            endpoint,
            deadline: deadline.clone(),
            sink: sink.clone(),
            faulted: AtomicBool::new(false),
            started: Instant::now(),
        });

        let failures = match run.settings.targets.clone() {
            Some(targets) => run.collect_targets(&targets).await,
            None => run.clone().collect_subscriptions(self.config).await,
        };
        let faulted = run.faulted.load(Ordering::SeqCst);

        // Every task holding a handle to the run has been joined above.
        drop(run);
        CollectionReport {
            results: sink.finish(),
            failures,
            faulted,
        }
    }
}

impl Run {
    fn labels<'a>(&'a self, subscription: &'a str) -> RequestLabels<'a> {
        RequestLabels {
            subscription,
            handler: self.endpoint.path(),
            filter: match self.endpoint {
                ProbeEndpoint::List => &self.settings.filter,
                ProbeEndpoint::Resource => "",
            },
        }
    }

    // ── List mode ───────────────────────────────────────────────

    async fn collect_subscriptions(self: Arc<Self>, config: CollectorConfig) -> Vec<CollectFailure> {
        let slots = Arc::new(Semaphore::new(config.subscription_concurrency));
        let mut tasks = JoinSet::new();

        for subscription in self.settings.subscriptions.iter().cloned() {
            // Blocks until a subscription slot frees up.
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let run = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                run.collect_subscription(subscription, config.resource_concurrency)
                    .await
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(f) => failures.extend(f),
                Err(e) => {
                    error!(name = %self.settings.name, error = %e, "subscription task aborted");
                    self.faulted.store(true, Ordering::SeqCst);
                }
            }
        }
        failures
    }

    /// Enumerate one subscription page by page, fetching each resource
    /// under a pool scoped to this subscription.
    async fn collect_subscription(
        self: Arc<Self>,
        subscription: String,
        resource_concurrency: usize,
    ) -> Vec<CollectFailure> {
        let slots = Arc::new(Semaphore::new(resource_concurrency));
        let mut fetches = JoinSet::new();
        let mut failures = Vec::new();
        let mut page = None;

        loop {
            let listing = self
                .deadline
                .run(self.client.list_resources(
                    &self.deadline,
                    &subscription,
                    &self.settings.filter,
                    page.take(),
                ))
                .await;

            let listing = match listing {
                Ok(listing) => listing,
                Err(error) => {
                    if error.is_timeout() {
                        warn!(
                            name = %self.settings.name,
                            subscription = %subscription,
                            "timed out listing resources, keeping what was fetched"
                        );
                    } else {
                        warn!(
                            name = %self.settings.name,
                            subscription = %subscription,
                            error = %error,
                            "failed listing resources"
                        );
                    }
                    failures.push(CollectFailure {
                        subscription: subscription.clone(),
                        resource: None,
                        error,
                    });
                    break;
                }
            };

            for resource in listing.resources {
                tracing::trace!(
                    subscription = %subscription,
                    resource = %resource.id,
                    kind = resource.kind.as_deref().unwrap_or_default(),
                    resource_name = resource.name.as_deref().unwrap_or_default(),
                    "queueing fetch"
                );
                let Ok(permit) = slots.clone().acquire_owned().await else {
                    break;
                };
                let run = self.clone();
                let subscription = subscription.clone();
                fetches.spawn(async move {
                    let _permit = permit;
                    run.fetch_resource(&subscription, &resource.id).await
                });
            }

            match listing.next {
                Some(next) => page = Some(next),
                None => break,
            }
        }

        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(e) => {
                    error!(subscription = %subscription, error = %e, "fetch task aborted");
                    self.faulted.store(true, Ordering::SeqCst);
                }
            }
        }

        self.instrumentation
            .observe_collect_time(&self.labels(&subscription), self.started.elapsed());
        failures
    }

    // ── Single-target mode ──────────────────────────────────────

    async fn collect_targets(&self, targets: &[String]) -> Vec<CollectFailure> {
        let Some(subscription) = self.settings.subscriptions.first() else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        for target in targets {
            if let Some(failure) = self.fetch_resource(subscription, target).await {
                failures.push(failure);
            }
        }

        self.instrumentation
            .observe_collect_time(&self.labels(subscription), self.started.elapsed());
        failures
    }

    // ── Shared ──────────────────────────────────────────────────

    async fn fetch_resource(&self, subscription: &str, resource_id: &str) -> Option<CollectFailure> {
        let labels = self.labels(subscription);
        let fetched = self
            .deadline
            .run(self.client.fetch_metrics(
                &self.deadline,
                subscription,
                resource_id,
                &self.settings,
            ))
            .await;

        match fetched {
            Ok(samples) => {
                debug!(
                    name = %self.settings.name,
                    subscription,
                    resource = resource_id,
                    samples = samples.len(),
                    "fetched metrics"
                );
                self.sink.extend(samples);
                self.instrumentation.record_fetch(&labels, FetchOutcome::Success);
                None
            }
            Err(error) => {
                if error.is_timeout() {
                    warn!(
                        name = %self.settings.name,
                        subscription,
                        resource = resource_id,
                        "timed out fetching metrics"
                    );
                } else {
                    warn!(
                        name = %self.settings.name,
                        subscription,
                        resource = resource_id,
                        error = %error,
                        "failed fetching metrics"
                    );
                }
                self.instrumentation.record_fetch(&labels, FetchOutcome::Error);
                Some(CollectFailure {
                    subscription: subscription.to_string(),
                    resource: Some(resource_id.to_string()),
                    error,
                })
            }
        }
    }
}
