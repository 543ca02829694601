//! Scripted in-process `RemoteClient` for collector and handler tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use super::{RemoteClient, RemoteError, ResourceDescriptor, ResourcePage};
use crate::probe::deadline::CollectionDeadline;
use crate::probe::settings::RequestSettings;
use crate::results::MetricSample;

pub fn resource_id(subscription: &str, n: usize) -> String {
    format!("/subscriptions/{subscription}/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm{n}")
}

pub struct FakeClient {
    resources: HashMap<String, Vec<String>>,
    page_size: usize,
    fetch_delay: Duration,
    fetch_jitter: Duration,
    list_delay: Duration,
    samples_per_resource: usize,
    failing_resources: HashSet<String>,
    failing_subscriptions: HashSet<String>,

    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    active: Mutex<Activity>,
}

#[derive(Default)]
struct Activity {
    fetches: usize,
    max_fetches: usize,
    lists: usize,
    max_fetches_during_list: usize,
    per_subscription: HashMap<String, usize>,
    max_subscriptions: usize,
    max_fetches_per_subscription: usize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            page_size: 50,
            fetch_delay: Duration::ZERO,
            fetch_jitter: Duration::ZERO,
            list_delay: Duration::ZERO,
            samples_per_resource: 1,
            failing_resources: HashSet::new(),
            failing_subscriptions: HashSet::new(),
            list_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            active: Mutex::new(Activity::default()),
        }
    }

    pub fn with_subscription(mut self, subscription: &str, resources: usize) -> Self {
        let ids = (0..resources).map(|n| resource_id(subscription, n)).collect();
        self.resources.insert(subscription.to_string(), ids);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Adds a random extra delay in `[0, max]` to every fetch.
    pub fn fetch_jitter(mut self, max: Duration) -> Self {
        self.fetch_jitter = max;
        self
    }

    pub fn list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    pub fn samples_per_resource(mut self, n: usize) -> Self {
        self.samples_per_resource = n;
        self
    }

    pub fn failing_resource(mut self, id: String) -> Self {
        self.failing_resources.insert(id);
        self
    }

    pub fn failing_subscription(mut self, subscription: &str) -> Self {
        self.failing_subscriptions.insert(subscription.to_string());
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed in flight at once.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.active.lock().max_fetches
    }

    /// Highest number of fetches in flight while some listing was too.
    pub fn max_fetches_during_list(&self) -> usize {
        self.active.lock().max_fetches_during_list
    }

    /// Highest number of distinct subscriptions with a call in flight.
    pub fn max_concurrent_subscriptions(&self) -> usize {
        self.active.lock().max_subscriptions
    }

    /// Highest number of fetches in flight within a single subscription.
    pub fn max_concurrent_fetches_per_subscription(&self) -> usize {
        self.active.lock().max_fetches_per_subscription
    }

    fn jitter(&self) -> Duration {
        let max = self.fetch_jitter.as_micros() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::thread_rng().gen_range(0..=max))
    }

    fn enter(&self, subscription: &str, is_fetch: bool) {
        let mut a = self.active.lock();
        let in_sub = a.per_subscription.entry(subscription.to_string()).or_insert(0);
        *in_sub += 1;
        let in_sub = *in_sub;
        if is_fetch {
            a.fetches += 1;
            a.max_fetches = a.max_fetches.max(a.fetches);
            a.max_fetches_per_subscription = a.max_fetches_per_subscription.max(in_sub);
        } else {
            a.lists += 1;
        }
        if a.lists > 0 {
            a.max_fetches_during_list = a.max_fetches_during_list.max(a.fetches);
        }
        a.max_subscriptions = a.max_subscriptions.max(a.per_subscription.len());
    }

    fn leave(&self, subscription: &str, is_fetch: bool) {
        let mut a = self.active.lock();
        if is_fetch {
            a.fetches -= 1;
        } else {
            a.lists -= 1;
        }
        if let Some(n) = a.per_subscription.get_mut(subscription) {
            *n -= 1;
            if *n == 0 {
                a.per_subscription.remove(subscription);
            }
        }
    }
}

/// Leaves the activity tracker even when the call is cancelled mid-sleep.
struct InFlight<'a> {
    client: &'a FakeClient,
    subscription: &'a str,
    is_fetch: bool,
}

impl<'a> InFlight<'a> {
    fn new(client: &'a FakeClient, subscription: &'a str, is_fetch: bool) -> Self {
        client.enter(subscription, is_fetch);
        Self {
            client,
            subscription,
            is_fetch,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.client.leave(self.subscription, self.is_fetch);
    }
}

#[async_trait]
impl RemoteClient for FakeClient {
    async fn list_resources(
        &self,
        _deadline: &CollectionDeadline,
        subscription: &str,
        _filter: &str,
        page: Option<String>,
    ) -> Result<ResourcePage, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::new(self, subscription, false);

        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        if self.failing_subscriptions.contains(subscription) {
            return Err(RemoteError::Status {
                status: 403,
                message: format!("subscription {subscription} is not accessible"),
            });
        }

        let all = self.resources.get(subscription).cloned().unwrap_or_default();
        let offset: usize = page.and_then(|p| p.parse().ok()).unwrap_or(0);
        let end = (offset + self.page_size).min(all.len());
        let resources = all[offset.min(end)..end]
            .iter()
            .map(|id| ResourceDescriptor {
                id: id.clone(),
                name: None,
                kind: None,
            })
            .collect();

        Ok(ResourcePage {
            resources,
            next: (end < all.len()).then(|| end.to_string()),
        })
    }

    async fn fetch_metrics(
        &self,
        _deadline: &CollectionDeadline,
        subscription: &str,
        resource_id: &str,
        _settings: &RequestSettings,
    ) -> Result<Vec<MetricSample>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::new(self, subscription, true);

        let delay = self.fetch_delay + self.jitter();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        if self.failing_resources.contains(resource_id) {
            return Err(RemoteError::Status {
                status: 404,
                message: format!("resource {resource_id} not found"),
            });
        }

        Ok((0..self.samples_per_resource)
            .map(|n| MetricSample {
                resource_id: resource_id.to_string(),
                metric: format!("metric{n}"),
                aggregation: "average".to_string(),
                timestamp: None,
                value: n as f64,
                labels: BTreeMap::from([("subscriptionID".to_string(), subscription.to_string())]),
            })
            .collect())
    }
}
