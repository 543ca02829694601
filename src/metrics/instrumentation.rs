use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Label values shared by every exporter-health observation.
#[derive(Debug, Clone, Copy)]
pub struct RequestLabels<'a> {
    pub subscription: &'a str,
    /// Route path of the scrape endpoint
    pub handler: &'a str,
    pub filter: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Error,
}

impl FetchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Exporter-health sink injected into the collector.
pub trait Instrumentation: Send + Sync {
    fn record_fetch(&self, labels: &RequestLabels<'_>, outcome: FetchOutcome);

    fn observe_collect_time(&self, labels: &RequestLabels<'_>, elapsed: Duration);
}

// ─── Prometheus implementation ───────────────────────────────────

/// Process-wide counters and histograms served on `/metrics`.
pub struct ExporterMetrics {
    registry: Registry,
    requests: IntCounterVec,
    collect_time: HistogramVec,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("azurerm_stats_metric_requests", "Azure insights metrics requests"),
            &["subscriptionID", "handler", "filter", "result"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let collect_time = HistogramVec::new(
            HistogramOpts::new(
                "azurerm_stats_metric_collecttime",
                "Azure insights metrics collecttime",
            )
            .buckets(vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 90.0, 120.0]),
            &["subscriptionID", "handler", "filter"],
        )?;
        registry.register(Box::new(collect_time.clone()))?;

        Ok(Self {
            registry,
            requests,
            collect_time,
        })
    }

    /// Text exposition of the process registry.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let families = self.registry.gather();
        let mut buffer = Vec::with_capacity(4 * 1024);
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Instrumentation for ExporterMetrics {
    fn record_fetch(&self, labels: &RequestLabels<'_>, outcome: FetchOutcome) {
        self.requests
            .with_label_values(&[labels.subscription, labels.handler, labels.filter, outcome.as_str()])
            .inc();
    }

    fn observe_collect_time(&self, labels: &RequestLabels<'_>, elapsed: Duration) {
        self.collect_time
            .with_label_values(&[labels.subscription, labels.handler, labels.filter])
            .observe(elapsed.as_secs_f64());
    }
}

// ─── Test double ─────────────────────────────────────────────────

#[cfg(test)]
pub mod recording {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct FetchRecord {
        pub subscription: String,
        pub handler: String,
        pub filter: String,
        pub outcome: FetchOutcome,
    }

    /// Captures every call so tests can assert on counts.
    #[derive(Default)]
    pub struct RecordingInstrumentation {
        pub fetches: Mutex<Vec<FetchRecord>>,
        pub collect_times: Mutex<Vec<(String, Duration)>>,
    }

    impl RecordingInstrumentation {
        pub fn count(&self, outcome: FetchOutcome) -> usize {
            self.fetches.lock().iter().filter(|f| f.outcome == outcome).count()
        }
    }

    impl Instrumentation for RecordingInstrumentation {
        fn record_fetch(&self, labels: &RequestLabels<'_>, outcome: FetchOutcome) {
            self.fetches.lock().push(FetchRecord {
                subscription: labels.subscription.to_string(),
                handler: labels.handler.to_string(),
                filter: labels.filter.to_string(),
                outcome,
            });
        }

        fn observe_collect_time(&self, labels: &RequestLabels<'_>, elapsed: Duration) {
            self.collect_times
                .lock()
                .push((labels.subscription.to_string(), elapsed));
        }
    }
}
