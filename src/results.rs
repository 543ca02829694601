use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ─── Samples ─────────────────────────────────────────────────────

/// One metric observation for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub resource_id: String,
    /// Remote metric name, e.g. "Percentage CPU"
    pub metric: String,
    /// average / minimum / maximum / total / count
    pub aggregation: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub value: f64,
    /// Extra exposition labels (subscription, unit, dimension, ...)
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The aggregated output of one collection run.
///
/// Cheap to clone; the samples are shared and never mutated once the
/// set has been sealed by [`ResultSink::finish`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    samples: Arc<Vec<MetricSample>>,
}

impl ResultSet {
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<MetricSample>> for ResultSet {
    fn from(samples: Vec<MetricSample>) -> Self {
        Self {
            samples: Arc::new(samples),
        }
    }
}

// ─── Write side ──────────────────────────────────────────────────

/// Append-only sink shared by every fetch task of a run.
///
/// Clones share the same buffer. Appends are serialized by a mutex.
#[derive(Debug, Clone, Default)]
pub struct ResultSink {
    inner: Arc<Mutex<Vec<MetricSample>>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, samples: Vec<MetricSample>) {
        if samples.is_empty() {
            return;
        }
        self.inner.lock().extend(samples);
    }

    /// Seal the sink into a read-only [`ResultSet`].
    ///
    /// Callers must have joined every writer first. A clone still held
    /// elsewhere means a writer escaped the join; in that case the
    /// buffer is drained under the lock so nothing written so far is
    /// lost, and later appends through the stray clone are discarded.
    pub fn finish(self) -> ResultSet {
        match Arc::try_unwrap(self.inner) {
            Ok(buffer) => ResultSet::from(buffer.into_inner()),
            Err(shared) => {
                tracing::error!("result sink sealed while a writer is still attached");
                let drained = std::mem::take(&mut *shared.lock());
                ResultSet::from(drained)
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn sample(resource_id: &str, metric: &str, value: f64) -> MetricSample {
    MetricSample {
        resource_id: resource_id.to_string(),
        metric: metric.to_string(),
        aggregation: "average".to_string(),
        timestamp: None,
        value,
        labels: BTreeMap::new(),
    }
}
