use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::ResourceDescriptor;
use crate::probe::settings::RequestSettings;
use crate::results::MetricSample;

// ─── Resource listing ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ResourceListResponse {
    #[serde(default)]
    pub value: Vec<GenericResource>,
    #[serde(rename = "nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenericResource {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl From<GenericResource> for ResourceDescriptor {
    fn from(r: GenericResource) -> Self {
        Self {
            id: r.id,
            name: r.name,
            kind: r.kind,
        }
    }
}

// ─── Metrics ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MetricsResponse {
    #[serde(default)]
    pub value: Vec<MetricValue>,
}

#[derive(Debug, Deserialize)]
pub struct MetricValue {
    pub name: LocalizableString,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timeseries: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
pub struct LocalizableString {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub metadatavalues: Vec<MetadataValue>,
    #[serde(default)]
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataValue {
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataPoint {
    #[serde(rename = "timeStamp")]
    pub time_stamp: Option<DateTime<Utc>>,
    pub average: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub total: Option<f64>,
    pub count: Option<f64>,
}

impl DataPoint {
    fn aggregations(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        [
            ("average", self.average),
            ("minimum", self.minimum),
            ("maximum", self.maximum),
            ("total", self.total),
            ("count", self.count),
        ]
        .into_iter()
        .filter_map(|(name, v)| v.map(|v| (name, v)))
    }

    fn has_value(&self) -> bool {
        self.aggregations().next().is_some()
    }
}

impl MetricsResponse {
    /// Flatten the response into one sample per metric, series and
    /// aggregation, using the newest data point that carries a value.
    pub fn into_samples(
        self,
        subscription: &str,
        resource_id: &str,
        settings: &RequestSettings,
    ) -> Vec<MetricSample> {
        let resource_group = resource_group_of(resource_id).unwrap_or_default();
        let mut samples = Vec::new();

        for metric in self.value {
            for series in metric.timeseries {
                let Some(point) = series.data.iter().rev().find(|p| p.has_value()) else {
                    continue;
                };
                let dimension = match series.metadatavalues.as_slice() {
                    [only] => only.value.clone().unwrap_or_default(),
                    _ => String::new(),
                };

                for (aggregation, value) in point.aggregations() {
                    let labels = BTreeMap::from([
                        ("subscriptionID".to_string(), subscription.to_string()),
                        ("resourceGroup".to_string(), resource_group.clone()),
                        ("timespan".to_string(), settings.timespan.clone()),
                        ("interval".to_string(), settings.interval.clone().unwrap_or_default()),
                        ("unit".to_string(), metric.unit.clone()),
                        ("dimension".to_string(), dimension.clone()),
                    ]);
                    samples.push(MetricSample {
                        resource_id: resource_id.to_string(),
                        metric: metric.name.value.clone(),
                        aggregation: aggregation.to_string(),
                        timestamp: point.time_stamp,
                        value,
                        labels,
                    });
                }
            }
        }
        samples
    }
}

/// Resource group segment of an ARM id, e.g. `/subscriptions/x/resourceGroups/<rg>/...`.
pub fn resource_group_of(resource_id: &str) -> Option<String> {
    let mut parts = resource_id.split('/');
    while let Some(part) = parts.next() {
        if part.eq_ignore_ascii_case("resourceGroups") {
            return parts.next().filter(|rg| !rg.is_empty()).map(str::to_string);
        }
    }
    None
}
