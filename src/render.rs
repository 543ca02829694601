use std::collections::BTreeSet;

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::results::{MetricSample, ResultSet};

const HELP: &str = "Azure monitor insight metric";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot build exposition: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("exposition is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Render `results` as a Prometheus text document with a single gauge
/// family called `name`.
///
/// A new registry is built on every call. Label names are the union of
/// all sample labels; samples lacking a label get an empty value.
pub fn render(name: &str, results: &ResultSet) -> Result<String, RenderError> {
    let registry = Registry::new();

    let mut samples: Vec<&MetricSample> = results.samples().iter().collect();
    if !samples.is_empty() {
        // Stable order so repeated renders of the same set agree even
        // when two samples share a label set.
        samples.sort_by(|a, b| {
            (&a.resource_id, &a.metric, &a.aggregation, &a.labels)
                .cmp(&(&b.resource_id, &b.metric, &b.aggregation, &b.labels))
        });

        let mut label_names: BTreeSet<&str> = ["resourceID", "metric", "aggregation"].into();
        for sample in &samples {
            label_names.extend(sample.labels.keys().map(String::as_str));
        }
        let label_names: Vec<&str> = label_names.into_iter().collect();

        let gauge = GaugeVec::new(Opts::new(name, HELP), &label_names)?;
        registry.register(Box::new(gauge.clone()))?;

        for sample in samples {
            let values: Vec<&str> = label_names
                .iter()
                .map(|label| label_value(sample, label))
                .collect();
            gauge.get_metric_with_label_values(&values)?.set(sample.value);
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn label_value<'a>(sample: &'a MetricSample, label: &str) -> &'a str {
    match label {
        "resourceID" => &sample.resource_id,
        "metric" => &sample.metric,
        "aggregation" => &sample.aggregation,
        other => sample.labels.get(other).map(String::as_str).unwrap_or(""),
    }
}
