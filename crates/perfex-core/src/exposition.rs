//! OpenMetrics text encoding of a [`ScrapeResult`].
//!
//! The result is exposed through a `prometheus_client` [`Collector`] so the
//! crate's text encoder does the formatting. Samples are grouped into
//! families by metric name in first-seen order, followed by the exporter's
//! own per-collector meta metrics.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric, MetricEncoder, text};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;

use crate::collector::{MetricDesc, Sample, ValueKind};
use crate::scrape::{CollectorStatus, ScrapeResult};

/// Content type of [`encode`]'s output.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

const EXPORTER_SUBSYSTEM: &str = "exporter";

/// Renders `result` in the OpenMetrics text format.
pub fn encode(result: Arc<ScrapeResult>) -> Result<String, fmt::Error> {
    let mut registry = Registry::default();
    registry.register_collector(Box::new(ResultCollector { result }));
    let mut body = String::new();
    text::encode(&mut body, &registry)?;
    Ok(body)
}

#[derive(Debug)]
struct ResultCollector {
    result: Arc<ScrapeResult>,
}

impl Collector for ResultCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let meta = meta_samples(&self.result);
        for family in families(self.result.samples.iter().chain(meta.iter())) {
            encode_family(&mut encoder, &family)?;
        }
        Ok(())
    }
}

struct Family<'a> {
    desc: &'a MetricDesc,
    samples: Vec<&'a Sample>,
}

fn families<'a>(samples: impl Iterator<Item = &'a Sample>) -> Vec<Family<'a>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut families: Vec<Family<'a>> = Vec::new();
    for sample in samples {
        let slot = *index.entry(sample.desc.name.as_str()).or_insert_with(|| {
            families.push(Family {
                desc: &sample.desc,
                samples: Vec::new(),
            });
            families.len() - 1
        });
        families[slot].samples.push(sample);
    }
    families
}

fn encode_family(encoder: &mut DescriptorEncoder, family: &Family<'_>) -> fmt::Result {
    let desc = family.desc;
    // The text encoder appends `_total` to counter samples itself.
    let (name, metric_type) = match desc.kind {
        ValueKind::Gauge => (desc.name.as_str(), MetricType::Gauge),
        ValueKind::Counter => (
            desc.name.strip_suffix("_total").unwrap_or(&desc.name),
            MetricType::Counter,
        ),
    };

    let mut metric_encoder = encoder.encode_descriptor(name, desc.help, None, metric_type)?;

    // An unlabeled family is a single series.
    if desc.labels.is_empty() {
        return match family.samples.last() {
            Some(sample) => encode_value(desc.kind, sample.value, metric_encoder),
            None => Ok(()),
        };
    }

    for sample in &family.samples {
        let labels: Vec<(&str, &str)> = desc
            .labels
            .iter()
            .copied()
            .zip(sample.label_values.iter().map(String::as_str))
            .collect();
        encode_value(desc.kind, sample.value, metric_encoder.encode_family(&labels)?)?;
    }
    Ok(())
}

fn encode_value(kind: ValueKind, value: f64, encoder: MetricEncoder) -> fmt::Result {
    match kind {
        ValueKind::Gauge => ConstGauge::new(value).encode(encoder),
        ValueKind::Counter => ConstCounter::new(value).encode(encoder),
    }
}

fn sample(desc: &Arc<MetricDesc>, label_values: &[&str], value: f64) -> Sample {
    Sample {
        desc: Arc::clone(desc),
        label_values: label_values.iter().map(|v| v.to_string()).collect(),
        value,
    }
}

fn flag(set: bool) -> f64 {
    if set { 1.0 } else { 0.0 }
}

/// Per-collector duration/success/timeout, scrape timing and build info.
fn meta_samples(result: &ScrapeResult) -> Vec<Sample> {
    let duration = MetricDesc::new(
        EXPORTER_SUBSYSTEM,
        "collector_duration_seconds",
        "Duration of a collection",
        &["collector"],
        ValueKind::Gauge,
    );
    let success = MetricDesc::new(
        EXPORTER_SUBSYSTEM,
        "collector_success",
        "Whether the collector was successful",
        &["collector"],
        ValueKind::Gauge,
    );
    let timeout = MetricDesc::new(
        EXPORTER_SUBSYSTEM,
        "collector_timeout",
        "Whether the collector timed out",
        &["collector"],
        ValueKind::Gauge,
    );
    let snapshot = MetricDesc::new(
        EXPORTER_SUBSYSTEM,
        "perflib_snapshot_duration_seconds",
        "Duration of the performance data query",
        &[],
        ValueKind::Gauge,
    );
    let collected_at = MetricDesc::new(
        EXPORTER_SUBSYSTEM,
        "scrape_timestamp_seconds",
        "Unix time at which the scrape started",
        &[],
        ValueKind::Gauge,
    );
    let build_info = MetricDesc::new(
        EXPORTER_SUBSYSTEM,
        "build_info",
        "Exporter version and build target",
        &["version", "target"],
        ValueKind::Gauge,
    );

    let mut samples = Vec::with_capacity(result.outcomes.len() * 3 + 3);
    for outcome in &result.outcomes {
        samples.push(sample(&duration, &[outcome.name], outcome.duration.as_secs_f64()));
    }
    for outcome in &result.outcomes {
        samples.push(sample(&success, &[outcome.name], flag(outcome.status.is_success())));
    }
    for outcome in &result.outcomes {
        let timed_out = outcome.status == CollectorStatus::Timeout;
        samples.push(sample(&timeout, &[outcome.name], flag(timed_out)));
    }
    samples.push(sample(&snapshot, &[], result.snapshot_duration.as_secs_f64()));
    let timestamp = result.collected_at.timestamp_millis() as f64 / 1000.0;
    samples.push(sample(&collected_at, &[], timestamp));
    samples.push(sample(&build_info, &[crate::VERSION, crate::BUILD_TARGET], 1.0));
    samples
}
