//! Metric collectors.
//!
//! A collector turns the performance objects of one scrape into metric
//! samples. Collectors are independent: each runs on its own blocking task
//! against the shared, read-only [`ScrapeContext`] and writes into a private
//! [`MetricSink`] that the orchestrator merges only on success.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    CollectorRegistry                       │
//! │      "cpu" → CpuCollector::factory, ...  (built at start)  │
//! └───────────────────────────┬────────────────────────────────┘
//!                             │ instantiate(enabled)
//!                 ┌───────────▼───────────┐
//!                 │  Arc<dyn Collector>   │ × N
//!                 └───────────┬───────────┘
//!                             │ collect(&ScrapeContext, &mut MetricSink)
//!          ┌──────────────────┼──────────────────┐
//!   ctx.object("Processor")  perflib::decode   sink.emit(desc, value, labels)
//! ```

mod context;
pub mod cpu;
pub mod registry;

use std::sync::Arc;

use crate::perflib::DecodeError;

pub use context::ScrapeContext;
pub use cpu::CpuCollector;
pub use registry::{CollectorFactory, CollectorRegistry, CollectorRegistryBuilder, RegistryError};

/// Metric namespace prefixed to every exported metric.
pub const NAMESPACE: &str = "windows";

/// Error type for collector failures.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// A required performance object is not part of the snapshot.
    MissingObject(String),
    /// The object did not decode into the collector's records.
    Decode(DecodeError),
    /// A sample did not match its metric description.
    Sample(String),
    /// The collector could not be constructed.
    Init(String),
    /// The collector panicked.
    Panicked(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::MissingObject(name) => {
                write!(f, "performance object {:?} not in snapshot", name)
            }
            CollectError::Decode(e) => write!(f, "decode error: {}", e),
            CollectError::Sample(msg) => write!(f, "invalid sample: {}", msg),
            CollectError::Init(msg) => write!(f, "init error: {}", msg),
            CollectError::Panicked(msg) => write!(f, "collector panicked: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for CollectError {
    fn from(e: DecodeError) -> Self {
        CollectError::Decode(e)
    }
}

/// The capability every collector implements.
pub trait Collector: Send + Sync {
    /// Short registry name, e.g. `"cpu"`.
    fn name(&self) -> &'static str;

    /// Perflib title indexes of the objects this collector reads. The
    /// orchestrator queries the union of all enabled collectors at once.
    fn required_objects(&self) -> &'static [&'static str];

    /// Emits samples for one scrape. On error the sink is discarded.
    fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectError>;
}

/// Gauge or monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Gauge,
    Counter,
}

/// Identity of one metric: fully-qualified name, help, kind and the fixed
/// ordered label names.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDesc {
    pub name: String,
    pub help: &'static str,
    pub labels: &'static [&'static str],
    pub kind: ValueKind,
}

impl MetricDesc {
    pub fn new(
        subsystem: &str,
        metric: &str,
        help: &'static str,
        labels: &'static [&'static str],
        kind: ValueKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: build_fq_name(NAMESPACE, subsystem, metric),
            help,
            labels,
            kind,
        })
    }
}

/// Joins the non-empty parts with `_`: `windows`, `cpu`, `time_total` →
/// `windows_cpu_time_total`.
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// One emitted value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub desc: Arc<MetricDesc>,
    /// Values for `desc.labels`, same order.
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    pub fn kind(&self) -> ValueKind {
        self.desc.kind
    }

    /// Value of the label called `name`, if the metric has it.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.desc
            .labels
            .iter()
            .position(|l| *l == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
    }
}

/// Per-collector sample buffer.
#[derive(Debug, Default)]
pub struct MetricSink {
    samples: Vec<Sample>,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sample. Fails if the label count does not match `desc`.
    pub fn emit(
        &mut self,
        desc: &Arc<MetricDesc>,
        value: f64,
        label_values: &[&str],
    ) -> Result<(), CollectError> {
        if label_values.len() != desc.labels.len() {
            return Err(CollectError::Sample(format!(
                "{} expects {} label values, got {}",
                desc.name,
                desc.labels.len(),
                label_values.len()
            )));
        }
        self.samples.push(Sample {
            desc: Arc::clone(desc),
            label_values: label_values.iter().map(|v| v.to_string()).collect(),
            value,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fq_name() {
        assert_eq!(build_fq_name("windows", "cpu", "time_total"), "windows_cpu_time_total");
        assert_eq!(build_fq_name("windows", "", "up"), "windows_up");
        assert_eq!(build_fq_name("", "", "up"), "up");
    }

    #[test]
    fn test_sink_rejects_label_mismatch() {
        let desc = MetricDesc::new(
            "cpu",
            "time_total",
            "help",
            &["core", "mode"],
            ValueKind::Gauge,
        );
        let mut sink = MetricSink::new();

        assert!(sink.emit(&desc, 1.0, &["0", "idle"]).is_ok());
        let err = sink.emit(&desc, 1.0, &["0"]).unwrap_err();

        assert!(matches!(err, CollectError::Sample(_)));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_sample_label_lookup() {
        let desc = MetricDesc::new(
            "cpu",
            "time_total",
            "help",
            &["core", "mode"],
            ValueKind::Gauge,
        );
        let mut sink = MetricSink::new();
        sink.emit(&desc, 3.0, &["2", "user"]).unwrap();

        let sample = &sink.into_samples()[0];
        assert_eq!(sample.label("core"), Some("2"));
        assert_eq!(sample.label("mode"), Some("user"));
        assert_eq!(sample.label("state"), None);
        assert_eq!(sample.kind(), ValueKind::Gauge);
        assert_eq!(sample.desc.name, "windows_cpu_time_total");
    }
}
