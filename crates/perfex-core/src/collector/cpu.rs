//! CPU collector backed by the perflib `Processor` object.
//!
//! Emits, per logical core:
//! - `windows_cpu_cstate_seconds_total{core,state}`: time in C1/C2/C3
//! - `windows_cpu_time_total{core,mode}`: time per processor mode
//! - `windows_cpu_interrupts_total{core}`: hardware interrupts
//! - `windows_cpu_dpcs_total{core}`: deferred procedure calls
//!
//! The `_Total` instance is skipped: it is the sum of the per-core series.

use std::sync::{Arc, LazyLock};

use super::{CollectError, Collector, MetricDesc, MetricSink, ScrapeContext, ValueKind};
use crate::perflib::{PerfRecord, RecordSchema, decode};

/// Name of the perflib object read by this collector.
pub const PROCESSOR_OBJECT: &str = "Processor";

const SUBSYSTEM: &str = "cpu";

/// One `Processor` instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerflibProcessor {
    pub name: String,
    pub percent_c1_time: f64,
    pub percent_c2_time: f64,
    pub percent_c3_time: f64,
    pub percent_dpc_time: f64,
    pub percent_idle_time: f64,
    pub percent_interrupt_time: f64,
    pub percent_privileged_time: f64,
    pub percent_user_time: f64,
    pub interrupts: f64,
    pub dpcs_queued: f64,
}

static PROCESSOR_SCHEMA: LazyLock<RecordSchema<PerflibProcessor>> = LazyLock::new(|| {
    RecordSchema::<PerflibProcessor>::builder("PerflibProcessor")
        .instance_name(|r, name| r.name = name)
        .counter("% C1 Time", |r, v| r.percent_c1_time = v)
        .counter("% C2 Time", |r, v| r.percent_c2_time = v)
        .counter("% C3 Time", |r, v| r.percent_c3_time = v)
        .counter("% DPC Time", |r, v| r.percent_dpc_time = v)
        .counter("% Idle Time", |r, v| r.percent_idle_time = v)
        .counter("% Interrupt Time", |r, v| r.percent_interrupt_time = v)
        .counter("% Privileged Time", |r, v| r.percent_privileged_time = v)
        .counter("% User Time", |r, v| r.percent_user_time = v)
        .counter("Interrupts/sec", |r, v| r.interrupts = v)
        .counter("DPCs Queued/sec", |r, v| r.dpcs_queued = v)
        .build()
});

impl PerfRecord for PerflibProcessor {
    fn schema() -> &'static RecordSchema<Self> {
        &PROCESSOR_SCHEMA
    }
}

/// True for rollup instances such as `_Total`.
fn is_aggregate(instance: &str) -> bool {
    instance.to_lowercase().contains("_total")
}

/// Collector for per-core CPU metrics.
pub struct CpuCollector {
    cstate_seconds_total: Arc<MetricDesc>,
    time_total: Arc<MetricDesc>,
    interrupts_total: Arc<MetricDesc>,
    dpcs_total: Arc<MetricDesc>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self {
            cstate_seconds_total: MetricDesc::new(
                SUBSYSTEM,
                "cstate_seconds_total",
                "Time spent in low-power idle state",
                &["core", "state"],
                ValueKind::Gauge,
            ),
            time_total: MetricDesc::new(
                SUBSYSTEM,
                "time_total",
                "Time that processor spent in different modes (idle, user, system, ...)",
                &["core", "mode"],
                ValueKind::Gauge,
            ),
            interrupts_total: MetricDesc::new(
                SUBSYSTEM,
                "interrupts_total",
                "Total number of received and serviced hardware interrupts",
                &["core"],
                ValueKind::Counter,
            ),
            dpcs_total: MetricDesc::new(
                SUBSYSTEM,
                "dpcs_total",
                "Total number of received and serviced deferred procedure calls (DPCs)",
                &["core"],
                ValueKind::Counter,
            ),
        }
    }

    /// Registry constructor.
    pub fn factory() -> Result<Box<dyn Collector>, CollectError> {
        Ok(Box::new(Self::new()))
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn required_objects(&self) -> &'static [&'static str] {
        &["238"]
    }

    fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectError> {
        let object = ctx.object(PROCESSOR_OBJECT)?;
        let processors: Vec<PerflibProcessor> = decode(object)?;

        for data in processors.iter().filter(|p| !is_aggregate(&p.name)) {
            let core = data.name.as_str();

            for (state, value) in [
                ("c1", data.percent_c1_time),
                ("c2", data.percent_c2_time),
                ("c3", data.percent_c3_time),
            ] {
                sink.emit(&self.cstate_seconds_total, value, &[core, state])?;
            }

            for (mode, value) in [
                ("idle", data.percent_idle_time),
                ("interrupt", data.percent_interrupt_time),
                ("dpc", data.percent_dpc_time),
                ("privileged", data.percent_privileged_time),
                ("user", data.percent_user_time),
            ] {
                sink.emit(&self.time_total, value, &[core, mode])?;
            }

            sink.emit(&self.interrupts_total, data.interrupts, &[core])?;
            sink.emit(&self.dpcs_total, data.dpcs_queued, &[core])?;
        }

        Ok(())
    }
}
