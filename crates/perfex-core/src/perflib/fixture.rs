//! Snapshot source backed by recorded or synthetic objects.
//!
//! Used by tests, by `--fixture` runs, and as the default source on hosts
//! without `HKEY_PERFORMANCE_DATA`. Fixture files are JSON arrays of
//! [`PerfObject`]s:
//!
//! ```json
//! [{"name": "Processor", "name_index": 238, "frequency": 10000000,
//!   "instances": [{"name": "0", "counters": [
//!     {"name": "% Idle Time", "counter_type": 558957824, "value": 9000}]}]}]
//! ```

use std::path::Path;

use super::counter_type::CounterType;
use super::query::{PerfQuery, QueryError};
use super::{PerfInstance, PerfObject};

/// Title index of the `Processor` object.
pub const PROCESSOR_INDEX: u32 = 238;
/// Title index of the `System` object.
pub const SYSTEM_INDEX: u32 = 2;

/// Serves a fixed set of objects.
#[derive(Debug, Clone, Default)]
pub struct FixtureQuery {
    objects: Vec<PerfObject>,
}

impl FixtureQuery {
    pub fn new(objects: Vec<PerfObject>) -> Self {
        Self { objects }
    }

    /// Loads a JSON fixture file.
    pub fn from_path(path: &Path) -> Result<Self, QueryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, QueryError> {
        let objects: Vec<PerfObject> =
            serde_json::from_str(content).map_err(|e| QueryError::Fixture(e.to_string()))?;
        Ok(Self::new(objects))
    }

    pub fn objects(&self) -> &[PerfObject] {
        &self.objects
    }

    /// A four-core machine: `Processor` with cores 0-3 plus `_Total`, and
    /// `System`.
    pub fn typical_system() -> Self {
        let mut processor = PerfObject::new("Processor", PROCESSOR_INDEX, 10_000_000);
        processor.perf_time = 133_500_000_000_000_000;
        for core in 0..4u64 {
            processor
                .instances
                .push(processor_instance(&core.to_string(), 1 + core));
        }
        processor.instances.push(processor_instance("_Total", 10));

        let system = PerfObject::new("System", SYSTEM_INDEX, 10_000_000).with_instance(
            PerfInstance::new("")
                .with_counter("Processes", CounterType::Rawcount.code(), 212)
                .with_counter("Threads", CounterType::Rawcount.code(), 2875)
                .with_counter(
                    "System Up Time",
                    CounterType::ElapsedTime.code(),
                    133_499_000_000_000_000,
                ),
        );

        Self::new(vec![processor, system])
    }
}

/// One `Processor` instance with counter types as Windows reports them.
/// `scale` multiplies every value so cores differ.
fn processor_instance(name: &str, scale: u64) -> PerfInstance {
    let timer = CounterType::Timer100Ns.code();
    PerfInstance::new(name)
        .with_counter("% Processor Time", CounterType::Timer100NsInv.code(), 3_000_000_000 * scale)
        .with_counter("% User Time", timer, 2_000_000_000 * scale)
        .with_counter("% Privileged Time", timer, 900_000_000 * scale)
        .with_counter("% Interrupt Time", timer, 50_000_000 * scale)
        .with_counter("% DPC Time", timer, 40_000_000 * scale)
        .with_counter("% Idle Time", CounterType::Timer100NsInv.code(), 7_000_000_000 * scale)
        .with_counter("% C1 Time", timer, 6_000_000_000 * scale)
        .with_counter("% C2 Time", timer, 500_000_000 * scale)
        .with_counter("% C3 Time", timer, 100_000_000 * scale)
        .with_counter("Interrupts/sec", CounterType::Counter.code(), 150_000 * scale)
        .with_counter("DPCs Queued/sec", CounterType::Counter.code(), 8_000 * scale)
        .with_counter("DPC Rate", CounterType::Rawcount.code(), 2)
        .with_counter("C1 Transitions/sec", CounterType::LargeDelta.code(), 90_000 * scale)
        .with_counter("C2 Transitions/sec", CounterType::LargeDelta.code(), 4_000 * scale)
        .with_counter("C3 Transitions/sec", CounterType::LargeDelta.code(), 300 * scale)
}

impl PerfQuery for FixtureQuery {
    /// Returns the objects whose title index (or name) is requested, in
    /// fixture order.
    fn query(&self, object_ids: &[String]) -> Result<Vec<PerfObject>, QueryError> {
        Ok(self
            .objects
            .iter()
            .filter(|o| {
                object_ids
                    .iter()
                    .any(|id| *id == o.name_index.to_string() || *id == o.name)
            })
            .cloned()
            .collect())
    }
}
