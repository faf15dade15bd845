//! Raw performance-counter objects and their decoding.
//!
//! A performance object is what the OS hands back for one counter set
//! (e.g. `Processor`): an ordered list of instances, each carrying named raw
//! counters tagged with a counter-type code.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          PerfQuery                           │
//! │   RegistryQuery (Windows)        FixtureQuery (file/mock)    │
//! │          │                                │                  │
//! │   PERF_DATA_BLOCK bytes ──► binary::parse ┘                  │
//! │          (names resolved through NameTable)                  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ Vec<PerfObject>
//!                         ┌──────▼──────┐
//!                         │   decode    │ ◄── counter_type (rules)
//!                         └──────┬──────┘
//!                                │ Vec<R: PerfRecord>
//!                           collectors
//! ```

pub mod binary;
pub mod counter_type;
pub mod decode;
pub mod fixture;
pub mod names;
pub mod query;

use serde::{Deserialize, Serialize};

pub use counter_type::{CounterType, DecodeRule, decode_value};
pub use decode::{DecodeError, PerfRecord, RecordSchema, decode, decode_with};
pub use fixture::FixtureQuery;
pub use names::NameTable;
pub use query::{PerfQuery, QueryError};

#[cfg(windows)]
pub use query::RegistryQuery;

/// One raw counter of an instance.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PerfCounter {
    /// Counter name as resolved from the name table (e.g. `% Idle Time`).
    pub name: String,
    /// Counter-type code; selects the decode rule.
    pub counter_type: u32,
    /// Raw value. 32-bit counters are zero-extended.
    pub value: u64,
}

impl PerfCounter {
    pub fn new(name: impl Into<String>, counter_type: u32, value: u64) -> Self {
        Self {
            name: name.into(),
            counter_type,
            value,
        }
    }
}

/// One named sub-entity of an object, e.g. a CPU core.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PerfInstance {
    /// Instance name; empty for single-instance objects.
    #[serde(default)]
    pub name: String,
    pub counters: Vec<PerfCounter>,
}

impl PerfInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counters: Vec::new(),
        }
    }

    /// Appends a counter, builder style.
    pub fn with_counter(mut self, name: impl Into<String>, counter_type: u32, value: u64) -> Self {
        self.counters.push(PerfCounter::new(name, counter_type, value));
        self
    }
}

/// A raw performance object as returned by one query.
///
/// Immutable once obtained; instance order is the order the OS reported.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct PerfObject {
    /// Object name (e.g. `Processor`).
    pub name: String,
    /// Perflib title index the object was queried by (e.g. 238).
    #[serde(default)]
    pub name_index: u32,
    /// Ticks per second of the object's clock.
    #[serde(default)]
    pub frequency: u64,
    /// Object clock value at collection time, in `frequency` ticks.
    #[serde(default)]
    pub perf_time: i64,
    pub instances: Vec<PerfInstance>,
}

impl PerfObject {
    pub fn new(name: impl Into<String>, name_index: u32, frequency: u64) -> Self {
        Self {
            name: name.into(),
            name_index,
            frequency,
            perf_time: 0,
            instances: Vec::new(),
        }
    }

    /// Appends an instance, builder style.
    pub fn with_instance(mut self, instance: PerfInstance) -> Self {
        self.instances.push(instance);
        self
    }
}
