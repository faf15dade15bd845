//! Decoding raw performance objects into typed records.
//!
//! A record type describes itself once through a [`RecordSchema`]: which raw
//! counter each field binds to and which field receives the instance name.
//! Decoding an object is then a straight lookup-and-assign per instance.
//!
//! ```
//! use std::sync::LazyLock;
//! use perfex_core::perflib::{PerfRecord, RecordSchema};
//!
//! #[derive(Default)]
//! struct Disk {
//!     name: String,
//!     queue_length: f64,
//! }
//!
//! static DISK_SCHEMA: LazyLock<RecordSchema<Disk>> = LazyLock::new(|| {
//!     RecordSchema::<Disk>::builder("Disk")
//!         .instance_name(|r, name| r.name = name)
//!         .counter("Current Disk Queue Length", |r, v| r.queue_length = v)
//!         .build()
//! });
//!
//! impl PerfRecord for Disk {
//!     fn schema() -> &'static RecordSchema<Self> {
//!         &DISK_SCHEMA
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};

use super::counter_type::decode_value;
use super::{PerfCounter, PerfObject};

/// Error type for decode failures.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// A bound counter is absent from an instance. The object does not match
    /// the record layout, so no records are produced.
    MissingCounter {
        object: String,
        instance: String,
        counter: String,
    },
    /// The record schema itself is malformed.
    InvalidShape { record: String, reason: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MissingCounter {
                object,
                instance,
                counter,
            } => write!(
                f,
                "could not find counter {:?} on instance {:?} of object {:?}",
                counter, instance, object
            ),
            DecodeError::InvalidShape { record, reason } => {
                write!(f, "invalid record shape {}: {}", record, reason)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

type CounterSetter<R> = fn(&mut R, f64);
type NameSetter<R> = fn(&mut R, String);

struct FieldBinding<R> {
    counter: &'static str,
    set: CounterSetter<R>,
}

/// Field bindings of one record type, built once and reused for every decode.
pub struct RecordSchema<R> {
    record: &'static str,
    fields: Vec<FieldBinding<R>>,
    name_field: Option<NameSetter<R>>,
    invalid: Option<String>,
}

impl<R> RecordSchema<R> {
    pub fn builder(record: &'static str) -> RecordSchemaBuilder<R> {
        RecordSchemaBuilder {
            record,
            fields: Vec::new(),
            name_fields: Vec::new(),
        }
    }

    /// Name of the record type, for error messages.
    pub fn record(&self) -> &'static str {
        self.record
    }

    /// Counter names bound by this schema, in declaration order.
    pub fn counters(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.counter)
    }

    /// Returns the reason the schema is unusable, if any.
    pub fn validate(&self) -> Result<(), DecodeError> {
        match &self.invalid {
            Some(reason) => Err(DecodeError::InvalidShape {
                record: self.record.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

pub struct RecordSchemaBuilder<R> {
    record: &'static str,
    fields: Vec<FieldBinding<R>>,
    name_fields: Vec<NameSetter<R>>,
}

impl<R> RecordSchemaBuilder<R> {
    /// Binds a field to the raw counter named `counter`.
    pub fn counter(mut self, counter: &'static str, set: CounterSetter<R>) -> Self {
        self.fields.push(FieldBinding { counter, set });
        self
    }

    /// Binds a field to the instance name.
    pub fn instance_name(mut self, set: NameSetter<R>) -> Self {
        self.name_fields.push(set);
        self
    }

    /// Finishes the schema. Shape errors are kept and reported by every
    /// decode that uses the schema.
    pub fn build(self) -> RecordSchema<R> {
        let invalid = shape_error(&self.fields, self.name_fields.len());
        RecordSchema {
            record: self.record,
            fields: self.fields,
            name_field: self.name_fields.into_iter().next(),
            invalid,
        }
    }
}

fn shape_error<R>(fields: &[FieldBinding<R>], name_fields: usize) -> Option<String> {
    if name_fields > 1 {
        return Some(format!("{} fields bind the instance name", name_fields));
    }
    let mut seen = HashSet::new();
    for field in fields {
        if field.counter.is_empty() {
            return Some("field bound to an empty counter name".to_string());
        }
        if !seen.insert(field.counter) {
            return Some(format!("counter {:?} bound more than once", field.counter));
        }
    }
    None
}

/// A record type that can be decoded from a performance object instance.
pub trait PerfRecord: Default + Sized + 'static {
    fn schema() -> &'static RecordSchema<Self>;
}

/// Decodes every instance of `object` into an `R`, preserving instance order.
pub fn decode<R: PerfRecord>(object: &PerfObject) -> Result<Vec<R>, DecodeError> {
    decode_with(object, R::schema())
}

/// Decodes with an explicit schema.
///
/// Fails without producing any record if the schema is malformed or any
/// instance lacks a bound counter.
pub fn decode_with<R: Default>(
    object: &PerfObject,
    schema: &RecordSchema<R>,
) -> Result<Vec<R>, DecodeError> {
    schema.validate()?;

    let mut records = Vec::with_capacity(object.instances.len());
    for instance in &object.instances {
        let counters: HashMap<&str, &PerfCounter> = instance
            .counters
            .iter()
            .map(|c| (c.name.as_str(), c))
            .collect();

        let mut record = R::default();
        for field in &schema.fields {
            let counter =
                counters
                    .get(field.counter)
                    .ok_or_else(|| DecodeError::MissingCounter {
                        object: object.name.clone(),
                        instance: instance.name.clone(),
                        counter: field.counter.to_string(),
                    })?;
            let value = decode_value(counter.counter_type, counter.value, object.frequency);
            (field.set)(&mut record, value);
        }

        if let Some(set_name) = schema.name_field
            && !instance.name.is_empty()
        {
            set_name(&mut record, instance.name.clone());
        }

        records.push(record);
    }

    Ok(records)
}
