//! Parser for the binary `PERF_DATA_BLOCK` returned by
//! `RegQueryValueEx(HKEY_PERFORMANCE_DATA, ...)`.
//!
//! Layout (all little endian, offsets relative to the start of each structure):
//!
//! ```text
//! PERF_DATA_BLOCK          "PERF" (UTF-16), header length @24, object count @28
//! └─ PERF_OBJECT_TYPE      total length @0, definition length @4, header length @8,
//!    │                     title index @12, counter count @32, instance count @40,
//!    │                     perf time @48, perf freq @56
//!    ├─ PERF_COUNTER_DEFINITION × counter count
//!    │                     byte length @0, title index @4, type @28, size @32, offset @36
//!    └─ instance count == -1:  one PERF_COUNTER_BLOCK
//!       instance count >= 0:   (PERF_INSTANCE_DEFINITION, PERF_COUNTER_BLOCK) × count
//!                          instance: byte length @0, name offset @16, name length @20
//!                          block:    byte length @0, values at definition offsets
//! ```

use tracing::debug;

use super::names::NameTable;
use super::{PerfCounter, PerfInstance, PerfObject};

const SIGNATURE: [u8; 8] = *b"P\0E\0R\0F\0";
const DATA_BLOCK_MIN_LEN: usize = 88;
const OBJECT_TYPE_MIN_LEN: usize = 64;
const COUNTER_DEFINITION_MIN_LEN: usize = 40;
const INSTANCE_DEFINITION_MIN_LEN: usize = 24;
const PERF_NO_INSTANCES: i32 = -1;

/// Error type for malformed performance data.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "perf data parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Bounds-checked little-endian reads.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], ParseError> {
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or_else(|| {
                ParseError::new(format!(
                    "read of {} bytes at offset {} past end of {}-byte buffer",
                    len,
                    offset,
                    self.buf.len()
                ))
            })
    }

    fn u32(&self, offset: usize) -> Result<u32, ParseError> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&self, offset: usize) -> Result<i32, ParseError> {
        self.u32(offset).map(|v| v as i32)
    }

    fn u64(&self, offset: usize) -> Result<u64, ParseError> {
        let b = self.bytes(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn i64(&self, offset: usize) -> Result<i64, ParseError> {
        self.u64(offset).map(|v| v as i64)
    }

    fn utf16(&self, offset: usize, len_bytes: usize) -> Result<String, ParseError> {
        let b = self.bytes(offset, len_bytes & !1)?;
        let units: Vec<u16> = b
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}

struct CounterDefinition {
    name: String,
    counter_type: u32,
    size: u32,
    offset: usize,
}

/// Parses a whole `PERF_DATA_BLOCK` into performance objects, in the order
/// they appear in the buffer.
pub fn parse(buf: &[u8], names: &NameTable) -> Result<Vec<PerfObject>, ParseError> {
    let r = Reader { buf };

    if r.bytes(0, SIGNATURE.len())? != SIGNATURE {
        return Err(ParseError::new("missing PERF signature"));
    }
    if buf.len() < DATA_BLOCK_MIN_LEN {
        return Err(ParseError::new(format!(
            "data block header truncated ({} bytes)",
            buf.len()
        )));
    }
    if r.u32(8)? != 1 {
        return Err(ParseError::new("big-endian perf data is not supported"));
    }

    let header_len = r.u32(24)? as usize;
    let num_objects = r.u32(28)? as usize;

    // Counts come from the buffer; never reserve more than it can hold.
    let mut objects = Vec::with_capacity(num_objects.min(buf.len() / OBJECT_TYPE_MIN_LEN));
    let mut offset = header_len;
    for _ in 0..num_objects {
        let (object, total_len) = parse_object(&r, offset, names)?;
        objects.push(object);
        offset = advance(offset, total_len, "object")?;
    }

    Ok(objects)
}

fn advance(offset: usize, len: usize, what: &str) -> Result<usize, ParseError> {
    if len == 0 {
        return Err(ParseError::new(format!(
            "zero-length {} at offset {}",
            what, offset
        )));
    }
    offset
        .checked_add(len)
        .ok_or_else(|| ParseError::new(format!("{} length overflows at offset {}", what, offset)))
}

fn parse_object(
    r: &Reader<'_>,
    start: usize,
    names: &NameTable,
) -> Result<(PerfObject, usize), ParseError> {
    r.bytes(start, OBJECT_TYPE_MIN_LEN)?;

    let total_len = r.u32(start)? as usize;
    let definition_len = r.u32(start + 4)? as usize;
    let header_len = r.u32(start + 8)? as usize;
    let name_index = r.u32(start + 12)?;
    let num_counters = r.u32(start + 32)? as usize;
    let num_instances = r.i32(start + 40)?;
    let perf_time = r.i64(start + 48)?;
    let perf_freq = r.i64(start + 56)?;

    let mut definitions =
        Vec::with_capacity(num_counters.min(r.buf.len() / COUNTER_DEFINITION_MIN_LEN));
    let mut offset = start + header_len;
    for _ in 0..num_counters {
        r.bytes(offset, COUNTER_DEFINITION_MIN_LEN)?;
        let byte_len = r.u32(offset)? as usize;
        definitions.push(CounterDefinition {
            name: names.name_or_index(r.u32(offset + 4)?),
            counter_type: r.u32(offset + 28)?,
            size: r.u32(offset + 32)?,
            offset: r.u32(offset + 36)? as usize,
        });
        offset = advance(offset, byte_len, "counter definition")?;
    }

    let mut object = PerfObject {
        name: names.name_or_index(name_index),
        name_index,
        frequency: u64::try_from(perf_freq).unwrap_or(0),
        perf_time,
        instances: Vec::new(),
    };

    let mut offset = start + definition_len;
    if num_instances == PERF_NO_INSTANCES {
        let (counters, _) = parse_counter_block(r, offset, &definitions)?;
        object.instances.push(PerfInstance {
            name: String::new(),
            counters,
        });
    } else {
        for _ in 0..num_instances.max(0) {
            r.bytes(offset, INSTANCE_DEFINITION_MIN_LEN)?;
            let byte_len = r.u32(offset)? as usize;
            let name_offset = r.u32(offset + 16)? as usize;
            let name_len = r.u32(offset + 20)? as usize;
            let name = r.utf16(offset + name_offset, name_len)?;

            let block_start = advance(offset, byte_len, "instance definition")?;
            let (counters, block_len) = parse_counter_block(r, block_start, &definitions)?;
            object.instances.push(PerfInstance { name, counters });
            offset = advance(block_start, block_len, "counter block")?;
        }
    }

    Ok((object, total_len))
}

fn parse_counter_block(
    r: &Reader<'_>,
    start: usize,
    definitions: &[CounterDefinition],
) -> Result<(Vec<PerfCounter>, usize), ParseError> {
    let block_len = r.u32(start)? as usize;
    let mut counters = Vec::with_capacity(definitions.len());

    for def in definitions {
        let at = start + def.offset;
        let value = match def.size {
            4 => r.u32(at)? as u64,
            8 => r.u64(at)?,
            size => {
                debug!(counter = %def.name, size, "skipping counter with unsupported size");
                continue;
            }
        };
        counters.push(PerfCounter {
            name: def.name.clone(),
            counter_type: def.counter_type,
            value,
        });
    }

    Ok((counters, block_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perflib::counter_type::CounterType;

    /// Counter definition for [`build_block`]: (title index, type, size).
    type TestCounter = (u32, u32, u32);

    struct TestObject {
        name_index: u32,
        frequency: i64,
        perf_time: i64,
        counters: Vec<TestCounter>,
        /// `None` builds a single-instance object from `single_values`.
        instances: Option<Vec<(&'static str, Vec<u64>)>>,
        single_values: Vec<u64>,
    }

    fn put_u32(buf: &mut [u8], at: usize, v: u32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u64(buf: &mut [u8], at: usize, v: u64) {
        buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    fn align8(n: usize) -> usize {
        (n + 7) & !7
    }

    fn counter_block(counters: &[TestCounter], values: &[u64]) -> Vec<u8> {
        let data: usize = counters.iter().map(|c| c.2 as usize).sum();
        let len = align8(8 + data);
        let mut block = vec![0u8; len];
        put_u32(&mut block, 0, len as u32);
        let mut at = 8;
        for (c, v) in counters.iter().zip(values) {
            match c.2 {
                4 => put_u32(&mut block, at, *v as u32),
                8 => put_u64(&mut block, at, *v),
                _ => {}
            }
            at += c.2 as usize;
        }
        block
    }

    fn object_bytes(obj: &TestObject) -> Vec<u8> {
        let definition_len = 64 + 40 * obj.counters.len();
        let mut body = Vec::new();
        let num_instances: i32 = match &obj.instances {
            None => {
                body.extend(counter_block(&obj.counters, &obj.single_values));
                PERF_NO_INSTANCES
            }
            Some(instances) => {
                for (name, values) in instances {
                    let name_units: Vec<u16> = name.encode_utf16().chain([0]).collect();
                    let name_len = name_units.len() * 2;
                    let def_len = align8(24 + name_len);
                    let mut def = vec![0u8; def_len];
                    put_u32(&mut def, 0, def_len as u32);
                    put_u32(&mut def, 16, 24);
                    put_u32(&mut def, 20, name_len as u32);
                    for (i, u) in name_units.iter().enumerate() {
                        def[24 + i * 2..26 + i * 2].copy_from_slice(&u.to_le_bytes());
                    }
                    body.extend(def);
                    body.extend(counter_block(&obj.counters, values));
                }
                instances.len() as i32
            }
        };

        let mut head = vec![0u8; definition_len];
        put_u32(&mut head, 0, (definition_len + body.len()) as u32);
        put_u32(&mut head, 4, definition_len as u32);
        put_u32(&mut head, 8, 64);
        put_u32(&mut head, 12, obj.name_index);
        put_u32(&mut head, 32, obj.counters.len() as u32);
        put_u32(&mut head, 40, num_instances as u32);
        put_u64(&mut head, 48, obj.perf_time as u64);
        put_u64(&mut head, 56, obj.frequency as u64);

        let mut offset = 8;
        for (i, (name_index, counter_type, size)) in obj.counters.iter().enumerate() {
            let at = 64 + i * 40;
            put_u32(&mut head, at, 40);
            put_u32(&mut head, at + 4, *name_index);
            put_u32(&mut head, at + 28, *counter_type);
            put_u32(&mut head, at + 32, *size);
            put_u32(&mut head, at + 36, offset);
            offset += size;
        }

        head.extend(body);
        head
    }

    /// Serializes objects into a little-endian `PERF_DATA_BLOCK`.
    fn build_block(objects: &[TestObject]) -> Vec<u8> {
        let mut buf = vec![0u8; DATA_BLOCK_MIN_LEN];
        buf[..8].copy_from_slice(&SIGNATURE);
        put_u32(&mut buf, 8, 1);
        put_u32(&mut buf, 12, 1);
        put_u32(&mut buf, 24, DATA_BLOCK_MIN_LEN as u32);
        put_u32(&mut buf, 28, objects.len() as u32);
        for obj in objects {
            buf.extend(object_bytes(obj));
        }
        let total = buf.len() as u32;
        put_u32(&mut buf, 20, total);
        buf
    }

    fn processor_names() -> NameTable {
        let mut names = NameTable::new();
        names.insert(238, "Processor");
        names.insert(2, "System");
        names.insert(148, "Interrupts/sec");
        names.insert(142, "% User Time");
        names.insert(674, "System Up Time");
        names
    }

    fn processor_object() -> TestObject {
        TestObject {
            name_index: 238,
            frequency: 10_000_000,
            perf_time: 1234,
            counters: vec![
                (148, CounterType::Counter.code(), 4),
                (142, CounterType::Timer100Ns.code(), 8),
            ],
            instances: Some(vec![
                ("0", vec![1000, 30_000_000]),
                ("1", vec![2000, 40_000_000]),
                ("_Total", vec![3000, 70_000_000]),
            ]),
            single_values: Vec::new(),
        }
    }

    #[test]
    fn test_parse_multi_instance_object() {
        let buf = build_block(&[processor_object()]);

        let objects = parse(&buf, &processor_names()).unwrap();

        assert_eq!(objects.len(), 1);
        let cpu = &objects[0];
        assert_eq!(cpu.name, "Processor");
        assert_eq!(cpu.name_index, 238);
        assert_eq!(cpu.frequency, 10_000_000);
        assert_eq!(cpu.perf_time, 1234);
        let names: Vec<&str> = cpu.instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["0", "1", "_Total"]);
        assert_eq!(
            cpu.instances[1].counters,
            vec![
                PerfCounter::new("Interrupts/sec", CounterType::Counter.code(), 2000),
                PerfCounter::new("% User Time", CounterType::Timer100Ns.code(), 40_000_000),
            ]
        );
    }

    #[test]
    fn test_parse_single_instance_object() {
        let system = TestObject {
            name_index: 2,
            frequency: 10_000_000,
            perf_time: 0,
            counters: vec![(674, CounterType::ElapsedTime.code(), 8)],
            instances: None,
            single_values: vec![133_000_000_000_000_000],
        };
        let buf = build_block(&[processor_object(), system]);

        let objects = parse(&buf, &processor_names()).unwrap();

        assert_eq!(objects.len(), 2);
        let system = &objects[1];
        assert_eq!(system.name, "System");
        assert_eq!(system.instances.len(), 1);
        assert!(system.instances[0].name.is_empty());
        assert_eq!(system.instances[0].counters[0].name, "System Up Time");
        assert_eq!(system.instances[0].counters[0].value, 133_000_000_000_000_000);
    }

    #[test]
    fn test_unknown_title_index_uses_number() {
        let buf = build_block(&[processor_object()]);

        let objects = parse(&buf, &NameTable::new()).unwrap();

        assert_eq!(objects[0].name, "238");
        assert_eq!(objects[0].instances[0].counters[0].name, "148");
    }

    #[test]
    fn test_zero_instances() {
        let mut obj = processor_object();
        obj.instances = Some(Vec::new());
        let buf = build_block(&[obj]);

        let objects = parse(&buf, &processor_names()).unwrap();

        assert!(objects[0].instances.is_empty());
    }

    #[test]
    fn test_bad_signature() {
        let mut buf = build_block(&[processor_object()]);
        buf[0] = b'X';
        let err = parse(&buf, &processor_names()).unwrap_err();
        assert!(err.message.contains("signature"));
    }

    #[test]
    fn test_truncated_buffer() {
        let buf = build_block(&[processor_object()]);
        let truncated = &buf[..buf.len() - 16];
        assert!(parse(truncated, &processor_names()).is_err());
    }

    #[test]
    fn test_oversized_object_count_is_an_error() {
        let mut buf = build_block(&[processor_object()]);
        put_u32(&mut buf, 28, u32::MAX);
        assert!(parse(&buf, &processor_names()).is_err());
    }

    #[test]
    fn test_oversized_counter_count_is_an_error() {
        let mut buf = build_block(&[processor_object()]);
        put_u32(&mut buf, DATA_BLOCK_MIN_LEN + 32, u32::MAX);
        assert!(parse(&buf, &processor_names()).is_err());
    }

    #[test]
    fn test_empty_buffer() {
        assert!(parse(&[], &processor_names()).is_err());
    }
}
