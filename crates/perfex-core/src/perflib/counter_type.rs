//! Counter-type semantics table.
//!
//! Maps the 32-bit counter-type code of a raw counter to the rule that turns
//! its raw value into a float. Most codes are plain passthrough: rates,
//! queue lengths and fractions are left for the monitoring system to derive
//! from the cumulative raw values.

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};

use tracing::warn;

/// 100ns ticks between 1601-01-01 and 1970-01-01.
pub const WINDOWS_EPOCH_OFFSET_TICKS: u64 = 116_444_736_000_000_000;

/// Seconds per 100ns tick.
pub const TICKS_TO_SECONDS: f64 = 1e-7;

/// How a raw counter value is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRule {
    /// `raw as f64`.
    Raw,
    /// Absolute 100ns timestamp since 1601 turned into seconds:
    /// `(raw - WINDOWS_EPOCH_OFFSET_TICKS) / frequency`.
    ElapsedTime,
    /// 100ns ticks to seconds: `raw * 1e-7`.
    Timer100Ns,
}

impl DecodeRule {
    pub fn apply(self, raw: u64, frequency: u64) -> f64 {
        match self {
            DecodeRule::Raw => raw as f64,
            DecodeRule::ElapsedTime => {
                if frequency == 0 {
                    return f64::NAN;
                }
                let elapsed = raw as i128 - WINDOWS_EPOCH_OFFSET_TICKS as i128;
                elapsed as f64 / frequency as f64
            }
            DecodeRule::Timer100Ns => raw as f64 * TICKS_TO_SECONDS,
        }
    }
}

macro_rules! counter_types {
    ($( $(#[$doc:meta])* $variant:ident = $code:literal => $name:literal, )+) => {
        /// Documented perflib counter types.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CounterType {
            $( $(#[$doc])* $variant, )+
        }

        impl CounterType {
            /// Every documented counter type, in ascending code order.
            pub const ALL: &'static [CounterType] = &[$( CounterType::$variant, )+];

            pub const fn code(self) -> u32 {
                match self {
                    $( CounterType::$variant => $code, )+
                }
            }

            /// The `winperf.h` constant name.
            pub const fn name(self) -> &'static str {
                match self {
                    $( CounterType::$variant => $name, )+
                }
            }

            pub const fn from_code(code: u32) -> Option<CounterType> {
                match code {
                    $( $code => Some(CounterType::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

counter_types! {
    RawcountHex = 0 => "PERF_COUNTER_RAWCOUNT_HEX",
    LargeRawcountHex = 256 => "PERF_COUNTER_LARGE_RAWCOUNT_HEX",
    Text = 2816 => "PERF_COUNTER_TEXT",
    Rawcount = 65536 => "PERF_COUNTER_RAWCOUNT",
    LargeRawcount = 65792 => "PERF_COUNTER_LARGE_RAWCOUNT",
    DoubleRaw = 73728 => "PERF_DOUBLE_RAW",
    Delta = 4195328 => "PERF_COUNTER_DELTA",
    LargeDelta = 4195584 => "PERF_COUNTER_LARGE_DELTA",
    SampleCounter = 4260864 => "PERF_SAMPLE_COUNTER",
    QueuelenType = 4523008 => "PERF_COUNTER_QUEUELEN_TYPE",
    LargeQueuelenType = 4523264 => "PERF_COUNTER_LARGE_QUEUELEN_TYPE",
    Queuelen100NsType = 5571840 => "PERF_COUNTER_100NS_QUEUELEN_TYPE",
    ObjTimeQueuelenType = 6620416 => "PERF_COUNTER_OBJ_TIME_QUEUELEN_TYPE",
    /// Per-second rate counter; the raw value is the cumulative count.
    Counter = 272696320 => "PERF_COUNTER_COUNTER",
    BulkCount = 272696576 => "PERF_COUNTER_BULK_COUNT",
    RawFraction = 537003008 => "PERF_RAW_FRACTION",
    Timer = 541132032 => "PERF_COUNTER_TIMER",
    PrecisionSystemTimer = 541525248 => "PERF_PRECISION_SYSTEM_TIMER",
    /// Cumulative busy time in 100ns ticks.
    Timer100Ns = 542180608 => "PERF_100NSEC_TIMER",
    Precision100NsTimer = 542573824 => "PERF_PRECISION_100NS_TIMER",
    ObjTimeTimer = 543229184 => "PERF_OBJ_TIME_TIMER",
    PrecisionObjectTimer = 543622400 => "PERF_PRECISION_OBJECT_TIMER",
    SampleFraction = 549585920 => "PERF_SAMPLE_FRACTION",
    TimerInv = 557909248 => "PERF_COUNTER_TIMER_INV",
    Timer100NsInv = 558957824 => "PERF_100NSEC_TIMER_INV",
    MultiTimer = 574686464 => "PERF_COUNTER_MULTI_TIMER",
    MultiTimer100Ns = 575735040 => "PERF_100NSEC_MULTI_TIMER",
    MultiTimerInv = 591463680 => "PERF_COUNTER_MULTI_TIMER_INV",
    MultiTimer100NsInv = 592512256 => "PERF_100NSEC_MULTI_TIMER_INV",
    AverageTimer = 805438464 => "PERF_AVERAGE_TIMER",
    /// Absolute start time in 100ns ticks since 1601.
    ElapsedTime = 807666944 => "PERF_ELAPSED_TIME",
    Nodata = 1073742336 => "PERF_COUNTER_NODATA",
    AverageBulk = 1073874176 => "PERF_AVERAGE_BULK",
    SampleBase = 1073939457 => "PERF_SAMPLE_BASE",
    AverageBase = 1073939458 => "PERF_AVERAGE_BASE",
    RawBase = 1073939459 => "PERF_RAW_BASE",
    PrecisionTimestamp = 1073939712 => "PERF_PRECISION_TIMESTAMP",
    LargeRawBase = 1073939715 => "PERF_LARGE_RAW_BASE",
    MultiBase = 1107494144 => "PERF_COUNTER_MULTI_BASE",
    HistogramType = 2147483648 => "PERF_COUNTER_HISTOGRAM_TYPE",
}

impl CounterType {
    pub const fn rule(self) -> DecodeRule {
        match self {
            CounterType::ElapsedTime => DecodeRule::ElapsedTime,
            CounterType::Timer100Ns | CounterType::Precision100NsTimer => DecodeRule::Timer100Ns,
            _ => DecodeRule::Raw,
        }
    }
}

/// Codes already reported as unknown, so each one is warned about once.
static UNKNOWN_CODES: LazyLock<Mutex<HashSet<u32>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Decodes one raw value according to its counter-type code.
///
/// Unknown codes are decoded as passthrough and reported once per process.
pub fn decode_value(code: u32, raw: u64, frequency: u64) -> f64 {
    match CounterType::from_code(code) {
        Some(counter_type) => counter_type.rule().apply(raw, frequency),
        None => {
            let first_seen = UNKNOWN_CODES
                .lock()
                .map(|mut seen| seen.insert(code))
                .unwrap_or(false);
            if first_seen {
                warn!(code, "unknown counter type, decoding as raw value");
            }
            DecodeRule::Raw.apply(raw, frequency)
        }
    }
}
