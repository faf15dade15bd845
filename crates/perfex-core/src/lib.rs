//! perfex-core: performance-counter decoding and scrape orchestration.
//!
//! Provides:
//! - `perflib`: raw performance objects, counter-type semantics, the record
//!   decoder, the binary `PERF_DATA_BLOCK` parser and snapshot query sources
//! - `collector`: the collector contract, scrape context, registry and the
//!   built-in collectors
//! - `scrape`: per-scrape orchestration with per-collector timeouts
//! - `exposition`: Prometheus text encoding of a scrape result

pub mod collector;
pub mod exposition;
pub mod perflib;
pub mod scrape;

/// Crate version with the short git SHA of the build.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("PERFEX_GIT_SHA"), ")");

/// Target triple the crate was built for.
pub const BUILD_TARGET: &str = env!("PERFEX_TARGET");
