//! One scrape cycle: query the snapshot, fan it out to the collectors, merge.
//!
//! ```text
//!   object_ids() ──► spawn_blocking(PerfQuery::query) ──► Arc<ScrapeContext>
//!                                                            │
//!            ┌───────────────────────┬───────────────────────┤
//!   spawn_blocking(cpu)   spawn_blocking(...)   spawn_blocking(...)
//!            │                       │                       │
//!            └────── timeout_at(deadline) per handle ────────┘
//!                                    │
//!                              ScrapeResult
//! ```
//!
//! Every collector starts at once and shares one deadline, so awaiting the
//! handles in order bounds the whole fan-out by the per-collector timeout.
//! A collector that misses the deadline is detached: its thread runs to
//! completion but its samples are dropped with the handle. Results are
//! stamped with their finish time, so one that completes after the deadline
//! counts as a timeout even if the orchestrator only polls it later.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::collector::{CollectError, Collector, MetricSink, Sample, ScrapeContext};
use crate::perflib::{PerfQuery, QueryError};

/// Error type for a scrape that produced no result at all.
#[derive(Debug)]
pub enum ScrapeError {
    /// The snapshot query failed.
    Query(QueryError),
    /// The query task was cancelled or panicked.
    Interrupted(String),
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::Query(e) => write!(f, "perflib query failed: {}", e),
            ScrapeError::Interrupted(msg) => write!(f, "perflib query interrupted: {}", msg),
        }
    }
}

impl std::error::Error for ScrapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScrapeError::Query(e) => Some(e),
            ScrapeError::Interrupted(_) => None,
        }
    }
}

impl From<QueryError> for ScrapeError {
    fn from(e: QueryError) -> Self {
        ScrapeError::Query(e)
    }
}

/// How one collector ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorStatus {
    Success,
    Failed(CollectError),
    Timeout,
}

impl CollectorStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CollectorStatus::Success)
    }
}

/// Ledger entry for one scheduled collector.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorOutcome {
    pub name: &'static str,
    pub duration: Duration,
    pub status: CollectorStatus,
}

/// Everything one scrape produced.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub collected_at: DateTime<Utc>,
    /// Time spent in the snapshot query.
    pub snapshot_duration: Duration,
    /// Samples of successful collectors, grouped by collector in
    /// scheduling order.
    pub samples: Vec<Sample>,
    /// One entry per scheduled collector, in scheduling order.
    pub outcomes: Vec<CollectorOutcome>,
}

impl ScrapeResult {
    pub fn outcome(&self, name: &str) -> Option<&CollectorOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// Runs scrapes for a fixed set of collectors against one query source.
pub struct Scraper {
    query: Arc<dyn PerfQuery>,
    collectors: Vec<Arc<dyn Collector>>,
}

impl Scraper {
    pub fn new(query: Arc<dyn PerfQuery>, collectors: Vec<Arc<dyn Collector>>) -> Self {
        Self { query, collectors }
    }

    pub fn collector_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.collectors.iter().map(|c| c.name())
    }

    /// Union of the collectors' required object ids, first-seen order.
    pub fn object_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.collectors.iter().flat_map(|c| c.required_objects()) {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }

    /// Queries one snapshot and runs every collector against it, each
    /// bounded by `timeout`.
    ///
    /// Only a failed query fails the scrape. Collector errors, panics and
    /// timeouts end up in [`ScrapeResult::outcomes`].
    pub async fn scrape(&self, timeout: Duration) -> Result<ScrapeResult, ScrapeError> {
        let collected_at = Utc::now();
        let ids = self.object_ids();

        let t0 = Instant::now();
        let objects = if ids.is_empty() {
            Vec::new()
        } else {
            let query = Arc::clone(&self.query);
            tokio::task::spawn_blocking(move || query.query(&ids))
                .await
                .map_err(|e| ScrapeError::Interrupted(e.to_string()))??
        };
        let snapshot_duration = t0.elapsed();
        debug!(
            duration_ms = snapshot_duration.as_millis() as u64,
            objects = objects.len(),
            "perflib snapshot acquired"
        );

        let ctx = Arc::new(ScrapeContext::new(objects));
        let scheduled = Instant::now();
        let deadline = scheduled + timeout;

        let handles: Vec<_> = self
            .collectors
            .iter()
            .map(|collector| {
                let collector = Arc::clone(collector);
                let ctx = Arc::clone(&ctx);
                tokio::task::spawn_blocking(move || {
                    let start = Instant::now();
                    let mut sink = MetricSink::new();
                    let result = collector.collect(&ctx, &mut sink);
                    let finished = Instant::now();
                    (finished, finished - start, result.map(|()| sink.into_samples()))
                })
            })
            .collect();

        let mut samples = Vec::new();
        let mut outcomes = Vec::with_capacity(self.collectors.len());

        for (collector, handle) in self.collectors.iter().zip(handles) {
            let name = collector.name();
            let waited = tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), handle);
            let (duration, status) = match waited.await {
                Ok(Ok((finished, _, _))) if finished > deadline => {
                    (finished - scheduled, CollectorStatus::Timeout)
                }
                Ok(Ok((_, duration, Ok(collected)))) => {
                    debug!(
                        collector = name,
                        duration_ms = duration.as_millis() as u64,
                        samples = collected.len(),
                        "collector succeeded"
                    );
                    samples.extend(collected);
                    (duration, CollectorStatus::Success)
                }
                Ok(Ok((_, duration, Err(e)))) => (duration, CollectorStatus::Failed(e)),
                Ok(Err(join_error)) => (
                    scheduled.elapsed(),
                    CollectorStatus::Failed(CollectError::Panicked(panic_message(join_error))),
                ),
                Err(_) => (scheduled.elapsed(), CollectorStatus::Timeout),
            };

            match &status {
                CollectorStatus::Success => {}
                CollectorStatus::Failed(e) => warn!(
                    collector = name,
                    duration_ms = duration.as_millis() as u64,
                    error = %e,
                    "collector failed"
                ),
                CollectorStatus::Timeout => warn!(
                    collector = name,
                    timeout_ms = timeout.as_millis() as u64,
                    "collector timed out"
                ),
            }

            outcomes.push(CollectorOutcome {
                name,
                duration,
                status,
            });
        }

        Ok(ScrapeResult {
            collected_at,
            snapshot_duration,
            samples,
            outcomes,
        })
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => {
            if let Some(msg) = payload.downcast_ref::<&str>() {
                msg.to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "non-string panic payload".to_string()
            }
        }
        Err(error) => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CpuCollector, MetricDesc, ValueKind};
    use crate::perflib::{FixtureQuery, PerfObject};
    use std::sync::Mutex;
    use std::sync::mpsc;

    /// Emits one gauge, or fails with `MissingObject` if `object` is absent.
    struct Needs {
        name: &'static str,
        ids: &'static [&'static str],
        object: &'static str,
    }

    impl Collector for Needs {
        fn name(&self) -> &'static str {
            self.name
        }

        fn required_objects(&self) -> &'static [&'static str] {
            self.ids
        }

        fn collect(&self, ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectError> {
            let object = ctx.object(self.object)?;
            let desc =
                MetricDesc::new("test", "instances", "Instance count", &[], ValueKind::Gauge);
            sink.emit(&desc, object.instances.len() as f64, &[])
        }
    }

    /// Blocks until the test drops the sender.
    struct Stuck {
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Collector for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn required_objects(&self) -> &'static [&'static str] {
            &[]
        }

        fn collect(&self, _ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectError> {
            let desc = MetricDesc::new("test", "partial", "Partial output", &[], ValueKind::Gauge);
            sink.emit(&desc, 1.0, &[])?;
            let _ = self.release.lock().unwrap().recv();
            Ok(())
        }
    }

    /// Sleeps on its blocking thread, then emits one gauge.
    struct Slow {
        delay: Duration,
    }

    impl Collector for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn required_objects(&self) -> &'static [&'static str] {
            &[]
        }

        fn collect(&self, _ctx: &ScrapeContext, sink: &mut MetricSink) -> Result<(), CollectError> {
            std::thread::sleep(self.delay);
            let desc = MetricDesc::new("test", "late", "Late output", &[], ValueKind::Gauge);
            sink.emit(&desc, 1.0, &[])
        }
    }

    struct Panics;

    impl Collector for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn required_objects(&self) -> &'static [&'static str] {
            &[]
        }

        fn collect(
            &self,
            _ctx: &ScrapeContext,
            _sink: &mut MetricSink,
        ) -> Result<(), CollectError> {
            panic!("counter table corrupted");
        }
    }

    /// Records every id list it is asked for.
    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl PerfQuery for Recording {
        fn query(&self, object_ids: &[String]) -> Result<Vec<PerfObject>, QueryError> {
            self.calls.lock().unwrap().push(object_ids.to_vec());
            if self.fail {
                return Err(QueryError::Os {
                    code: 5,
                    context: "RegQueryValueExW".to_string(),
                });
            }
            Ok(vec![PerfObject::new("Processor", 238, 1)])
        }
    }

    fn fixture() -> Arc<dyn PerfQuery> {
        Arc::new(FixtureQuery::typical_system())
    }

    #[tokio::test]
    async fn test_cpu_scrape_from_fixture() {
        let scraper = Scraper::new(fixture(), vec![Arc::new(CpuCollector::new())]);

        let result = scraper.scrape(Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.samples.len(), 40);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcome("cpu").unwrap().status, CollectorStatus::Success);
    }

    #[tokio::test]
    async fn test_missing_object_isolated() {
        let scraper = Scraper::new(
            fixture(),
            vec![
                Arc::new(Needs {
                    name: "memory",
                    ids: &["4"],
                    object: "Memory",
                }),
                Arc::new(CpuCollector::new()),
            ],
        );

        let result = scraper.scrape(Duration::from_secs(5)).await.unwrap();

        assert_eq!(
            result.outcome("memory").unwrap().status,
            CollectorStatus::Failed(CollectError::MissingObject("Memory".to_string()))
        );
        assert!(result.outcome("cpu").unwrap().status.is_success());
        assert_eq!(result.samples.len(), 40);
        assert!(result.samples.iter().all(|s| s.desc.name.starts_with("windows_cpu_")));
    }

    #[tokio::test]
    async fn test_timeout_isolated_and_discarded() {
        let (release, rx) = mpsc::channel();
        let scraper = Scraper::new(
            fixture(),
            vec![
                Arc::new(Stuck {
                    release: Mutex::new(rx),
                }),
                Arc::new(CpuCollector::new()),
            ],
        );

        let result = scraper.scrape(Duration::from_millis(200)).await.unwrap();

        let stuck = result.outcome("stuck").unwrap();
        assert_eq!(stuck.status, CollectorStatus::Timeout);
        assert!(stuck.duration >= Duration::from_millis(200));
        assert!(result.outcome("cpu").unwrap().status.is_success());
        assert_eq!(result.samples.len(), 40);
        assert!(
            result
                .samples
                .iter()
                .all(|s| s.desc.name != "windows_test_partial")
        );

        drop(release);
    }

    #[tokio::test]
    async fn test_result_finished_after_deadline_is_discarded() {
        // Hold the runtime thread across the deadline so the handle is only
        // polled after the collector has already finished late.
        let busy = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::thread::sleep(Duration::from_millis(200));
        });
        let scraper = Scraper::new(
            fixture(),
            vec![Arc::new(Slow {
                delay: Duration::from_millis(250),
            })],
        );

        let result = scraper.scrape(Duration::from_millis(200)).await.unwrap();

        let slow = result.outcome("slow").unwrap();
        assert_eq!(slow.status, CollectorStatus::Timeout);
        assert!(slow.duration >= Duration::from_millis(200));
        assert!(result.samples.is_empty());
        busy.await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_isolated() {
        let scraper = Scraper::new(
            fixture(),
            vec![Arc::new(Panics), Arc::new(CpuCollector::new())],
        );

        let result = scraper.scrape(Duration::from_secs(5)).await.unwrap();

        match &result.outcome("panics").unwrap().status {
            CollectorStatus::Failed(CollectError::Panicked(msg)) => {
                assert!(msg.contains("counter table corrupted"))
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert!(result.outcome("cpu").unwrap().status.is_success());
    }

    #[tokio::test]
    async fn test_query_failure_is_fatal() {
        let query = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let scraper = Scraper::new(query, vec![Arc::new(CpuCollector::new())]);

        let err = scraper.scrape(Duration::from_secs(5)).await.unwrap_err();

        assert!(matches!(err, ScrapeError::Query(QueryError::Os { code: 5, .. })));
    }

    #[tokio::test]
    async fn test_single_batched_query() {
        let query = Arc::new(Recording::default());
        let scraper = Scraper::new(
            query.clone(),
            vec![
                Arc::new(CpuCollector::new()),
                Arc::new(Needs {
                    name: "system",
                    ids: &["2", "238"],
                    object: "Processor",
                }),
            ],
        );

        let result = scraper.scrape(Duration::from_secs(5)).await.unwrap();

        assert_eq!(
            *query.calls.lock().unwrap(),
            vec![vec!["238".to_string(), "2".to_string()]]
        );
        assert!(result.outcome("system").unwrap().status.is_success());
    }

    #[tokio::test]
    async fn test_no_ids_skips_query() {
        let query = Arc::new(Recording::default());
        let scraper = Scraper::new(query.clone(), vec![Arc::new(Panics)]);

        let result = scraper.scrape(Duration::from_secs(5)).await.unwrap();

        assert!(query.calls.lock().unwrap().is_empty());
        assert_eq!(result.outcomes.len(), 1);
        assert!(result.samples.is_empty());
    }

    #[test]
    fn test_object_ids_dedup() {
        let scraper = Scraper::new(
            fixture(),
            vec![
                Arc::new(CpuCollector::new()),
                Arc::new(CpuCollector::new()),
            ],
        );
        assert_eq!(scraper.object_ids(), ["238"]);
        assert_eq!(scraper.collector_names().collect::<Vec<_>>(), ["cpu", "cpu"]);
    }
}
