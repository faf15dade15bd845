//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;

use perfex_core::scrape::Scraper;

/// Header Prometheus sends with its own scrape timeout, in seconds.
pub(crate) const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

pub(crate) struct AppInner {
    pub(crate) scraper: Scraper,
    pub(crate) metrics_path: String,
    /// Per-collector timeout when the scraper sends no timeout header.
    pub(crate) scrape_timeout: Duration,
    /// Subtracted from the header timeout so the response makes it back in time.
    pub(crate) timeout_margin: Duration,
}

pub(crate) type SharedState = Arc<AppInner>;
pub(crate) type AppState = State<SharedState>;

impl AppInner {
    /// Collector timeout for one request, given the raw timeout header.
    pub(crate) fn timeout_for(&self, header: Option<&str>) -> Duration {
        let Some(requested) = header
            .and_then(|v| v.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| !d.is_zero())
        else {
            return self.scrape_timeout;
        };

        match requested.checked_sub(self.timeout_margin) {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => requested,
        }
    }
}
