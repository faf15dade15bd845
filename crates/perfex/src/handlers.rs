//! HTTP request handlers: metrics, health and the landing page.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use tracing::{debug, error};

use perfex_core::exposition;

use crate::state::{AppState, SCRAPE_TIMEOUT_HEADER};

pub(crate) async fn handle_metrics(
    State(state): AppState,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let timeout = state.timeout_for(
        headers
            .get(SCRAPE_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok()),
    );

    let result = state.scraper.scrape(timeout).await.map_err(|e| {
        error!(error = %e, "scrape failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    debug!(
        samples = result.samples.len(),
        collectors = result.outcomes.len(),
        timeout_ms = timeout.as_millis() as u64,
        "scrape completed"
    );

    let body = exposition::encode(Arc::new(result)).map_err(|e| {
        error!(error = %e, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response())
}

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

pub(crate) async fn handle_index(State(state): AppState) -> Html<String> {
    let collectors: Vec<&str> = state.scraper.collector_names().collect();
    Html(format!(
        "<html>\n<head><title>perfex</title></head>\n<body>\n\
         <h1>perfex {version}</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         <p>Enabled collectors: {collectors}</p>\n\
         </body>\n</html>\n",
        version = perfex_core::VERSION,
        path = state.metrics_path,
        collectors = collectors.join(", "),
    ))
}
