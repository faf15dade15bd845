mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use perfex_core::collector::CollectorRegistry;
use perfex_core::perflib::{FixtureQuery, PerfQuery, QueryError};
use perfex_core::scrape::Scraper;

use state::{AppInner, SharedState};

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "perfex",
    about = "Windows performance counter exporter",
    version = perfex_core::VERSION
)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:9182", env = "PERFEX_LISTEN")]
    listen: String,

    /// Path under which metrics are exposed.
    #[arg(long, default_value = "/metrics", env = "PERFEX_METRICS_PATH")]
    metrics_path: String,

    /// Comma-separated list of collectors to enable.
    #[arg(
        long,
        default_value = "cpu",
        env = "PERFEX_COLLECTORS",
        value_delimiter = ','
    )]
    collectors: Vec<String>,

    /// Print the available collectors and exit.
    #[arg(long)]
    list_collectors: bool,

    /// Per-collector timeout in seconds, used when the scraper sends no
    /// X-Prometheus-Scrape-Timeout-Seconds header.
    #[arg(long, default_value = "10", env = "PERFEX_SCRAPE_TIMEOUT")]
    scrape_timeout: f64,

    /// Seconds subtracted from the scraper's timeout header.
    #[arg(long, default_value = "0.5", env = "PERFEX_TIMEOUT_MARGIN")]
    timeout_margin: f64,

    /// Serve performance objects from a JSON fixture instead of the OS.
    #[arg(long, value_name = "PATH", env = "PERFEX_FIXTURE")]
    fixture: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let registry = match CollectorRegistry::builtin() {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "failed to build collector registry");
            process::exit(1);
        }
    };

    if args.list_collectors {
        for name in registry.names() {
            println!("{}", name);
        }
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args, registry));
}

async fn async_main(args: Args, registry: CollectorRegistry) {
    info!(version = perfex_core::VERSION, target = perfex_core::BUILD_TARGET, "starting");

    let scrape_timeout = seconds_arg("--scrape-timeout", args.scrape_timeout);
    let timeout_margin = seconds_arg("--timeout-margin", args.timeout_margin);
    if !args.metrics_path.starts_with('/') {
        error!(metrics_path = %args.metrics_path, "metrics path must start with '/'");
        process::exit(1);
    }

    let collectors = match registry.instantiate(&args.collectors) {
        Ok(collectors) => collectors,
        Err(e) => {
            error!(error = %e, "failed to enable collectors");
            process::exit(1);
        }
    };

    let query = match create_query(&args) {
        Ok(query) => query,
        Err(e) => {
            error!(error = %e, "failed to open performance data source");
            process::exit(1);
        }
    };

    let scraper = Scraper::new(query, collectors);
    info!(
        collectors = ?scraper.collector_names().collect::<Vec<_>>(),
        objects = ?scraper.object_ids(),
        "collectors enabled"
    );

    let state: SharedState = Arc::new(AppInner {
        scraper,
        metrics_path: args.metrics_path.clone(),
        scrape_timeout,
        timeout_margin,
    });

    let app = router(state);

    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, metrics_path = %args.metrics_path, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("shut down");
}

fn router(state: SharedState) -> Router {
    let metrics_path = state.metrics_path.clone();
    let mut app = Router::new().route(&metrics_path, get(handlers::handle_metrics));
    if metrics_path != "/" {
        app = app.route("/", get(handlers::handle_index));
    }
    if metrics_path != "/health" {
        app = app.route("/health", get(handlers::handle_health));
    }
    app
        .with_state(state)
        .layer(CompressionLayer::new())
}

/// Fixture file if given, otherwise the OS registry. Hosts without
/// `HKEY_PERFORMANCE_DATA` fall back to a synthetic four-core machine.
fn create_query(args: &Args) -> Result<Arc<dyn PerfQuery>, QueryError> {
    if let Some(ref path) = args.fixture {
        info!(path = %path.display(), "serving performance data from fixture");
        return Ok(Arc::new(FixtureQuery::from_path(path)?));
    }

    #[cfg(windows)]
    {
        Ok(Arc::new(perfex_core::perflib::RegistryQuery::new()?))
    }

    #[cfg(not(windows))]
    {
        tracing::warn!("no HKEY_PERFORMANCE_DATA on this platform, serving a synthetic snapshot");
        Ok(Arc::new(FixtureQuery::typical_system()))
    }
}

fn seconds_arg(flag: &str, secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) => duration,
        Err(e) => {
            error!(flag, value = secs, error = %e, "invalid duration");
            process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["perfex", "perfex_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
