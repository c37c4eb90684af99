//! Application entry point for the `sensor-chart-sync` job.
//!
//! One invocation performs one sync run:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Running the fetch → filter → merge → persist pipeline
//! - Refreshing the bundled sensor file loader with the new document
//! - Remembering the device token for later runs
//!
//! # Environment Variables
//! - `DATABOOM_API_KEY` (**required**) – bearer token for the API
//! - `DEVICE_TOKEN` (optional) – device to keep (default: remembered token)
//! - `SYNC_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SYNC_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the full list. Ctrl-C cancels the run before anything
//! is written.
use std::{env, sync::Arc};

use anyhow::Result;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensor_chart_sync::{config, Pipeline, ReqwestTransport, SensorFileLoader};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let loader = Arc::new(SensorFileLoader::new(cfg.output_key.clone()));
    let pipeline = Pipeline::new(cfg, Arc::new(ReqwestTransport::with_client(client)))
        .with_simulation(loader);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling sync");
                cancel.cancel();
            }
        }
    });

    let report = pipeline.run_with_cancel(&cancel).await.map_err(|e| {
        tracing::error!("Sync aborted: {}", e);
        e
    })?;

    tracing::info!(
        "Wrote {} sensors to {}",
        report.sensors.len(),
        report.output_path.display()
    );

    let cfg = pipeline.config();
    if !cfg.device_token.is_empty() {
        config::remember_device_token(&cfg.data_dir, &cfg.device_token)?;
    }

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SYNC_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `SYNC_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("SYNC_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SYNC_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SYNC_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},reqwest=warn,hyper=warn,hyper_util=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
