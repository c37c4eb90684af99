//! Fetch → filter → chart → merge → persist → notify.
//!
//! One run is a single async task with two awaited network calls in fixed
//! order. Any failure before the write leaves no file behind. Missing chart
//! data for a sensor is logged and the sensor keeps its previous value.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{self, CodecError};
use crate::fetch::{self, HttpTransport, TransportError};
use crate::json::{self, Value};
use crate::simulation::SimulationRefresh;
use crate::{ChartRequest, Config, SensorDescriptor};

// ---

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("catalog fetch failed: {0}")]
    Catalog(#[source] TransportError),

    #[error("catalog could not be decoded: {0}")]
    CatalogDecode(#[source] CodecError),

    #[error("catalog is empty")]
    EmptyCatalog,

    #[error("chart request could not be encoded: {0}")]
    ChartEncode(#[source] serde_json::Error),

    #[error("chart fetch failed: {0}")]
    Chart(#[source] TransportError),

    #[error("chart response is empty")]
    EmptyChart,

    #[error("chart response is not a JSON object")]
    ChartParse,

    #[error("sensor document could not be encoded: {0}")]
    DocumentEncode(#[source] CodecError),

    #[error("failed to write {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run cancelled")]
    Cancelled,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub output_path: PathBuf,
    /// Filtered sensors as written, catalog order.
    pub sensors: Vec<SensorDescriptor>,
    /// Sensors that received a chart value.
    pub merged: usize,
    /// Sensors left at their previous value.
    pub unmatched: usize,
}

/// Counts produced by [`merge_chart_readings`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub merged: usize,
    pub unmatched: usize,
}

/// Why a sensor got no value from the chart response.
#[derive(Error, Debug, PartialEq)]
enum MissingReading {
    #[error("no chart series for this signal")]
    NoSeries,
    #[error("chart series is empty or not an array")]
    EmptySeries,
    #[error("first reading has no \"value\" field or it is null")]
    NoValue,
    #[error("reading value {0} is not a number")]
    NotANumber(String),
}

pub struct Pipeline {
    config: Config,
    transport: Arc<dyn HttpTransport>,
    simulation: Option<Arc<dyn SimulationRefresh>>,
}

impl Pipeline {
    pub fn new(config: Config, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
            transport,
            simulation: None,
        }
    }

    /// Attach the consumer refreshed after each successful write.
    pub fn with_simulation(mut self, simulation: Arc<dyn SimulationRefresh>) -> Self {
        self.simulation = Some(simulation);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run to completion or first failure.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        self.run_with_cancel(&CancellationToken::new()).await
    }

    /// Run, giving up as soon as `cancel` fires. Cancellation is honoured
    /// during both network calls and right before the write; a cancelled run
    /// writes nothing.
    pub async fn run_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        // ---
        let cfg = &self.config;
        info!("Starting sensor sync for device token {:?}", cfg.device_token);

        // Step 1: Fetch and decode the catalog
        debug!("Sync - Step 1");

        let catalog_body = until_cancelled(cancel, fetch::fetch_catalog(&*self.transport, cfg))
            .await?
            .map_err(PipelineError::Catalog)?;

        let catalog: Vec<SensorDescriptor> =
            codec::decode_root(&catalog_body).map_err(PipelineError::CatalogDecode)?;
        if catalog.is_empty() {
            return Err(PipelineError::EmptyCatalog);
        }
        info!("Catalog received: {} sensors", catalog.len());

        // Step 2: Keep the configured device only
        debug!("Sync - Step 2");

        let mut sensors = filter_by_device(catalog, &cfg.device_token);
        info!("Filtered sensors: {}", sensors.len());

        // Step 3: Build the chart request
        debug!("Sync - Step 3");

        let request =
            ChartRequest::for_window(&sensors, Utc::now(), cfg.chart_window(), &cfg.granularity);

        // Step 4: Fetch chart readings
        debug!("Sync - Step 4");

        let body = serde_json::to_string(&request).map_err(PipelineError::ChartEncode)?;
        let chart_body = until_cancelled(cancel, fetch::fetch_chart(&*self.transport, cfg, body))
            .await?
            .map_err(PipelineError::Chart)?;
        if chart_body.trim().is_empty() {
            return Err(PipelineError::EmptyChart);
        }

        // Step 5: Parse the chart response
        debug!("Sync - Step 5");

        let chart = json::parse(&chart_body)
            .filter(Value::is_object)
            .ok_or(PipelineError::ChartParse)?;

        // Step 6: Merge readings into the sensors
        debug!("Sync - Step 6");

        let stats = merge_chart_readings(&mut sensors, &chart);

        // Step 7: Persist
        debug!("Sync - Step 7");

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let output_path = self.persist(&sensors).await?;

        // Step 8: Notify the simulation
        debug!("Sync - Step 8");

        self.notify_simulation(&output_path).await;

        info!(
            "Sync complete: {} sensors written, {} merged, {} without chart value",
            sensors.len(),
            stats.merged,
            stats.unmatched
        );

        Ok(RunReport {
            output_path,
            sensors,
            merged: stats.merged,
            unmatched: stats.unmatched,
        })
    }

    async fn persist(&self, sensors: &[SensorDescriptor]) -> Result<PathBuf, PipelineError> {
        // ---
        let cfg = &self.config;
        let document = codec::encode_keyed(sensors, &cfg.output_key, true)
            .map_err(PipelineError::DocumentEncode)?;

        let path = cfg.output_path();
        let persist_error = |source| PipelineError::Persist {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&cfg.data_dir)
            .await
            .map_err(persist_error)?;
        tokio::fs::write(&path, document)
            .await
            .map_err(persist_error)?;

        info!("File saved: {}", path.display());
        Ok(path)
    }

    async fn notify_simulation(&self, path: &std::path::Path) {
        // ---
        let Some(simulation) = &self.simulation else {
            warn!("No simulation attached, skipping refresh");
            return;
        };

        if let Err(e) = simulation
            .refresh_from_file(&self.config.output_file, path)
            .await
        {
            error!("Simulation refresh failed: {:#}", e);
        }
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Keep the sensors whose `device_token` equals `device_token`, in catalog
/// order. The match is exact, so an empty filter only keeps sensors with an
/// empty token.
pub fn filter_by_device(catalog: Vec<SensorDescriptor>, device_token: &str) -> Vec<SensorDescriptor> {
    catalog
        .into_iter()
        .filter(|s| s.device_token == device_token)
        .collect()
}

/// Copy the first reading of each sensor's chart series into its `value`.
///
/// `chart` is the parsed response root: signal id → array of readings.
/// Sensors without a usable reading keep their value.
pub fn merge_chart_readings(sensors: &mut [SensorDescriptor], chart: &Value) -> MergeStats {
    // ---
    let mut stats = MergeStats::default();

    for sensor in sensors.iter_mut() {
        match latest_reading(chart, &sensor.id) {
            Ok(value) => {
                sensor.value = value;
                stats.merged += 1;
                info!(
                    "{} ({}) → {} {}",
                    sensor.description, sensor.signal_token, sensor.value, sensor.unit_readable
                );
            }
            Err(reason) => {
                stats.unmatched += 1;
                warn!("No chart value for signal {}: {}", sensor.id, reason);
            }
        }
    }

    stats
}

fn latest_reading(chart: &Value, signal_id: &str) -> Result<f32, MissingReading> {
    // ---
    let series = chart.get(signal_id).ok_or(MissingReading::NoSeries)?;
    let first = series
        .as_array()
        .and_then(|readings| readings.first())
        .ok_or(MissingReading::EmptySeries)?;
    let value = first
        .get("value")
        .filter(|v| !v.is_null())
        .ok_or(MissingReading::NoValue)?;

    value
        .to_f32_lenient()
        .ok_or_else(|| MissingReading::NotANumber(value.to_string()))
}
