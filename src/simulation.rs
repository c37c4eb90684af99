//! Downstream simulation hook.
//!
//! The soil simulation consumes the file written by the pipeline. The
//! pipeline only knows it through [`SimulationRefresh`]: after a successful
//! write it passes the new file name and asks for a refresh. Running without a
//! simulation attached is fine.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::{codec, SensorDescriptor};

// ---

/// A consumer that reloads its state from a persisted sensor document.
#[async_trait]
pub trait SimulationRefresh: Send + Sync {
    /// Point the consumer at `file_name` (located at `path`) and reload.
    async fn refresh_from_file(&self, file_name: &str, path: &Path) -> Result<()>;
}

/// Read a persisted sensor document and return the array under `key`.
///
/// A missing file or an empty array is an error.
pub async fn load_sensor_file(path: &Path, key: &str) -> Result<Vec<SensorDescriptor>> {
    // ---
    info!("Reading sensor file: {}", path.display());

    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Sensor file not found: {}", path.display()))?;

    let sensors: Vec<SensorDescriptor> = codec::decode_keyed(&json, key)
        .with_context(|| format!("Key '{}' not found or array malformed", key))?;

    if sensors.is_empty() {
        bail!("{} holds no sensors under '{}'", path.display(), key);
    }

    Ok(sensors)
}

/// Built-in consumer: loads the document back and keeps the latest sensor set.
#[derive(Debug)]
pub struct SensorFileLoader {
    key: String,
    loaded: Mutex<Option<LoadedSensors>>,
}

#[derive(Debug, Clone)]
struct LoadedSensors {
    file_name: String,
    sensors: Vec<SensorDescriptor>,
}

impl SensorFileLoader {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            loaded: Mutex::new(None),
        }
    }

    /// Name of the last file loaded successfully.
    pub fn current_file(&self) -> Option<String> {
        self.lock().as_ref().map(|l| l.file_name.clone())
    }

    /// Sensors from the last successful load.
    pub fn sensors(&self) -> Vec<SensorDescriptor> {
        self.lock()
            .as_ref()
            .map(|l| l.sensors.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<LoadedSensors>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SimulationRefresh for SensorFileLoader {
    async fn refresh_from_file(&self, file_name: &str, path: &Path) -> Result<()> {
        // ---
        let sensors = load_sensor_file(path, &self.key).await?;
        info!("Sensors loaded: {}", sensors.len());

        for s in &sensors {
            info!(
                "{} ({}) → {} {}",
                s.description, s.signal_token, s.value, s.unit_readable
            );
        }

        *self.lock() = Some(LoadedSensors {
            file_name: file_name.to_string(),
            sensors,
        });
        Ok(())
    }
}
