//! Configuration loader for the `sensor-chart-sync` job.
//!
//! All runtime settings are read once at startup, from environment variables
//! (with optional `.env` support provided by the caller), and handed to the
//! pipeline as an explicit [`Config`]. Nothing downstream reads `env::var`.
//!
//! The device token is the one setting that can also come from a previous
//! run: after a successful sync the binary remembers it in
//! `<data_dir>/device_token`, and later runs fall back to that file when
//! `DEVICE_TOKEN` is not set.
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};

pub const DEFAULT_SIGNALS_URL: &str = "https://api.databoom.com/v1/signals/all";
pub const DEFAULT_CHART_URL: &str = "https://api.databoom.com/v1/chart";
pub const DEFAULT_OUTPUT_KEY: &str = "sensori";
pub const DEFAULT_GRANULARITY: &str = "a";
pub const DEFAULT_CHART_WINDOW_MINUTES: u32 = 60;

const DEVICE_TOKEN_FILE: &str = "device_token";
const APP_DIR: &str = "sensor-chart-sync";

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable, falling back to a default.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

/// Strongly typed job configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Bearer token for both API calls.
    pub api_key: String,

    /// Full URL of the signal catalog (`GET`).
    pub signals_url: String,

    /// Full URL of the chart endpoint (`POST`).
    pub chart_url: String,

    /// Only sensors whose `device_token` equals this value are kept.
    /// An empty filter matches sensors with an empty token, not all sensors.
    pub device_token: String,

    /// Writable directory holding the output file and the remembered token.
    pub data_dir: PathBuf,

    /// Output file name inside `data_dir`.
    pub output_file: String,

    /// Top-level key of the output document.
    pub output_key: String,

    /// Aggregation code sent to the chart endpoint.
    pub granularity: String,

    /// Length of the chart lookback window.
    pub chart_window_minutes: u32,
}

impl Config {
    /// Configuration with every optional setting at its default.
    pub fn new(api_key: impl Into<String>, device_token: impl Into<String>, data_dir: PathBuf) -> Self {
        // ---
        let device_token = device_token.into();
        Config {
            api_key: api_key.into(),
            signals_url: DEFAULT_SIGNALS_URL.to_string(),
            chart_url: DEFAULT_CHART_URL.to_string(),
            output_file: default_output_file(&device_token),
            device_token,
            data_dir,
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
            granularity: DEFAULT_GRANULARITY.to_string(),
            chart_window_minutes: DEFAULT_CHART_WINDOW_MINUTES,
        }
    }

    /// Where the merged sensor document is written.
    pub fn output_path(&self) -> PathBuf {
        self.data_dir.join(&self.output_file)
    }

    pub fn chart_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.chart_window_minutes))
    }

    /// Log the loaded configuration, masking the API key.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABOOM_API_KEY     : {}", mask_secret(&self.api_key));
        tracing::info!("  SIGNALS_URL          : {}", self.signals_url);
        tracing::info!("  CHART_URL            : {}", self.chart_url);
        tracing::info!("  DEVICE_TOKEN         : {:?}", self.device_token);
        tracing::info!("  SENSOR_DATA_DIR      : {}", self.data_dir.display());
        tracing::info!("  OUTPUT_FILE          : {}", self.output_file);
        tracing::info!("  OUTPUT_KEY           : {}", self.output_key);
        tracing::info!("  CHART_GRANULARITY    : {}", self.granularity);
        tracing::info!("  CHART_WINDOW_MINUTES : {}", self.chart_window_minutes);
    }
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABOOM_API_KEY` – bearer token for the API
///
/// Optional:
/// - `SIGNALS_URL`, `CHART_URL` – endpoint overrides
/// - `SENSOR_DATA_DIR` – output directory (default: platform data dir)
/// - `DEVICE_TOKEN` – device filter (default: remembered token, else empty)
/// - `OUTPUT_FILE` – output file name (default: `<device token>.json`)
/// - `OUTPUT_KEY` – document key (default: `sensori`)
/// - `CHART_GRANULARITY` – aggregation code (default: `a`)
/// - `CHART_WINDOW_MINUTES` – lookback window (default: 60)
pub fn load_from_env() -> Result<Config> {
    // ---
    let api_key = require_env!("DATABOOM_API_KEY");
    let data_dir = env::var("SENSOR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir());

    let device_token = match env::var("DEVICE_TOKEN") {
        Ok(token) => token,
        Err(_) => match load_remembered_device_token(&data_dir)? {
            Some(token) => {
                tracing::info!("Device token loaded from previous run: {}", token);
                token
            }
            None => String::new(),
        },
    };

    let mut cfg = Config::new(api_key, device_token, data_dir);
    cfg.signals_url = env_or!("SIGNALS_URL", DEFAULT_SIGNALS_URL);
    cfg.chart_url = env_or!("CHART_URL", DEFAULT_CHART_URL);
    cfg.output_key = env_or!("OUTPUT_KEY", DEFAULT_OUTPUT_KEY);
    cfg.granularity = env_or!("CHART_GRANULARITY", DEFAULT_GRANULARITY);
    cfg.chart_window_minutes = parse_env_u32!("CHART_WINDOW_MINUTES", DEFAULT_CHART_WINDOW_MINUTES);

    if let Some(file) = env::var("OUTPUT_FILE").ok().filter(|f| !f.is_empty()) {
        cfg.output_file = file;
    }

    Ok(cfg)
}

/// `<device token>.json`, the output name used when none is configured.
pub fn default_output_file(device_token: &str) -> String {
    format!("{device_token}.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Read the device token remembered by a previous run, if any.
pub fn load_remembered_device_token(data_dir: &Path) -> Result<Option<String>> {
    // ---
    let path = data_dir.join(DEVICE_TOKEN_FILE);
    match fs::read_to_string(&path) {
        Ok(token) => {
            let token = token.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Remember `device_token` so later runs can omit `DEVICE_TOKEN`.
pub fn remember_device_token(data_dir: &Path, device_token: &str) -> Result<()> {
    // ---
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let path = data_dir.join(DEVICE_TOKEN_FILE);
    fs::write(&path, device_token).with_context(|| format!("Failed to write {}", path.display()))
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
