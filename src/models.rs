//! Data models shared by the fetchers, the pipeline and the persisted file.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---

/// Timestamp layout expected by the chart endpoint.
pub const CHART_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// One signal as described by `/signals/all`, plus its latest reading.
///
/// Field names on the wire follow the remote API; the merged reading is
/// written as `valore`, which is what the simulation reads back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorDescriptor {
    // ---
    #[serde(rename = "_id", deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub chart_type: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub signal_token: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub unit_readable: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub device_token: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub device_description: String,
    #[serde(rename = "valore", deserialize_with = "null_as_zero")]
    pub value: f32,
}

/// Body of `POST /chart`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    // ---
    pub start_date: String,
    pub end_date: String,
    pub granularity: String,
    pub signals: Vec<String>,
}

impl ChartRequest {
    /// Request the readings of `sensors` over the `window` ending at `now`.
    ///
    /// Signals keep the order of `sensors`.
    pub fn for_window(
        sensors: &[SensorDescriptor],
        now: DateTime<Utc>,
        window: Duration,
        granularity: &str,
    ) -> Self {
        // ---
        ChartRequest {
            start_date: (now - window).format(CHART_DATE_FORMAT).to_string(),
            end_date: now.format(CHART_DATE_FORMAT).to_string(),
            granularity: granularity.to_string(),
            signals: sensors.iter().map(|s| s.id.clone()).collect(),
        }
    }
}

/// Catalog entries sometimes carry `null` text fields; treat them as empty.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or_default())
}
