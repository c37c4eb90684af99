//! Sensor chart sync.
//!
//! Pulls the signal catalog from the Databoom API, keeps the sensors of one
//! device, fills in each sensor's latest reading from the chart endpoint and
//! writes the result as `{"sensori": [...]}` for the soil simulation.
//!
//! Modules, leaves first:
//! - `json` – schema-less JSON value parser for the chart response
//! - `codec` – root/keyed array codec over `serde_json`
//! - `fetch` – HTTP transport seam and the two fetchers
//! - `pipeline` – fetch → filter → merge → persist → notify
//! - `simulation` – downstream refresh hook and persisted-file loader
//! - `config`, `models` – settings and shared data types

pub mod codec;
pub mod config;
pub mod fetch;
pub mod json;
pub mod models;
pub mod pipeline;
pub mod simulation;

pub use config::Config;
pub use fetch::{HttpTransport, ReqwestTransport, TransportError};
pub use models::{ChartRequest, SensorDescriptor};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use simulation::{SensorFileLoader, SimulationRefresh};
