use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use sensor_chart_sync::{
    codec, Config, HttpTransport, Pipeline, PipelineError, SensorDescriptor, SensorFileLoader,
    SimulationRefresh, TransportError,
};

// ---

const CATALOG: &str = r#"[
    {"_id": "s1", "description": "Soil moisture", "signal_token": "moist", "unit_readable": "%", "device_token": "d1"},
    {"_id": "s2", "description": "Soil temperature", "signal_token": "temp", "unit_readable": "C", "device_token": "d1"},
    {"_id": "s3", "description": "Wind", "signal_token": "wind", "unit_readable": "m/s", "device_token": "d2"}
]"#;

const CHART: &str = r#"{"s1": [{"value": "3.14"}], "s2": []}"#;

/// Canned responses per endpoint; records every call.
struct FakeTransport {
    catalog: std::result::Result<String, u16>,
    chart: std::result::Result<String, u16>,
    calls: Mutex<Vec<String>>,
    chart_bodies: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn new(catalog: std::result::Result<&str, u16>, chart: std::result::Result<&str, u16>) -> Self {
        Self {
            catalog: catalog.map(str::to_string),
            chart: chart.map(str::to_string),
            calls: Mutex::new(Vec::new()),
            chart_bodies: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(url: &str, canned: &std::result::Result<String, u16>) -> std::result::Result<String, TransportError> {
        canned.clone().map_err(|status| TransportError::Status {
            url: url.to_string(),
            status,
        })
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, url: &str, _bearer: &str) -> std::result::Result<String, TransportError> {
        self.calls.lock().unwrap().push(format!("GET {url}"));
        Self::respond(url, &self.catalog)
    }

    async fn post_json(
        &self,
        url: &str,
        _bearer: &str,
        body: String,
    ) -> std::result::Result<String, TransportError> {
        self.calls.lock().unwrap().push(format!("POST {url}"));
        self.chart_bodies.lock().unwrap().push(body);
        Self::respond(url, &self.chart)
    }
}

/// Serves the catalog, then fires `cancel` from inside the chart call.
/// With `hang` set the chart call never completes.
struct CancellingTransport {
    cancel: CancellationToken,
    hang: bool,
    calls: Mutex<Vec<String>>,
}

impl CancellingTransport {
    fn new(cancel: &CancellationToken, hang: bool) -> Self {
        Self {
            cancel: cancel.clone(),
            hang,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpTransport for CancellingTransport {
    async fn get(&self, url: &str, _bearer: &str) -> std::result::Result<String, TransportError> {
        self.calls.lock().unwrap().push(format!("GET {url}"));
        Ok(CATALOG.to_string())
    }

    async fn post_json(
        &self,
        url: &str,
        _bearer: &str,
        _body: String,
    ) -> std::result::Result<String, TransportError> {
        self.calls.lock().unwrap().push(format!("POST {url}"));
        self.cancel.cancel();
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(CHART.to_string())
    }
}

#[derive(Default)]
struct RecordingSimulation {
    refreshed: Mutex<Vec<String>>,
}

#[async_trait]
impl SimulationRefresh for RecordingSimulation {
    async fn refresh_from_file(&self, file_name: &str, path: &Path) -> Result<()> {
        assert!(path.exists(), "refresh must happen after the write");
        self.refreshed.lock().unwrap().push(file_name.to_string());
        Ok(())
    }
}

fn pipeline(dir: &Path, device_token: &str, transport: Arc<FakeTransport>) -> Pipeline {
    let cfg = Config::new("test-key", device_token, dir.to_path_buf());
    Pipeline::new(cfg, transport)
}

#[tokio::test]
async fn full_run_filters_merges_and_persists() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let transport = Arc::new(FakeTransport::new(Ok(CATALOG), Ok(CHART)));
    let simulation = Arc::new(RecordingSimulation::default());

    let report = assert_ok!(
        pipeline(dir.path(), "d1", transport.clone())
            .with_simulation(simulation.clone())
            .run()
            .await
    );

    assert_eq!(report.output_path, dir.path().join("d1.json"));
    assert_eq!(report.merged, 1);
    assert_eq!(report.unmatched, 1);

    // Chart request lists the filtered ids in catalog order
    let bodies = transport.chart_bodies.lock().unwrap().clone();
    let request: serde_json::Value = serde_json::from_str(&bodies[0])?;
    assert_eq!(request["signals"], serde_json::json!(["s1", "s2"]));
    assert_eq!(request["granularity"], "a");
    assert!(request["startDate"].as_str().unwrap().ends_with("+00:00"));

    // Persisted document: one key, same cardinality and order as the filter
    let written = std::fs::read_to_string(&report.output_path)?;
    let tree: serde_json::Value = serde_json::from_str(&written)?;
    assert_eq!(tree.as_object().unwrap().len(), 1);

    let sensors: Vec<SensorDescriptor> = codec::decode_keyed(&written, "sensori")?;
    assert_eq!(sensors.len(), 2);
    assert_eq!(sensors[0].id, "s1");
    assert_eq!(sensors[0].value, 3.14);
    assert_eq!(sensors[1].id, "s2");
    assert_eq!(sensors[1].value, 0.0);

    assert_eq!(*simulation.refreshed.lock().unwrap(), vec!["d1.json".to_string()]);
    Ok(())
}

#[tokio::test]
async fn catalog_failure_writes_nothing_and_skips_chart() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let transport = Arc::new(FakeTransport::new(Err(503), Ok(CHART)));

    let err = assert_err!(pipeline(dir.path(), "d1", transport.clone()).run().await);

    assert!(matches!(
        err,
        PipelineError::Catalog(TransportError::Status { status: 503, .. })
    ));
    assert_eq!(transport.calls(), vec!["GET https://api.databoom.com/v1/signals/all"]);
    assert!(!dir.path().join("d1.json").exists());
    Ok(())
}

#[tokio::test]
async fn empty_or_malformed_catalog_aborts() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;

    let transport = Arc::new(FakeTransport::new(Ok("[]"), Ok(CHART)));
    let err = assert_err!(pipeline(dir.path(), "d1", transport.clone()).run().await);
    assert!(matches!(err, PipelineError::EmptyCatalog));
    assert_eq!(transport.calls().len(), 1);

    let transport = Arc::new(FakeTransport::new(Ok(r#"{"error": "nope"}"#), Ok(CHART)));
    let err = assert_err!(pipeline(dir.path(), "d1", transport.clone()).run().await);
    assert!(matches!(err, PipelineError::CatalogDecode(_)));
    assert_eq!(transport.calls().len(), 1);

    assert!(!dir.path().join("d1.json").exists());
    Ok(())
}

#[tokio::test]
async fn chart_failures_write_nothing() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;

    let cases: [(std::result::Result<&str, u16>, fn(&PipelineError) -> bool); 4] = [
        (Err(500), |e| matches!(e, PipelineError::Chart(_))),
        (Ok("  "), |e| matches!(e, PipelineError::EmptyChart)),
        (Ok(r#"{"s1": [{"value": 1}"#), |e| matches!(e, PipelineError::ChartParse)),
        (Ok(r#"[{"value": 1}]"#), |e| matches!(e, PipelineError::ChartParse)),
    ];

    for (chart, expected) in cases {
        let transport = Arc::new(FakeTransport::new(Ok(CATALOG), chart));
        let err = assert_err!(pipeline(dir.path(), "d1", transport.clone()).run().await);

        assert!(expected(&err), "unexpected error: {err}");
        assert_eq!(transport.calls().len(), 2);
        assert!(!dir.path().join("d1.json").exists());
    }
    Ok(())
}

#[tokio::test]
async fn empty_filter_selects_no_sensors() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let transport = Arc::new(FakeTransport::new(Ok(CATALOG), Ok("{}")));

    let report = assert_ok!(pipeline(dir.path(), "", transport.clone()).run().await);

    assert!(report.sensors.is_empty());
    assert_eq!(report.output_path, dir.path().join(".json"));

    let bodies = transport.chart_bodies.lock().unwrap().clone();
    let request: serde_json::Value = serde_json::from_str(&bodies[0])?;
    assert_eq!(request["signals"], serde_json::json!([]));

    let written = std::fs::read_to_string(&report.output_path)?;
    let tree: serde_json::Value = serde_json::from_str(&written)?;
    assert_eq!(tree, serde_json::json!({ "sensori": [] }));
    Ok(())
}

#[tokio::test]
async fn custom_key_and_file_name() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let transport = Arc::new(FakeTransport::new(Ok(CATALOG), Ok(CHART)));

    let mut cfg = Config::new("test-key", "d1", dir.path().join("out"));
    cfg.output_key = "sensors".to_string();
    cfg.output_file = "dati_coltura.json".to_string();

    let loader = Arc::new(SensorFileLoader::new("sensors"));
    let report = assert_ok!(
        Pipeline::new(cfg, transport)
            .with_simulation(loader.clone())
            .run()
            .await
    );

    assert_eq!(report.output_path, dir.path().join("out").join("dati_coltura.json"));
    assert_eq!(loader.current_file().as_deref(), Some("dati_coltura.json"));
    assert_eq!(loader.sensors()[0].value, 3.14);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_does_not_fail_the_run() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let transport = Arc::new(FakeTransport::new(Ok(CATALOG), Ok(CHART)));

    // Loader expects a different key, so its reload fails after the write
    let loader = Arc::new(SensorFileLoader::new("other"));
    let report = assert_ok!(
        pipeline(dir.path(), "d1", transport)
            .with_simulation(loader.clone())
            .run()
            .await
    );

    assert!(report.output_path.exists());
    assert!(loader.current_file().is_none());
    Ok(())
}

#[tokio::test]
async fn cancelled_run_issues_no_requests() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let transport = Arc::new(FakeTransport::new(Ok(CATALOG), Ok(CHART)));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assert_err!(
        pipeline(dir.path(), "d1", transport.clone())
            .run_with_cancel(&cancel)
            .await
    );

    assert!(matches!(err, PipelineError::Cancelled));
    assert!(transport.calls().is_empty());
    assert!(!dir.path().join("d1.json").exists());
    Ok(())
}

#[tokio::test]
async fn cancel_during_chart_call_abandons_request() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let cancel = CancellationToken::new();
    let transport = Arc::new(CancellingTransport::new(&cancel, true));
    let cfg = Config::new("test-key", "d1", dir.path().to_path_buf());

    let err = assert_err!(
        Pipeline::new(cfg, transport.clone())
            .run_with_cancel(&cancel)
            .await
    );

    assert!(matches!(err, PipelineError::Cancelled));
    let calls = transport.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("GET "));
    assert!(calls[1].starts_with("POST "));
    assert!(!dir.path().join("d1.json").exists());
    Ok(())
}

#[tokio::test]
async fn cancel_after_chart_response_skips_write() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let cancel = CancellationToken::new();
    let transport = Arc::new(CancellingTransport::new(&cancel, false));
    let simulation = Arc::new(RecordingSimulation::default());
    let cfg = Config::new("test-key", "d1", dir.path().to_path_buf());

    let err = assert_err!(
        Pipeline::new(cfg, transport.clone())
            .with_simulation(simulation.clone())
            .run_with_cancel(&cancel)
            .await
    );

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(transport.calls.lock().unwrap().len(), 2);
    assert!(!dir.path().join("d1.json").exists());
    assert!(simulation.refreshed.lock().unwrap().is_empty());
    Ok(())
}
