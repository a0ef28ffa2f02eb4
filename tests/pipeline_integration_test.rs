use aq_etl::config::{
    Config, RetryConfig, SinkConfig, SinkKind, SourceConfig, StorageConfig, TransformConfig,
};
use aq_etl::db::{BatchSink, SinkRow};
use aq_etl::error::{AppError, Result};
use aq_etl::models::Location;
use aq_etl::pipeline::{Pipeline, Stage};
use aq_etl::report::{DISTRIBUTION_FILE, SUMMARY_FILE, TRENDS_FILE};
use aq_etl::staged::{self, STAGED_COLUMNS};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records every batch; rejects the batches whose 1-based number is listed.
struct RecordingSink {
    reject_batches: Vec<usize>,
    batches: Mutex<Vec<Vec<SinkRow>>>,
}

impl RecordingSink {
    fn new(reject_batches: Vec<usize>) -> Self {
        Self {
            reject_batches,
            batches: Mutex::new(Vec::new()),
        }
    }

    fn accepted_rows(&self) -> usize {
        let batches = self.batches.lock().unwrap();
        batches
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.reject_batches.contains(&(i + 1)))
            .map(|(_, b)| b.len())
            .sum()
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn insert_batch(&self, rows: &[SinkRow]) -> Result<usize> {
        let mut batches = self.batches.lock().unwrap();
        batches.push(rows.to_vec());
        if self.reject_batches.contains(&batches.len()) {
            return Err(AppError::SinkRejected("check constraint violated".to_string()));
        }
        Ok(rows.len())
    }

    fn describe(&self) -> String {
        "recording sink".to_string()
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

fn config(server: &MockServer, root: &Path, batch_size: usize) -> Config {
    Config {
        source: SourceConfig {
            base_url: format!("{}/v1/air-quality", server.uri()),
            retry: fast_retry(2),
            ..SourceConfig::default()
        },
        locations: vec![
            Location::new("Delhi", 28.7041, 77.1025),
            Location::new("Mumbai", 19.076, 72.8777),
        ],
        storage: StorageConfig {
            raw_dir: root.join("raw"),
            staged_file: root.join("staged").join("air_quality_transformed.csv"),
            report_dir: root.join("processed"),
        },
        transform: TransformConfig::default(),
        sink: SinkConfig {
            kind: SinkKind::Rest,
            table: "air_quality_data".to_string(),
            batch_size,
            // A single attempt keeps rejected batch numbers aligned with calls
            retry: fast_retry(1),
            database: None,
            rest: None,
        },
    }
}

fn body(pm2_5: f64) -> serde_json::Value {
    json!({
        "hourly": {
            "time": ["2024-01-15T00:00", "2024-01-15T01:00", "2024-01-15T02:00"],
            "pm10": [80.0, 75.0, 70.0],
            "pm2_5": [pm2_5, pm2_5, null],
            "carbon_monoxide": [400.0, 380.0, 360.0],
            "nitrogen_dioxide": [20.0, 18.0, 16.0],
            "ozone": [30.0, 28.0, 26.0],
            "sulphur_dioxide": [8.0, 7.0, 6.0],
            "uv_index": [0.0, 0.0, 0.5]
        }
    })
}

async fn mount_city(server: &MockServer, latitude: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(query_param("latitude", latitude))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_run() {
    let server = MockServer::start().await;
    mount_city(&server, "28.7041", ResponseTemplate::new(200).set_body_json(body(150.0))).await;
    mount_city(&server, "19.076", ResponseTemplate::new(200).set_body_json(body(40.0))).await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let config = config(&server, dir.path(), 4);
    let staged_file = config.storage.staged_file.clone();
    let report_dir = config.storage.report_dir.clone();

    let pipeline = Pipeline::new(config, sink.clone()).unwrap();
    let summary = pipeline.run().await.expect("run failed");

    assert_eq!(summary.extract.attempted, 2);
    assert_eq!(summary.extract.succeeded, 2);
    assert_eq!(summary.extract.saved.len(), 2);
    assert_eq!(summary.transform.payloads_seen, 2);
    assert_eq!(summary.rows_staged, 6);
    assert_eq!(summary.load.batches, 2);
    assert_eq!(summary.load.succeeded, 6);
    assert_eq!(summary.load.failed, 0);
    assert_eq!(sink.accepted_rows(), 6);

    let staged_rows = staged::read_readings(&staged_file).unwrap();
    assert_eq!(staged_rows.len(), 6);
    assert_eq!(staged_rows[0].city, "Delhi");

    for file in [SUMMARY_FILE, DISTRIBUTION_FILE, TRENDS_FILE] {
        assert!(report_dir.join(file).exists(), "{} missing", file);
    }
    assert_eq!(summary.reports.len(), 3);
}

/// One city down is tolerated; the run carries on with the rest
#[tokio::test]
async fn test_partial_extraction() {
    let server = MockServer::start().await;
    mount_city(&server, "28.7041", ResponseTemplate::new(200).set_body_json(body(150.0))).await;
    mount_city(&server, "19.076", ResponseTemplate::new(502)).await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let pipeline = Pipeline::new(config(&server, dir.path(), 200), sink.clone()).unwrap();

    let summary = pipeline.run().await.expect("run failed");

    assert_eq!(summary.extract.succeeded, 1);
    assert_eq!(summary.extract.failed, 1);
    assert_eq!(summary.rows_staged, 3);
    assert_eq!(summary.load.succeeded, 3);

    // Delhi once, Mumbai twice (retried 502)
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_all_locations_failing_halts_in_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let config = config(&server, dir.path(), 200);
    let staged_file = config.storage.staged_file.clone();
    let pipeline = Pipeline::new(config, sink.clone()).unwrap();

    match pipeline.run().await {
        Err(AppError::Stage { stage, source }) => {
            assert_eq!(stage, Stage::Extracting);
            assert!(matches!(*source, AppError::NoLocationsExtracted { attempted: 2 }));
        }
        other => panic!("Expected extraction failure, got: {:?}", other),
    }

    // Later stages never ran
    assert!(!staged_file.exists());
    assert!(sink.batches.lock().unwrap().is_empty());
}

/// Rejected batches are reported, the rest of the run still completes
#[tokio::test]
async fn test_partial_sink_failure_completes() {
    let server = MockServer::start().await;
    mount_city(&server, "28.7041", ResponseTemplate::new(200).set_body_json(body(150.0))).await;
    mount_city(&server, "19.076", ResponseTemplate::new(200).set_body_json(body(40.0))).await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![2]));
    let config = config(&server, dir.path(), 2);
    let report_dir = config.storage.report_dir.clone();
    let pipeline = Pipeline::new(config, sink.clone()).unwrap();

    let summary = pipeline.run().await.expect("run failed");

    assert_eq!(summary.load.batches, 3);
    assert_eq!(summary.load.batches_failed, 1);
    assert_eq!(summary.load.succeeded, 4);
    assert_eq!(summary.load.failed, 2);
    assert_eq!(summary.load.total(), summary.rows_staged);
    assert!(report_dir.join(SUMMARY_FILE).exists());
}

#[tokio::test]
async fn test_transform_without_raw_artifacts() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let pipeline = Pipeline::new(config(&server, dir.path(), 200), sink).unwrap();

    let result = pipeline.transform();
    assert!(matches!(result, Err(AppError::InputMissing(_))), "got {:?}", result);
}

/// Valid payloads whose rows are all empty still stage a header-only file
#[tokio::test]
async fn test_all_rows_dropped_stages_header_only() {
    let server = MockServer::start().await;
    let empty = json!({
        "hourly": {
            "time": ["2024-01-15T00:00", "2024-01-15T01:00"],
            "pm10": [null, null],
            "pm2_5": [null, null],
            "carbon_monoxide": [null, null],
            "nitrogen_dioxide": [null, null],
            "ozone": [null, null],
            "sulphur_dioxide": [null, null],
            "uv_index": [1.0, 1.0]
        }
    });
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let config = config(&server, dir.path(), 200);
    let staged_file = config.storage.staged_file.clone();
    let report_dir = config.storage.report_dir.clone();
    let pipeline = Pipeline::new(config, sink.clone()).unwrap();

    pipeline.extract().await.unwrap();
    let (stats, rows) = pipeline.transform().expect("transform failed");
    assert_eq!(stats.payloads_skipped, 0);
    assert_eq!(stats.rows_dropped, 4);
    assert_eq!(rows, 0);

    let text = std::fs::read_to_string(&staged_file).unwrap();
    assert!(text.starts_with("city,time,hour,"));
    assert_eq!(text.trim_end(), STAGED_COLUMNS.join(","));

    // The rest of the run copes with nothing to load
    let load = pipeline.load().await.unwrap();
    assert_eq!(load.batches, 0);
    assert!(sink.batches.lock().unwrap().is_empty());

    pipeline.report().unwrap();
    let trends = std::fs::read_to_string(report_dir.join(TRENDS_FILE)).unwrap();
    assert!(trends.starts_with("city,time,pm2_5,pm10,ozone"));
}

/// Payloads that pass the fetch check but lack series halt the transform
#[tokio::test]
async fn test_unusable_payloads_halt_in_transform() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hourly": { "time": ["2024-01-15T00:00"], "pm10": [12.0] }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let config = config(&server, dir.path(), 200);
    let staged_file = config.storage.staged_file.clone();
    let pipeline = Pipeline::new(config, sink.clone()).unwrap();

    match pipeline.run().await {
        Err(AppError::Stage { stage, source }) => {
            assert_eq!(stage, Stage::Transforming);
            assert!(matches!(*source, AppError::InputMissing(_)), "got {:?}", source);
        }
        other => panic!("Expected transform failure, got: {:?}", other),
    }

    assert!(!staged_file.exists());
    assert!(sink.batches.lock().unwrap().is_empty());
}

/// Loading and reporting need the staged file
#[tokio::test]
async fn test_load_and_report_without_staged_file() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let pipeline = Pipeline::new(config(&server, dir.path(), 200), sink.clone()).unwrap();

    let result = pipeline.load().await;
    assert!(matches!(result, Err(AppError::InputMissing(_))), "got {:?}", result);
    assert!(sink.batches.lock().unwrap().is_empty());

    let result = pipeline.report();
    assert!(matches!(result, Err(AppError::InputMissing(_))), "got {:?}", result);
}

/// A second run consumes the first run's artifacts as well
#[tokio::test]
async fn test_rerun_accumulates_raw_artifacts() {
    let server = MockServer::start().await;
    mount_city(&server, "28.7041", ResponseTemplate::new(200).set_body_json(body(150.0))).await;
    mount_city(&server, "19.076", ResponseTemplate::new(200).set_body_json(body(40.0))).await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::new(vec![]));
    let pipeline = Pipeline::new(config(&server, dir.path(), 200), sink).unwrap();

    let first = pipeline.run().await.unwrap();
    let second = pipeline.run().await.unwrap();

    assert_eq!(first.transform.payloads_seen, 2);
    assert_eq!(second.transform.payloads_seen, 4);
    assert_eq!(second.rows_staged, 12);
}
