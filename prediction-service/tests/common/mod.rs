//! Shared fixtures for prediction-service integration tests.
//!
//! Artifacts are generated into a temporary directory:
//! - good: logistic model with declared inputs, bzip2 kernel explainer
//! - bad: two-layer relu/sigmoid network, plain JSON linear explainer

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bzip2::{write::BzEncoder, Compression};
use prediction_service::{
    config::PredictionConfig,
    models::FEATURE_NAMES,
    services::init_metrics,
    startup::{build_router, AppState, Application},
};
use serde_json::{json, Value};
use service_core::config::Config;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const COEFS: [f64; 8] = [0.05, 0.9, 0.8, 0.08, 2.2, 0.03, 0.2, 0.1];

static METRICS: Once = Once::new();

pub fn scenario_record() -> Value {
    json!({
        "age": 45,
        "hypertension": 0,
        "heart_disease": 0,
        "bmi": 27.3,
        "HbA1c_level": 5.8,
        "blood_glucose_level": 140,
        "gender_encoded": 1,
        "smoking_history_encoded": 0
    })
}

pub fn good_model() -> Value {
    let weights: Vec<Vec<f64>> = COEFS.iter().map(|c| vec![*c]).collect();
    json!({
        "format": "dense",
        "inputs": FEATURE_NAMES,
        "layers": [{ "weights": weights, "bias": [-20.0], "activation": "sigmoid" }]
    })
}

pub fn bad_model() -> Value {
    // Hidden unit 0 follows HbA1c, unit 1 follows glucose.
    let mut hidden = vec![vec![0.0, 0.0]; 8];
    hidden[4] = vec![1.0, 0.0];
    hidden[5] = vec![0.0, 0.01];
    json!({
        "format": "dense",
        "layers": [
            { "weights": hidden, "bias": [-5.0, -1.0], "activation": "relu" },
            { "weights": [[2.0], [3.0]], "bias": [-1.5], "activation": "sigmoid" }
        ]
    })
}

pub fn good_explainer() -> Value {
    json!({
        "kind": "kernel",
        "feature_names": FEATURE_NAMES,
        "background": [
            [30.0, 0.0, 0.0, 22.0, 5.0, 100.0, 0.0, 0.0],
            [60.0, 1.0, 0.0, 31.0, 6.5, 160.0, 1.0, 2.0],
            [50.0, 0.0, 1.0, 26.0, 5.5, 120.0, 1.0, 1.0]
        ]
    })
}

pub fn bad_explainer() -> Value {
    json!({
        "kind": "linear",
        "feature_names": FEATURE_NAMES,
        "expected_value": [0.4],
        "coefficients": [0.0, 0.0, 0.0, 0.0, 0.3, 0.004, 0.0, 0.0],
        "means": [41.0, 0.07, 0.04, 27.3, 5.5, 138.0, 0.41, 1.2]
    })
}

pub fn bzip2(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Fixture artifacts on disk plus the environment that points at them.
pub struct TestArtifacts {
    pub dir: TempDir,
    vars: HashMap<String, String>,
}

impl TestArtifacts {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path();

        std::fs::write(root.join("good_model.json"), good_model().to_string()).unwrap();
        std::fs::write(
            root.join("explainer_good.json.bz2"),
            bzip2(good_explainer().to_string().as_bytes()),
        )
        .unwrap();
        std::fs::write(root.join("bad_model.json"), bad_model().to_string()).unwrap();
        std::fs::write(root.join("explainer_bad.json"), bad_explainer().to_string()).unwrap();
        std::fs::write(root.join("notes.txt"), "fit on the 2023 cohort\n").unwrap();

        let path = |name: &str| root.join(name).to_string_lossy().into_owned();
        let static_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("static");

        let vars = HashMap::from([
            ("GOOD_MODEL_PATH".to_string(), path("good_model.json")),
            ("GOOD_EXPLAINER_PATH".to_string(), path("explainer_good.json.bz2")),
            ("GOOD_NOTES_PATH".to_string(), path("notes.txt")),
            ("BAD_MODEL_PATH".to_string(), path("bad_model.json")),
            ("BAD_EXPLAINER_PATH".to_string(), path("explainer_bad.json")),
            (
                "STATIC_DIR".to_string(),
                static_dir.to_string_lossy().into_owned(),
            ),
        ]);

        Self { dir, vars }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) {
        std::fs::write(self.path(name), contents).unwrap();
    }

    pub fn config(&self) -> PredictionConfig {
        self.config_with(&[])
    }

    pub fn config_with(&self, overrides: &[(&str, &str)]) -> PredictionConfig {
        let mut vars = self.vars.clone();
        for (key, value) in overrides {
            vars.insert(key.to_string(), value.to_string());
        }
        let common = Config {
            port: 0,
            ..Config::default()
        };
        PredictionConfig::from_lookup(common, false, |key| vars.get(key).cloned())
            .expect("Failed to build test config")
    }

    pub fn router(&self) -> Router {
        router_for(self.config())
    }
}

pub fn router_for(config: PredictionConfig) -> Router {
    METRICS.call_once(|| {
        let _ = init_metrics();
    });
    build_router(AppState::new(config).expect("Failed to build app state"))
}

/// POST `body` to `uri` and decode the JSON response.
pub async fn post_json(router: &Router, uri: &str, body: impl Into<String>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.into()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// A running server bound to an ephemeral port.
pub struct TestApp {
    pub address: String,
    pub artifacts: TestArtifacts,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestArtifacts::new(), &[]).await
    }

    pub async fn spawn_with(artifacts: TestArtifacts, overrides: &[(&str, &str)]) -> Self {
        METRICS.call_once(|| {
            let _ = init_metrics();
        });

        let application = Application::build(artifacts.config_with(overrides))
            .await
            .expect("Failed to build application");
        let address = format!("http://127.0.0.1:{}", application.port());

        tokio::spawn(async move {
            let _ = application.run_until_stopped().await;
        });

        Self { address, artifacts }
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}
