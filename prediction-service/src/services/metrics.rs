use crate::models::Variant;
use anyhow::Context;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Calling it again is a no-op.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    if METRICS_HANDLE.set(handle).is_err() {
        tracing::warn!("Metrics recorder was initialized concurrently");
    }

    describe_counter!("predictions_total", "Prediction requests by variant and outcome");
    describe_histogram!(
        "prediction_duration_seconds",
        "Time spent on inference, attribution and rendering"
    );
    describe_counter!("artifact_loads_total", "Artifact pairs read from disk");
    describe_counter!("artifact_cache_hits_total", "Artifact pairs served from the cache");

    Ok(())
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// `outcome` is `ok` or the error kind.
pub fn record_prediction(variant: Variant, outcome: &str, elapsed: Duration) {
    counter!(
        "predictions_total",
        "variant" => variant.as_str(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!("prediction_duration_seconds", "variant" => variant.as_str())
        .record(elapsed.as_secs_f64());
}

pub fn record_artifact_load(variant: Variant) {
    counter!("artifact_loads_total", "variant" => variant.as_str()).increment(1);
}

pub fn record_cache_hit(variant: Variant) {
    counter!("artifact_cache_hits_total", "variant" => variant.as_str()).increment(1);
}
