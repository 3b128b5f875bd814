use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Prometheus scrape endpoint, text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service records.
pub fn describe() {
    metrics::describe_counter!(
        "ocr_items_submitted_total",
        "Images accepted into the queue"
    );
    metrics::describe_counter!(
        "ocr_items_rejected_total",
        "Submitted files skipped for not being PNG images"
    );
    metrics::describe_counter!(
        "ocr_items_completed_total",
        "Images recognised successfully"
    );
    metrics::describe_counter!("ocr_items_failed_total", "Images whose recognition failed");
    metrics::describe_counter!(
        "ocr_runs_aborted_total",
        "Batch runs aborted because the engine could not start"
    );
    metrics::describe_histogram!(
        "ocr_recognition_seconds",
        "Time to recognise a single image"
    );
    metrics::describe_gauge!("ocr_queue_pending", "Images waiting for the next run");
}
