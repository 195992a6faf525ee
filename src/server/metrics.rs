use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all Mist metrics
const PREFIX: &str = "mist";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Ingestion Metrics
    pub static ref INGESTION_JOBS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingestion_jobs_total"), "Ingestion jobs by final status"),
        &["status"]
    ).expect("Failed to create ingestion_jobs_total metric");

    pub static ref PIPELINE_STEP_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_pipeline_step_duration_seconds"),
            "Duration of ingestion pipeline steps in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0]),
        &["step"]
    ).expect("Failed to create pipeline_step_duration_seconds metric");

    pub static ref PIPELINE_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_pipeline_retries_total"), "Retried ingestion pipeline steps"),
        &["step"]
    ).expect("Failed to create pipeline_retries_total metric");

    // Key Delivery Metrics
    pub static ref KEY_DELIVERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_key_deliveries_total"), "Key delivery responses"),
        &["result"]
    ).expect("Failed to create key_deliveries_total metric");

    // Listening Metrics
    pub static ref LISTENING_MINUTES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_listening_minutes_total"), "Listening minutes accounted"),
        &["tier"]
    ).expect("Failed to create listening_minutes_total metric");

    pub static ref QUOTA_REJECTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_quota_rejections_total"), "Listen starts rejected for quota"),
        &["tier"]
    ).expect("Failed to create quota_rejections_total metric");

    // Gateway Metrics
    pub static ref BLOCKED_REQUESTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_blocked_requests_total"),
        "Requests rejected because the caller IP is blocked"
    ).expect("Failed to create blocked_requests_total metric");

    // Catalog Metrics
    pub static ref CATALOG_TRACKS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_catalog_tracks"), "Tracks in the catalog by status"),
        &["status"]
    ).expect("Failed to create catalog_tracks metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_runs_total"), "Background job executions"),
        &["job", "status"]
    ).expect("Failed to create background_job_runs_total metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(INGESTION_JOBS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_STEP_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(KEY_DELIVERIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LISTENING_MINUTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(QUOTA_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BLOCKED_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_TRACKS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record the final status of an ingestion job run
pub fn record_job_outcome(status: &str) {
    INGESTION_JOBS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_step_duration(step: &str, duration: Duration) {
    PIPELINE_STEP_DURATION_SECONDS
        .with_label_values(&[step])
        .observe(duration.as_secs_f64());
}

pub fn record_step_retry(step: &str) {
    PIPELINE_RETRIES_TOTAL.with_label_values(&[step]).inc();
}

/// `result` is one of `served`, `not_modified`
pub fn record_key_delivery(result: &str) {
    KEY_DELIVERIES_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_listening_minutes(tier: &str, minutes: f64) {
    if minutes > 0.0 {
        LISTENING_MINUTES_TOTAL
            .with_label_values(&[tier])
            .inc_by(minutes);
    }
}

pub fn record_quota_rejection(tier: &str) {
    QUOTA_REJECTIONS_TOTAL.with_label_values(&[tier]).inc();
}

pub fn record_blocked_request() {
    BLOCKED_REQUESTS_TOTAL.inc();
}

pub fn set_catalog_tracks(status: &str, count: usize) {
    CATALOG_TRACKS
        .with_label_values(&[status])
        .set(count as f64);
}

pub fn record_background_job_run(job: &str, status: &str) {
    BACKGROUND_JOB_RUNS_TOTAL
        .with_label_values(&[job, status])
        .inc();
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_metric(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_record_http_request() {
        init_metrics();
        record_http_request("GET", "/v1/tracks/{id}", 200, Duration::from_millis(50));
        assert!(has_metric("mist_http_requests_total"));
    }

    #[test]
    fn test_pipeline_metrics() {
        init_metrics();
        record_job_outcome("completed");
        record_step_duration("transcode", Duration::from_secs(12));
        record_step_retry("fetch");

        assert!(has_metric("mist_ingestion_jobs_total"));
        assert!(has_metric("mist_pipeline_step_duration_seconds"));
        assert!(has_metric("mist_pipeline_retries_total"));
    }

    #[test]
    fn test_listening_minutes_ignores_non_positive() {
        init_metrics();
        let before = LISTENING_MINUTES_TOTAL
            .with_label_values(&["metrics_test"])
            .get();
        record_listening_minutes("metrics_test", 0.0);
        record_listening_minutes("metrics_test", -2.0);
        record_listening_minutes("metrics_test", 1.5);
        let after = LISTENING_MINUTES_TOTAL
            .with_label_values(&["metrics_test"])
            .get();
        assert!((after - before - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_metrics_handler_encodes() {
        init_metrics();
        record_blocked_request();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
