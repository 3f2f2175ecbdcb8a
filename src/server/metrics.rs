use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all librarian metrics
const PREFIX: &str = "librarian";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["partition", "method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["partition", "method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    pub static ref DOWNLOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_downloads_total"), "Downloads by where the bytes came from"),
        &["partition", "source"]
    ).expect("Failed to create downloads_total metric");

    // Upload Metrics
    pub static ref UPLOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_uploads_total"), "Upload connections by outcome"),
        &["partition", "outcome"]
    ).expect("Failed to create uploads_total metric");

    pub static ref UPLOADED_BYTES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_uploaded_bytes_total"), "Bytes committed by uploads"),
        &["partition"]
    ).expect("Failed to create uploaded_bytes_total metric");

    // Tiered Storage Metrics
    pub static ref SWIFT_FEED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_swift_feed_total"), "Object store copies by outcome"),
        &["partition", "outcome"]
    ).expect("Failed to create swift_feed_total metric");

    // Garbage Collection Metrics
    pub static ref GC_REMOVALS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_gc_removals_total"), "Items removed by garbage collection"),
        &["partition", "kind"]
    ).expect("Failed to create gc_removals_total metric");

    pub static ref CONTENT_COUNT: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_content_count"), "Live content rows"),
        &["partition"]
    ).expect("Failed to create content_count metric");

    pub static ref CONTENT_BYTES: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_content_bytes"), "Total bytes of live content"),
        &["partition"]
    ).expect("Failed to create content_bytes metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job runs"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Process Metrics
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
    let _ = REGISTRY.register(Box::new(DOWNLOADS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOADS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOADED_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SWIFT_FEED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GC_REMOVALS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CONTENT_COUNT.clone()));
    let _ = REGISTRY.register(Box::new(CONTENT_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapse request paths into a bounded label set.
pub fn categorize_endpoint(path: &str) -> &'static str {
    match path {
        "/robots.txt" => "robots",
        "/health" => "health",
        "/search" => "search",
        _ => "file",
    }
}

/// Record an HTTP request
pub fn record_http_request(
    partition: &str,
    method: &str,
    path: &str,
    status: u16,
    duration: Duration,
) {
    let category = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[partition, method, category, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[partition, method, category])
        .observe(duration.as_secs_f64());
}

pub fn record_download(partition: &str, source: &str) {
    DOWNLOADS_TOTAL.with_label_values(&[partition, source]).inc();
}

pub fn record_upload(partition: &str, outcome: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[partition, outcome]).inc();
    if bytes > 0 {
        UPLOADED_BYTES_TOTAL
            .with_label_values(&[partition])
            .inc_by(bytes as f64);
    }
}

pub fn record_swift_feed(partition: &str, outcome: &str) {
    SWIFT_FEED_TOTAL
        .with_label_values(&[partition, outcome])
        .inc();
}

pub fn record_gc_removals(partition: &str, kind: &str, count: usize) {
    if count > 0 {
        GC_REMOVALS_TOTAL
            .with_label_values(&[partition, kind])
            .inc_by(count as f64);
    }
}

pub fn set_content_gauges(partition: &str, count: u64, bytes: u64) {
    CONTENT_COUNT.with_label_values(&[partition]).set(count as f64);
    CONTENT_BYTES.with_label_values(&[partition]).set(bytes as f64);
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // Parse the RSS (Resident Set Size) in kB
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

    fn has_family(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_http_request() {
        init_metrics();
        record_http_request("public", "GET", "/7/a.txt", 200, Duration::from_millis(50));
        assert!(has_family("librarian_http_requests_total"));
    }

    #[test]
    fn test_record_upload_and_gauges() {
        init_metrics();
        record_upload("restricted", "committed", 1024);
        set_content_gauges("restricted", 3, 4096);
        assert!(has_family("librarian_uploads_total"));
        assert!(has_family("librarian_uploaded_bytes_total"));
        assert_eq!(
            CONTENT_BYTES.with_label_values(&["restricted"]).get(),
            4096.0
        );
    }

    #[test]
    fn test_categorize_endpoint() {
        assert_eq!(categorize_endpoint("/robots.txt"), "robots");
        assert_eq!(categorize_endpoint("/search"), "search");
        assert_eq!(categorize_endpoint("/42/file.txt"), "file");
    }
}
