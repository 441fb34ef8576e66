//! Prometheus metrics for the feed read path and HTTP surface

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};
use std::time::Duration;

static FEED_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_requests_total",
        "Feed pages served, by where the page came from",
        &["source"]
    )
    .expect("Failed to register feed requests metric")
});

static FEED_CACHE_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_cache_events_total",
        "Response cache lookups (hit/miss/error)",
        &["event"]
    )
    .expect("Failed to register feed cache events metric")
});

static FEED_CACHE_WRITE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_cache_write_total",
        "Response cache writes (ok/error)",
        &["result"]
    )
    .expect("Failed to register feed cache write metric")
});

static FEED_FANOUT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "feed_fanout_total",
        "Fanout-merge attempts by result",
        &["result"]
    )
    .expect("Failed to register feed fanout metric")
});

static FEED_FANOUT_NEW_POSTS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "feed_fanout_new_posts",
        "Post ids added to a feed by one merge",
        vec![0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    )
    .expect("Failed to register feed fanout new posts metric")
});

static FEED_FANOUT_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "feed_fanout_duration_seconds",
        "Duration of one fanout-merge",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("Failed to register feed fanout duration metric")
});

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "HTTP requests by method, path and status",
        &["method", "path", "status"]
    )
    .expect("Failed to register http requests metric")
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latency",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http request duration metric")
});

/// Record where a served page came from (cache/store)
pub fn record_feed_request(source: &str) {
    FEED_REQUESTS_TOTAL.with_label_values(&[source]).inc();
}

/// Record a cache lookup outcome (hit/miss/error)
pub fn record_cache_event(event: &str) {
    FEED_CACHE_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_cache_write(result: &str) {
    FEED_CACHE_WRITE_TOTAL.with_label_values(&[result]).inc();
}

/// Record a fanout-merge result (merged/skipped/conflict/error)
pub fn record_fanout(result: &str) {
    FEED_FANOUT_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_fanout_new_posts(count: usize) {
    FEED_FANOUT_NEW_POSTS.observe(count as f64);
}

pub fn record_fanout_duration(duration: Duration) {
    FEED_FANOUT_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn observe_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Render the default registry in the Prometheus text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
