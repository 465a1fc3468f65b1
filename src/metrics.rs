//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{Gauge, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "fediwiki_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref ACTIVITYPUB_ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_activitypub_activities_received_total", "Total number of ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITYPUB_ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_activitypub_activities_sent_total", "Total number of ActivityPub activities sent"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_federation_requests_total", "Total number of federation requests"),
        &["direction", "status"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "fediwiki_federation_request_duration_seconds",
            "Federation request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["direction"]
    ).expect("metric can be created");
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_deliveries_total", "Total number of follower deliveries"),
        &["result"]
    ).expect("metric can be created");
    pub static ref REPLAYED_OBJECTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_replayed_objects_total", "Total number of unprocessed objects replayed at startup"),
        &["result"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("fediwiki_cache_size", "Current number of items in cache"),
        &["cache_name"]
    ).expect("metric can be created");

    // Application Metrics
    pub static ref APP_UPTIME_SECONDS: Gauge = Gauge::new(
        "fediwiki_app_uptime_seconds",
        "Application uptime in seconds"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fediwiki_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
            .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(ACTIVITYPUB_ACTIVITIES_RECEIVED.clone()))
            .expect("ACTIVITYPUB_ACTIVITIES_RECEIVED can be registered");
        REGISTRY
            .register(Box::new(ACTIVITYPUB_ACTIVITIES_SENT.clone()))
            .expect("ACTIVITYPUB_ACTIVITIES_SENT can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_REQUESTS_TOTAL.clone()))
            .expect("FEDERATION_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()))
            .expect("FEDERATION_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(DELIVERIES_TOTAL.clone()))
            .expect("DELIVERIES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(REPLAYED_OBJECTS_TOTAL.clone()))
            .expect("REPLAYED_OBJECTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("CACHE_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("CACHE_MISSES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_SIZE.clone()))
            .expect("CACHE_SIZE can be registered");
        REGISTRY
            .register(Box::new(APP_UPTIME_SECONDS.clone()))
            .expect("APP_UPTIME_SECONDS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
