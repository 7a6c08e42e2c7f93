use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

use crate::assets::AssetStatistics;

/// Metric name prefix for all asset server metrics
const PREFIX: &str = "signsphere";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Ingestion Metrics
    pub static ref INGESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingests_total"), "Accepted uploads"),
        &["variant"]
    ).expect("Failed to create ingests_total metric");

    pub static ref INGEST_REJECTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingest_rejections_total"), "Rejected uploads"),
        &["reason"]
    ).expect("Failed to create ingest_rejections_total metric");

    // Transcoding Metrics
    pub static ref TRANSCODES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_transcodes_total"), "Finished transcode tasks"),
        &["outcome"]
    ).expect("Failed to create transcodes_total metric");

    pub static ref TRANSCODE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_transcode_duration_seconds"),
            "Wall time spent normalizing one clip"
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["outcome"]
    ).expect("Failed to create transcode_duration_seconds metric");

    pub static ref TRANSCODE_QUEUE_DEPTH: IntGauge = IntGauge::new(
        format!("{PREFIX}_transcode_queue_depth"),
        "Transcode tasks queued or running"
    ).expect("Failed to create transcode_queue_depth metric");

    // Catalog Metrics
    pub static ref CATALOG_ASSETS: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_catalog_assets"), "Active assets per variant"),
        &["variant"]
    ).expect("Failed to create catalog_assets metric");

    pub static ref CATALOG_SIZE_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_catalog_size_bytes"),
        "Total size of active assets in bytes"
    ).expect("Failed to create catalog_size_bytes metric");
}

pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(INGESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INGEST_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRANSCODES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TRANSCODE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TRANSCODE_QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_ASSETS.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_SIZE_BYTES.clone()));
}

pub fn record_ingest(variant: &str) {
    INGESTS_TOTAL.with_label_values(&[variant]).inc();
}

pub fn record_ingest_rejection(reason: &str) {
    INGEST_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record a finished transcode task
pub fn record_transcode(outcome: &str, duration: Duration) {
    TRANSCODES_TOTAL.with_label_values(&[outcome]).inc();
    TRANSCODE_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

pub fn transcode_enqueued() {
    TRANSCODE_QUEUE_DEPTH.inc();
}

pub fn transcode_dequeued() {
    TRANSCODE_QUEUE_DEPTH.dec();
}

pub fn update_catalog_metrics(stats: &AssetStatistics) {
    for (variant, count) in &stats.active_by_variant {
        CATALOG_ASSETS
            .with_label_values(&[variant.as_str()])
            .set(*count as f64);
    }
    CATALOG_SIZE_BYTES.set(stats.total_size_bytes as f64);
}

/// Text exposition of every registered metric.
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics are not valid UTF-8")
}
