use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static LOOKUP_OUTCOMES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static FIELD_CACHE_ENTRIES: OnceLock<IntGauge> = OnceLock::new();
static STORE_QUERY_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("mama_http_requests_total", "HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create mama_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "mama_http_request_duration_seconds",
                    "HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create mama_http_request_duration_seconds"),
        )
    })
}

fn lookup_outcomes_total() -> &'static IntCounterVec {
    LOOKUP_OUTCOMES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("mama_lookup_outcomes_total", "Item lookup outcomes."),
                &["outcome"],
            )
            .expect("create mama_lookup_outcomes_total"),
        )
    })
}

fn field_cache_entries() -> &'static IntGauge {
    FIELD_CACHE_ENTRIES.get_or_init(|| {
        register_collector(
            IntGauge::new(
                "mama_field_cache_entries",
                "Resolved field names held in the field cache.",
            )
            .expect("create mama_field_cache_entries"),
        )
    })
}

fn store_query_duration_seconds() -> &'static HistogramVec {
    STORE_QUERY_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "mama_store_query_duration_seconds",
                    "Metadata store call duration in seconds.",
                )
                .buckets(vec![
                    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
                ]),
                &["query", "outcome"],
            )
            .expect("create mama_store_query_duration_seconds"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_lookup_outcome(outcome: &str) {
    lookup_outcomes_total().with_label_values(&[outcome]).inc();
}

pub fn observe_store_query(query: &str, outcome: &str, duration: Duration) {
    store_query_duration_seconds()
        .with_label_values(&[query, outcome])
        .observe(duration.as_secs_f64());
}

pub fn set_field_cache_entries(entries: usize) {
    field_cache_entries().set(i64::try_from(entries).unwrap_or(i64::MAX));
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = lookup_outcomes_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
