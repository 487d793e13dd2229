//! Prometheus metrics for booking-service.
//!
//! HTTP request metrics are recorded through the `metrics` facade by the service-core
//! middleware and exported by the installed Prometheus recorder; domain counters live in
//! the default `prometheus` registry. `/metrics` serves both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Histogram,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

static RECORDER_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Reservations created, by outcome.
pub static RESERVATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "booking_reservations_total",
        "Total number of reservations created",
        &["channel"] // direct, stripe
    )
    .expect("Failed to register reservations_total")
});

/// Payments moved to ACCEPTED, by method.
pub static PAYMENTS_CONFIRMED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "booking_payments_confirmed_total",
        "Total number of payments confirmed",
        &["method"]
    )
    .expect("Failed to register payments_confirmed_total")
});

/// Invoice pipeline outcomes.
pub static INVOICES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "booking_invoices_total",
        "Total number of invoices by status",
        &["status"] // generated, sent, reused, failed
    )
    .expect("Failed to register invoices_total")
});

pub static INVOICE_RENDER_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "booking_invoice_render_seconds",
        "Invoice document rendering duration in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register invoice_render_seconds")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "booking_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Stripe webhook events by type and outcome.
pub static WEBHOOK_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "booking_webhook_events_total",
        "Total number of Stripe webhook events",
        &["event_type", "outcome"]
    )
    .expect("Failed to register webhook_events_total")
});

/// Initialize all metrics and install the HTTP metrics recorder.
///
/// Safe to call more than once; only the first call installs the recorder.
pub fn init_metrics() {
    Lazy::force(&RESERVATIONS_TOTAL);
    Lazy::force(&PAYMENTS_CONFIRMED_TOTAL);
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&INVOICE_RENDER_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&WEBHOOK_EVENTS_TOTAL);

    if RECORDER_HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = RECORDER_HANDLE.set(handle);
            }
            Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
        }
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = RECORDER_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    output.push_str(&encoder.encode_to_string(&metric_families).unwrap_or_default());
    output
}
