//! Prometheus metrics for the security layer.
//!
//! Recording is always on; the values only go anywhere once a recorder is
//! installed with [`init_metrics`].

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use octoguard_storage::StoreError;
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const STORE_ERRORS_TOTAL: &str = "octoguard_store_errors_total";
    pub const CSRF_ISSUED_TOTAL: &str = "octoguard_csrf_issued_total";
    pub const CSRF_VALIDATIONS_TOTAL: &str = "octoguard_csrf_validations_total";
    pub const VIOLATIONS_TOTAL: &str = "octoguard_violations_total";
    pub const IP_BLOCKS_TOTAL: &str = "octoguard_ip_blocks_total";
    pub const AUDIT_ENTRIES: &str = "octoguard_audit_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `false` if a recorder was already installed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record a swallowed store failure.
pub fn record_store_error(component: &'static str, error: &StoreError) {
    counter!(
        names::STORE_ERRORS_TOTAL,
        "component" => component,
        "category" => error.category().to_string()
    )
    .increment(1);
}

pub fn record_csrf_issued() {
    counter!(names::CSRF_ISSUED_TOTAL).increment(1);
}

/// Record a CSRF validation outcome (`accepted`, `missing`, `mismatch`, `replayed`, `malformed`).
pub fn record_csrf_validation(outcome: &'static str) {
    counter!(names::CSRF_VALIDATIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_violation() {
    counter!(names::VIOLATIONS_TOTAL).increment(1);
}

/// Record a new block (`automatic` or `manual`).
pub fn record_ip_block(kind: &'static str) {
    counter!(names::IP_BLOCKS_TOTAL, "kind" => kind).increment(1);
}

pub fn set_audit_entries(count: u64) {
    gauge!(names::AUDIT_ENTRIES).set(count as f64);
}
