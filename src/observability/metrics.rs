//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_dispatch_total` (counter): dispatch decisions by target
//! - `edge_upgrade_total` (counter): upgrade hand-offs by outcome
//! - `edge_auth_rejected_total` (counter): access gate rejections
//! - `edge_active_connections` (gauge): current connection count
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::http::dispatch::DispatchTarget;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_dispatch(target: &DispatchTarget) {
    metrics::counter!("edge_dispatch_total", "target" => target.label()).increment(1);
}

pub fn record_upgrade(outcome: &'static str) {
    metrics::counter!("edge_upgrade_total", "outcome" => outcome).increment(1);
}

pub fn record_auth_rejected() {
    metrics::counter!("edge_auth_rejected_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("edge_active_connections").set(count as f64);
}
