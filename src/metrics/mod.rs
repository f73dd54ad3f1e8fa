//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Broadcasts and fee bumps
//! - Nonce conflict recovery
//! - Confirmed, failed and replaced submissions

use crate::error::{TxError, TxResult};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref TX_BROADCAST: CounterVec = register_counter_vec!(
        "txmanager_transactions_broadcast_total",
        "Total signed transactions handed to the primary endpoint",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref TX_GAS_BUMPS: CounterVec = register_counter_vec!(
        "txmanager_gas_bumps_total",
        "Total fee bumps applied to pending transactions",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref TX_NONCE_RETRIES: CounterVec = register_counter_vec!(
        "txmanager_nonce_retries_total",
        "Total nonce increments after a nonce conflict",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "txmanager_transactions_confirmed_total",
        "Total transactions that reached the required confirmations",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "txmanager_transactions_failed_total",
        "Total submissions that ended in an error",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref TX_REPLACED: CounterVec = register_counter_vec!(
        "txmanager_transactions_replaced_total",
        "Total successful replacements and cancellations",
        &["chain_id"]
    ).expect("metric can be registered");

    pub static ref SECONDARY_FAILURES: CounterVec = register_counter_vec!(
        "txmanager_secondary_broadcast_failures_total",
        "Total failed sends to secondary endpoints",
        &[]
    ).expect("metric can be registered");

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "txmanager_confirmation_latency_seconds",
        "Time from send to required confirmations",
        &["chain_id"],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).expect("metric can be registered");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> TxResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TxError::Config(format!("Cannot bind metrics port: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TxError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    gather()
}

/// Render all registered metrics in the text exposition format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

fn label(chain_id: Option<u64>) -> String {
    chain_id.unwrap_or_default().to_string()
}

pub fn record_broadcast(chain_id: Option<u64>) {
    TX_BROADCAST.with_label_values(&[&label(chain_id)]).inc();
}

pub fn record_gas_bump(chain_id: Option<u64>) {
    TX_GAS_BUMPS.with_label_values(&[&label(chain_id)]).inc();
}

pub fn record_nonce_retry(chain_id: Option<u64>) {
    TX_NONCE_RETRIES.with_label_values(&[&label(chain_id)]).inc();
}

pub fn record_confirmed(chain_id: Option<u64>, latency_secs: f64) {
    let label = label(chain_id);
    TX_CONFIRMED.with_label_values(&[&label]).inc();
    TX_LATENCY.with_label_values(&[&label]).observe(latency_secs);
}

pub fn record_failed(chain_id: Option<u64>) {
    TX_FAILED.with_label_values(&[&label(chain_id)]).inc();
}

pub fn record_replaced(chain_id: Option<u64>) {
    TX_REPLACED.with_label_values(&[&label(chain_id)]).inc();
}

pub fn record_secondary_failure() {
    SECONDARY_FAILURES.with_label_values(&[]).inc();
}
