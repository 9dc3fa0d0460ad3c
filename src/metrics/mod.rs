//! Prometheus metrics for collector discovery
//!
//! This module provides metrics tracking for:
//! - Membership: number of collectors currently discovered
//! - Watch sessions: how sessions end, establishment failures, resyncs
//! - Callbacks: failed membership callback invocations
//!
//! # Usage
//!
//! `init_metrics()` registers all metrics; `DiscoveryClient::new` calls it,
//! and calling it again is harmless. If initialization fails, metrics
//! operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::OnceLock;

/// Name of the discovered-collector gauge
pub const COLLECTORS_DISCOVERED: &str = "opentelemetry_allocator_collectors_discovered";

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all discovery metrics
struct DiscoveryMetrics {
    collectors_discovered: Gauge,
    sessions: CounterVec,
    establish_failures: Counter,
    callback_failures: Counter,
    resyncs: Counter,
}

/// Global storage for discovery metrics
static DISCOVERY_METRICS: OnceLock<DiscoveryMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = collector_discovery::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
///     // Discovery continues without metrics
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = DiscoveryMetrics {
        collectors_discovered: register_gauge!(
            COLLECTORS_DISCOVERED,
            "Number of collectors discovered."
        )?,
        sessions: register_counter_vec!(
            "opentelemetry_allocator_watch_sessions_total",
            "Collector watch sessions by how they ended",
            &["outcome"]
        )?,
        establish_failures: register_counter!(
            "opentelemetry_allocator_watch_establish_failures_total",
            "Failed attempts to open a collector watch session"
        )?,
        callback_failures: register_counter!(
            "opentelemetry_allocator_membership_callback_failures_total",
            "Membership callback invocations that returned an error or panicked"
        )?,
        resyncs: register_counter!(
            "opentelemetry_allocator_membership_resyncs_total",
            "Full re-lists performed after the watch resource version expired"
        )?,
    };

    DISCOVERY_METRICS
        .set(metrics)
        .map_err(|_| "Discovery metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    DISCOVERY_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Overwrite the discovered-collector gauge with the current set size
pub fn set_collectors_discovered(count: usize) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.collectors_discovered.set(count as f64);
    }
}

/// Last value written to the discovered-collector gauge
pub fn collectors_discovered() -> Option<f64> {
    DISCOVERY_METRICS.get().map(|m| m.collectors_discovered.get())
}

/// Record how a watch session ended
pub fn record_session_end(outcome: &str) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.sessions.with_label_values(&[outcome]).inc();
    }
}

/// Record a failed attempt to open a watch session
pub fn record_establish_failure() {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.establish_failures.inc();
    }
}

/// Record a failed callback invocation
pub fn record_callback_failure() {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.callback_failures.inc();
    }
}

/// Record a full membership resync
pub fn record_resync() {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.resyncs.inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
