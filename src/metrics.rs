//! Prometheus metrics for the batch relayer
//!
//! Status values reported by the executors and the step counters of the state machines are
//! registered in the default registry; [`gather_text`] renders it for scraping.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::Result;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

use crate::clients::{StatusHandler, METRIC_LAST_ERROR};

lazy_static! {
    // Integer status values reported through a status handler
    pub static ref STATUS_INT: IntGaugeVec = register_int_gauge_vec!(
        "relayer_status_int",
        "Integer status metrics reported by the bridge executors",
        &["handler", "metric"]
    ).unwrap();

    // State machine progress
    pub static ref STEPS_EXECUTED: IntCounterVec = register_int_counter_vec!(
        "relayer_steps_executed_total",
        "Total number of state machine steps executed",
        &["flow", "step"]
    ).unwrap();

    // Health
    pub static ref LAST_ERROR_TIMESTAMP: IntGaugeVec = register_int_gauge_vec!(
        "relayer_last_error_timestamp",
        "Unix timestamp of the last warning or error reported by an executor",
        &["handler"]
    ).unwrap();
}

/// Record one executed step
pub fn record_step_executed(flow: &str, step: &str) {
    STEPS_EXECUTED.with_label_values(&[flow, step]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn gather_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Status handler backed by the Prometheus registry
///
/// Integer metrics become `relayer_status_int{handler, metric}`. String metrics have no
/// Prometheus form and are kept in memory; a `last error` update also stamps
/// `relayer_last_error_timestamp{handler}`.
#[derive(Debug)]
pub struct MetricsStatusHandler {
    name: String,
    strings: Mutex<HashMap<String, String>>,
}

impl MetricsStatusHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strings: Mutex::new(HashMap::new()),
        }
    }

    pub fn string_metric(&self, metric: &str) -> Option<String> {
        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(metric)
            .cloned()
    }

    pub fn int_metric(&self, metric: &str) -> i64 {
        STATUS_INT.with_label_values(&[&self.name, metric]).get()
    }
}

impl StatusHandler for MetricsStatusHandler {
    fn set_int_metric(&self, metric: &str, value: i64) {
        STATUS_INT
            .with_label_values(&[&self.name, metric])
            .set(value);
    }

    fn set_string_metric(&self, metric: &str, value: String) {
        if metric == METRIC_LAST_ERROR {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs() as i64)
                .unwrap_or_default();
            LAST_ERROR_TIMESTAMP
                .with_label_values(&[&self.name])
                .set(timestamp);
        }

        self.strings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metric.to_string(), value);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::METRIC_NUM_BATCHES;

    #[test]
    fn test_int_metrics_go_to_the_gauge() {
        let handler = MetricsStatusHandler::new("metrics-test-int");
        handler.set_int_metric(METRIC_NUM_BATCHES, 41);
        handler.set_int_metric(METRIC_NUM_BATCHES, 42);

        assert_eq!(handler.int_metric(METRIC_NUM_BATCHES), 42);
        assert_eq!(handler.name(), "metrics-test-int");
    }

    #[test]
    fn test_last_error_is_timestamped() {
        let handler = MetricsStatusHandler::new("metrics-test-error");
        handler.set_string_metric("other", "value".to_string());
        assert_eq!(
            LAST_ERROR_TIMESTAMP
                .with_label_values(&["metrics-test-error"])
                .get(),
            0
        );

        handler.set_string_metric(METRIC_LAST_ERROR, "ERROR: boom".to_string());
        assert_eq!(
            handler.string_metric(METRIC_LAST_ERROR),
            Some("ERROR: boom".to_string())
        );
        assert!(
            LAST_ERROR_TIMESTAMP
                .with_label_values(&["metrics-test-error"])
                .get()
                > 0
        );
    }

    #[test]
    fn test_gather_text_contains_step_counter() {
        record_step_executed("metrics-test-flow", "SomeStep");
        let text = gather_text().unwrap();
        assert!(text.contains("relayer_steps_executed_total"));
        assert!(text.contains("metrics-test-flow"));
    }
}
