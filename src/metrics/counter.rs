//! Counter metric type.

use super::{CommonMetricData, MetricsDatabase, record_error};
use crate::error::ErrorKind;

/// A counter scoped by key.
///
/// The events subsystem uses one instance for `glean.execution_counter`,
/// keyed by ping name: how many process lifetimes have contributed events
/// to that ping.
pub struct CounterMetric {
    meta: CommonMetricData,
}

impl CounterMetric {
    pub fn new(meta: CommonMetricData) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Add `amount` to the counter under `key`. Zero or negative amounts
    /// are rejected with an `InvalidValue` error.
    pub fn add(&self, metrics: &MetricsDatabase, key: &str, amount: i64) {
        if self.meta.disabled {
            return;
        }
        if amount <= 0 {
            record_error(metrics, &self.meta.identifier(), ErrorKind::InvalidValue);
            return;
        }
        metrics.add_counter(&self.meta.identifier(), key, amount);
    }

    pub fn set(&self, metrics: &MetricsDatabase, key: &str, value: i64) {
        if self.meta.disabled {
            return;
        }
        metrics.set_counter(&self.meta.identifier(), key, value);
    }

    /// Current value under `key`, or `None` when never set (or cleared).
    pub fn value(&self, metrics: &MetricsDatabase, key: &str) -> Option<i64> {
        metrics.counter_value(&self.meta.identifier(), key)
    }

    /// Leave the counter undefined for `key`.
    pub fn remove(&self, metrics: &MetricsDatabase, key: &str) {
        metrics.remove_counter(&self.meta.identifier(), key);
    }
}
