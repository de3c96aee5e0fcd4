//! Metric metadata and metric types.
//!
//! Only the pieces the events subsystem needs: shared metric metadata,
//! counter bookkeeping (execution counters, error counters) and the event
//! metric type itself.

pub mod counter;
pub mod database;
pub mod event;

pub use counter::CounterMetric;
pub use database::MetricsDatabase;
pub use event::EventMetric;

use crate::error::ErrorKind;
use crate::utils::debug_log;
use regex::Regex;
use std::sync::OnceLock;

/// Pattern both the category and the name of a metric must match.
fn base_identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]{0,29}$").unwrap())
}

/// Metadata shared by every metric instance.
#[derive(Debug, Clone)]
pub struct CommonMetricData {
    pub category: String,
    pub name: String,
    /// Pings this metric's recordings are routed into.
    pub send_in_pings: Vec<String>,
    pub disabled: bool,
}

impl CommonMetricData {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        send_in_pings: Vec<String>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            send_in_pings,
            disabled: false,
        }
    }

    /// `category.name`, or just `name` for category-less metrics.
    pub fn identifier(&self) -> String {
        if self.category.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.category, self.name)
        }
    }

    pub fn is_valid(&self) -> bool {
        let re = base_identifier_regex();
        re.is_match(&self.name) && (self.category.is_empty() || re.is_match(&self.category))
    }
}

/// Bump the error counter `glean.error.<kind>` for `metric_id`.
///
/// Writes directly through the metrics database rather than a
/// CounterMetric so a failing error write can never recurse.
pub(crate) fn record_error(metrics: &MetricsDatabase, metric_id: &str, kind: ErrorKind) {
    debug_log(&format!("{} error recorded for {}", kind, metric_id));
    metrics.add_counter(&format!("glean.error.{}", kind), metric_id, 1);
}

pub(crate) fn num_recorded_errors(
    metrics: &MetricsDatabase,
    metric_id: &str,
    kind: ErrorKind,
) -> i64 {
    metrics
        .counter_value(&format!("glean.error.{}", kind), metric_id)
        .unwrap_or(0)
}
