//! Event metric type: validate a record request, stamp it with the
//! monotonic timestamp, and forward it to the events database.

use super::{CommonMetricData, record_error};
use crate::core::Glean;
use crate::error::ErrorKind;
use crate::events::recorded::RecordedEvent;
use crate::ping::REASON_MAX_CAPACITY;
use crate::utils::debug_log;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

/// String extra values longer than this are truncated.
pub const MAX_EXTRA_VALUE_LENGTH: usize = 500;

pub struct EventMetric {
    meta: CommonMetricData,
    allowed_extra_keys: Vec<String>,
}

impl EventMetric {
    /// A metric whose category or name violates the identifier pattern
    /// is permanently disabled; nothing it records can be keyed sanely.
    pub fn new(mut meta: CommonMetricData, allowed_extra_keys: Vec<String>) -> Self {
        if !meta.is_valid() {
            debug_log(&format!(
                "invalid event metric identifier {}, disabling",
                meta.identifier()
            ));
            meta.disabled = true;
        }
        Self {
            meta,
            allowed_extra_keys,
        }
    }

    pub fn meta(&self) -> &CommonMetricData {
        &self.meta
    }

    /// Record an occurrence of this event.
    ///
    /// Never fails: invalid input is rejected with an error counted
    /// against this metric and the event dropped.
    pub fn record(&self, glean: &Glean, extras: Option<HashMap<String, Value>>) {
        if self.meta.disabled || !glean.is_upload_enabled() {
            return;
        }

        let extra = match self.validate_extras(glean, extras) {
            Some(extra) => extra,
            None => return,
        };

        let timestamp = glean.clock().now_ms() as i64;
        let event = RecordedEvent::new(
            self.meta.category.clone(),
            self.meta.name.clone(),
            timestamp,
            extra,
        );
        if glean.events().record(&self.meta, &event) {
            glean.submit_events_ping(REASON_MAX_CAPACITY);
        }
    }

    /// Returns the validated extras, or `None` when the whole event must
    /// be rejected (the outer Option): reserved keys, undeclared keys and
    /// unsupported value shapes reject; overlong strings only truncate.
    fn validate_extras(
        &self,
        glean: &Glean,
        extras: Option<HashMap<String, Value>>,
    ) -> Option<Option<Map<String, Value>>> {
        let Some(extras) = extras else {
            return Some(None);
        };

        let metric_id = self.meta.identifier();
        let mut validated = Map::new();
        for (key, value) in extras {
            if key.starts_with('#') {
                debug_log(&format!("reserved extra key {} passed to {}", key, metric_id));
                record_error(glean.metrics(), &metric_id, ErrorKind::InvalidValue);
                return None;
            }
            if !self.allowed_extra_keys.iter().any(|allowed| allowed == &key) {
                debug_log(&format!("undeclared extra key {} passed to {}", key, metric_id));
                record_error(glean.metrics(), &metric_id, ErrorKind::InvalidValue);
                return None;
            }

            let value = match value {
                Value::String(s) if s.chars().count() > MAX_EXTRA_VALUE_LENGTH => {
                    record_error(glean.metrics(), &metric_id, ErrorKind::InvalidOverflow);
                    json!(s.chars().take(MAX_EXTRA_VALUE_LENGTH).collect::<String>())
                }
                Value::String(s) => json!(s),
                Value::Number(n) => Value::Number(n),
                _ => {
                    record_error(glean.metrics(), &metric_id, ErrorKind::InvalidType);
                    return None;
                }
            };
            validated.insert(key, value);
        }

        if validated.is_empty() {
            Some(None)
        } else {
            Some(Some(validated))
        }
    }

    /// Public payloads recorded for this metric in `ping`. Test-only.
    pub fn test_get_value(&self, glean: &Glean, ping: &str) -> Option<Vec<Value>> {
        let events = glean.events().get_ping_events(ping, false)?;
        let matching: Vec<Value> = events
            .into_iter()
            .filter(|event| {
                event["category"] == json!(self.meta.category)
                    && event["name"] == json!(self.meta.name)
            })
            .collect();
        if matching.is_empty() { None } else { Some(matching) }
    }
}
