//! The recorded-event value object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Reserved extra key carrying the per-ping execution counter.
///
/// Present on every persisted event, stripped before external exposure.
/// Extra keys starting with `#` are reserved and never user-settable.
pub const EXECUTION_COUNTER_EXTRA: &str = "#execution_counter";

/// Category reserved for metrics produced by the SDK itself.
pub(crate) const RESERVED_CATEGORY: &str = "glean";
/// Name of the synthetic event separating process lifetimes in a buffer.
pub(crate) const RESTARTED_NAME: &str = "restarted";

/// A single recorded event.
///
/// The serde form is the raw on-disk representation, reserved extras
/// included; [`RecordedEvent::payload`] is the public one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub category: String,
    pub name: String,
    /// Milliseconds since a per-lifetime anchor. Never negative.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
}

impl RecordedEvent {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        timestamp: i64,
        extra: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            timestamp,
            extra,
        }
    }

    /// Synthesize a `glean.restarted` marker for a new lifetime.
    ///
    /// `timestamp` is the offset between the new and the previous
    /// lifetime's start times, i.e. the marker's position expressed on
    /// the previous lifetime's clock.
    pub(crate) fn restarted(execution_counter: i64, timestamp: i64) -> Self {
        let mut extra = Map::new();
        extra.insert(EXECUTION_COUNTER_EXTRA.to_string(), json!(execution_counter));
        Self::new(RESERVED_CATEGORY, RESTARTED_NAME, timestamp, Some(extra))
    }

    pub fn is_restarted(&self) -> bool {
        self.category == RESERVED_CATEGORY && self.name == RESTARTED_NAME
    }

    pub fn execution_counter(&self) -> Option<i64> {
        self.extra.as_ref()?.get(EXECUTION_COUNTER_EXTRA)?.as_i64()
    }

    pub(crate) fn set_execution_counter(&mut self, counter: i64) {
        self.extra
            .get_or_insert_with(Map::new)
            .insert(EXECUTION_COUNTER_EXTRA.to_string(), json!(counter));
    }

    /// The public payload form: reserved (`#`-prefixed) extras removed,
    /// `extra` omitted entirely when nothing remains.
    pub fn payload(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("category".to_string(), json!(self.category));
        obj.insert("name".to_string(), json!(self.name));
        obj.insert("timestamp".to_string(), json!(self.timestamp));

        if let Some(extra) = &self.extra {
            let user: Map<String, Value> = extra
                .iter()
                .filter(|(key, _)| !key.starts_with('#'))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if !user.is_empty() {
                obj.insert("extra".to_string(), Value::Object(user));
            }
        }

        Value::Object(obj)
    }
}
