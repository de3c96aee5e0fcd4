//! Counter bookkeeping persisted in the key-path store.
//!
//! Counters live under `metrics/user/counter/<name>` as one JSON object
//! per counter name, keyed by scope (a ping name for the execution
//! counter, a metric identifier for the error counters).

use crate::storage::PersistentStore;
use crate::utils::debug_log;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const COUNTER_ROOT: [&str; 3] = ["metrics", "user", "counter"];

#[derive(Clone)]
pub struct MetricsDatabase {
    store: Arc<dyn PersistentStore>,
}

impl MetricsDatabase {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    fn counter_path<'a>(name: &'a str) -> [&'a str; 4] {
        [COUNTER_ROOT[0], COUNTER_ROOT[1], COUNTER_ROOT[2], name]
    }

    pub fn counter_value(&self, name: &str, key: &str) -> Option<i64> {
        self.store
            .get(&Self::counter_path(name))?
            .get(key)?
            .as_i64()
    }

    pub fn add_counter(&self, name: &str, key: &str, amount: i64) {
        self.write_counter(name, key, |previous| previous + amount);
    }

    pub fn set_counter(&self, name: &str, key: &str, value: i64) {
        self.write_counter(name, key, |_| value);
    }

    fn write_counter(&self, name: &str, key: &str, apply: impl Fn(i64) -> i64) {
        let result = self.store.update(&Self::counter_path(name), &mut |current| {
            let mut map = match current {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            let previous = map.get(key).and_then(Value::as_i64).unwrap_or(0);
            map.insert(key.to_string(), json!(apply(previous)));
            Value::Object(map)
        });
        if let Err(e) = result {
            debug_log(&format!("counter write failed for {}/{}: {}", name, key, e));
        }
    }

    /// Remove one key from a counter, leaving the counter undefined for
    /// that scope.
    pub fn remove_counter(&self, name: &str, key: &str) {
        let result = self.store.update(&Self::counter_path(name), &mut |current| {
            let mut map = match current {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            map.remove(key);
            Value::Object(map)
        });
        if let Err(e) = result {
            debug_log(&format!("counter remove failed for {}/{}: {}", name, key, e));
        }
    }

    /// Wipe all persisted counter state.
    pub fn clear(&self) {
        if let Err(e) = self.store.delete(&COUNTER_ROOT[..1]) {
            debug_log(&format!("failed to clear metrics: {}", e));
        }
    }
}
