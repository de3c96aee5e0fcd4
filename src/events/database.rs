//! Durable per-ping event buffers with restart stitching.
//!
//! Buffers are persisted under `events/<pingName>` as append-only JSON
//! arrays of raw events and replaced wholesale on drain. Each lifetime
//! that finds prior events bumps the ping's execution counter and injects
//! a `glean.restarted` marker, so a drained buffer can be normalized into
//! one strictly increasing timeline spanning every restart.

use crate::error::ErrorKind;
use crate::events::recorded::RecordedEvent;
use crate::metrics::counter::CounterMetric;
use crate::metrics::database::MetricsDatabase;
use crate::metrics::{CommonMetricData, record_error};
use crate::ping::EVENTS_PING;
use crate::storage::PersistentStore;
use crate::utils::debug_log;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

const EVENTS_PATH: &str = "events";
const META_PATH: &str = "events-meta";
const START_TIME_KEY: &str = "start-time";

/// Error-counter key for entries that fail to decode from storage.
const DATABASE_METRIC_ID: &str = "glean.events_database";
/// Error-counter key for restart markers built from a non-monotonic clock.
const RESTARTED_METRIC_ID: &str = "glean.restarted";

pub struct EventsDatabase {
    store: Arc<dyn PersistentStore>,
    metrics: MetricsDatabase,
    execution_counter: CounterMetric,
    max_events: usize,
    /// Serialization queue for every database operation: record and
    /// drain never interleave, and a capacity-triggered submission
    /// always observes the append that caused it.
    queue: Mutex<()>,
}

impl EventsDatabase {
    pub fn new(store: Arc<dyn PersistentStore>, metrics: MetricsDatabase, max_events: usize) -> Self {
        Self {
            store,
            metrics,
            execution_counter: CounterMetric::new(CommonMetricData::new(
                "glean",
                "execution_counter",
                vec![],
            )),
            max_events: max_events.max(1),
            queue: Mutex::new(()),
        }
    }

    /// Ping names that currently have a persisted buffer.
    fn stored_ping_names(&self) -> Vec<String> {
        match self.store.get(&[EVENTS_PATH]) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Load and decode one ping's buffer, dropping entries that fail to
    /// decode (each one counted as an `InvalidValue` against the
    /// database's own error metric).
    fn load_events(&self, ping: &str) -> Vec<RecordedEvent> {
        let entries = match self.store.get(&[EVENTS_PATH, ping]) {
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                record_error(&self.metrics, DATABASE_METRIC_ID, ErrorKind::InvalidValue);
                return Vec::new();
            }
            None => return Vec::new(),
        };

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<RecordedEvent>(entry) {
                Ok(event) if event.timestamp >= 0 => events.push(event),
                Ok(_) | Err(_) => {
                    debug_log(&format!("dropping malformed event entry for ping {}", ping));
                    record_error(&self.metrics, DATABASE_METRIC_ID, ErrorKind::InvalidValue);
                }
            }
        }
        events
    }

    /// Append a raw event, returning the resulting buffer length
    /// (0 when the write failed and the event was dropped).
    fn append_event(&self, ping: &str, event: &RecordedEvent) -> usize {
        let raw = match serde_json::to_value(event) {
            Ok(raw) => raw,
            Err(e) => {
                debug_log(&format!("failed to serialize event for ping {}: {}", ping, e));
                return 0;
            }
        };

        let mut new_len = 0;
        let result = self.store.update(&[EVENTS_PATH, ping], &mut |current| {
            let mut buffer = match current {
                Some(Value::Array(buffer)) => buffer,
                _ => Vec::new(),
            };
            buffer.push(raw.clone());
            new_len = buffer.len();
            Value::Array(buffer)
        });
        if let Err(e) = result {
            debug_log(&format!("failed to persist event for ping {}: {}", ping, e));
            return 0;
        }
        new_len
    }

    /// Bridge persisted buffers into the new lifetime.
    ///
    /// For every ping with prior events: bump its execution counter and
    /// append a restart marker whose raw timestamp is the start-time
    /// offset (clamped to 0, with an `InvalidValue` against
    /// `glean.restarted`, when the clock did not move forward). The new
    /// start time is persisted before returning.
    ///
    /// Returns true when any buffer holds events afterwards, in which
    /// case the caller submits the events ping with reason `"startup"`.
    pub fn initialize(&self, current_start_time_ms: i64) -> bool {
        let _guard = self.queue.lock().unwrap();

        let previous_start = self
            .store
            .get(&[META_PATH, START_TIME_KEY])
            .and_then(|value| value.as_i64());

        let mut any_pending = false;
        for ping in self.stored_ping_names() {
            let counter = self.execution_counter.value(&self.metrics, &ping).unwrap_or(0) + 1;
            self.execution_counter.set(&self.metrics, &ping, counter);

            let offset = match previous_start {
                Some(previous) if current_start_time_ms > previous => {
                    current_start_time_ms - previous
                }
                Some(_) => {
                    record_error(&self.metrics, RESTARTED_METRIC_ID, ErrorKind::InvalidValue);
                    0
                }
                // No persisted start time to measure against.
                None => 0,
            };

            let marker = RecordedEvent::restarted(counter, offset);
            if self.append_event(&ping, &marker) > 0 {
                any_pending = true;
            }
        }

        let result = self
            .store
            .update(&[META_PATH, START_TIME_KEY], &mut |_| json!(current_start_time_ms));
        if let Err(e) = result {
            debug_log(&format!("failed to persist start time: {}", e));
        }

        any_pending
    }

    /// Append `event` for every ping the metric sends in, stamping the
    /// ping's current execution counter into its extras.
    ///
    /// Returns true when the `"events"` ping buffer reached capacity and
    /// the caller should submit it with reason `"max_capacity"`.
    pub fn record(&self, meta: &CommonMetricData, event: &RecordedEvent) -> bool {
        if meta.disabled {
            return false;
        }
        let _guard = self.queue.lock().unwrap();

        let mut capacity_reached = false;
        for ping in &meta.send_in_pings {
            let counter = match self.execution_counter.value(&self.metrics, ping) {
                Some(counter) => counter,
                None => {
                    // First event for this ping in this lifetime chain.
                    self.execution_counter.set(&self.metrics, ping, 1);
                    1
                }
            };

            let mut event = event.clone();
            event.set_execution_counter(counter);
            let len = self.append_event(ping, &event);
            if ping == EVENTS_PING && len >= self.max_events {
                capacity_reached = true;
            }
        }
        capacity_reached
    }

    /// The ordered, normalized public payloads for `ping`, or `None`
    /// when the buffer is empty or absent.
    ///
    /// With `clear`, the buffer is removed and the ping's execution
    /// counter becomes undefined again.
    pub fn get_ping_events(&self, ping: &str, clear: bool) -> Option<Vec<Value>> {
        let _guard = self.queue.lock().unwrap();

        let events = self.load_events(ping);
        if clear {
            if let Err(e) = self.store.delete(&[EVENTS_PATH, ping]) {
                debug_log(&format!("failed to clear events for ping {}: {}", ping, e));
            }
            self.execution_counter.remove(&self.metrics, ping);
        }

        if events.is_empty() {
            return None;
        }
        let normalized = normalize(events);
        if normalized.is_empty() { None } else { Some(normalized) }
    }

    /// Remove every buffer, all counter state and the persisted start
    /// time.
    pub fn clear_all(&self) {
        let _guard = self.queue.lock().unwrap();

        if let Err(e) = self.store.delete(&[EVENTS_PATH]) {
            debug_log(&format!("failed to clear event buffers: {}", e));
        }
        if let Err(e) = self.store.delete(&[META_PATH]) {
            debug_log(&format!("failed to clear event metadata: {}", e));
        }
        self.metrics.clear();
    }
}

/// Normalization pipeline: sort, trim, rebase, strip.
fn normalize(mut events: Vec<RecordedEvent>) -> Vec<Value> {
    sort_events(&mut events);
    trim_trailing_restarts(&mut events);
    rebase_timestamps(&mut events);
    events.iter().map(RecordedEvent::payload).collect()
}

/// Primary order: execution counter ascending; within a counter the
/// restart marker leads (it is the first event of its lifetime, but its
/// raw timestamp is measured on the previous lifetime's clock, so a
/// plain timestamp tie-break would misplace it); events then tie-break
/// by timestamp ascending. The sort is stable, so full ties keep
/// insertion order.
fn sort_events(events: &mut [RecordedEvent]) {
    events.sort_by_key(|event| {
        (
            event.execution_counter().unwrap_or(0),
            !event.is_restarted(),
            event.timestamp,
        )
    });
}

/// Drop restart markers off the tail. A buffer drained right after one
/// or more event-less initializations would otherwise end in markers
/// that separate nothing. Interior markers are kept.
fn trim_trailing_restarts(events: &mut Vec<RecordedEvent>) {
    while events.last().is_some_and(RecordedEvent::is_restarted) {
        events.pop();
    }
}

/// Rewrite raw timestamps into one strictly increasing sequence
/// starting at 0.
///
/// `offset` maps the current lifetime's raw timestamps into output
/// coordinates. A restart marker's raw timestamp is the new lifetime's
/// origin expressed on the previous lifetime's clock, so its output
/// becomes the offset for everything after it. The `previous + 1` floor
/// keeps the sequence strictly increasing even when the wall clock
/// stood still or went backward across a restart.
fn rebase_timestamps(events: &mut [RecordedEvent]) {
    let Some(first) = events.first() else {
        return;
    };

    let mut offset = -first.timestamp;
    let mut current_counter = first.execution_counter().unwrap_or(0);
    let mut previous_output = 0;

    for (index, event) in events.iter_mut().enumerate() {
        let counter = event.execution_counter().unwrap_or(0);
        let output = if index == 0 {
            0
        } else if counter != current_counter {
            current_counter = counter;
            let output = (previous_output + 1).max(event.timestamp + offset);
            offset = output;
            output
        } else {
            (previous_output + 1).max(event.timestamp + offset)
        };
        event.timestamp = output;
        previous_output = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::num_recorded_errors;
    use crate::storage::MemoryStore;

    const DAY_ONE_MS: i64 = 1_700_000_000_000;
    const ONE_HOUR_MS: i64 = 3_600_000;

    fn create_test_db(max_events: usize) -> (EventsDatabase, Arc<MemoryStore>, MetricsDatabase) {
        let store = Arc::new(MemoryStore::new());
        let metrics = MetricsDatabase::new(store.clone());
        let db = EventsDatabase::new(store.clone(), metrics.clone(), max_events);
        (db, store, metrics)
    }

    fn reopen(store: &Arc<MemoryStore>, max_events: usize) -> EventsDatabase {
        EventsDatabase::new(
            store.clone(),
            MetricsDatabase::new(store.clone()),
            max_events,
        )
    }

    fn test_meta(pings: &[&str]) -> CommonMetricData {
        CommonMetricData::new(
            "test",
            "an_event",
            pings.iter().map(|p| p.to_string()).collect(),
        )
    }

    fn event(timestamp: i64) -> RecordedEvent {
        RecordedEvent::new("test", "an_event", timestamp, None)
    }

    fn timestamps(payloads: &[Value]) -> Vec<i64> {
        payloads
            .iter()
            .map(|p| p["timestamp"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_record_stamps_execution_counter() {
        let (db, store, metrics) = create_test_db(100);

        db.record(&test_meta(&["aPing"]), &event(0));
        db.record(&test_meta(&["aPing"]), &event(10));

        assert_eq!(metrics.counter_value("glean.execution_counter", "aPing"), Some(1));
        let raw = store.get(&["events", "aPing"]).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);
        assert_eq!(raw[0]["extra"]["#execution_counter"], json!(1));
        assert_eq!(raw[1]["extra"]["#execution_counter"], json!(1));
    }

    #[test]
    fn test_record_fans_out_to_every_ping() {
        let (db, store, _metrics) = create_test_db(100);

        db.record(&test_meta(&["aPing", "bPing"]), &event(5));

        for ping in ["aPing", "bPing"] {
            let raw = store.get(&["events", ping]).unwrap();
            assert_eq!(raw.as_array().unwrap().len(), 1);
        }
    }

    #[test]
    fn test_disabled_metric_discards() {
        let (db, store, _metrics) = create_test_db(100);

        let mut meta = test_meta(&["aPing"]);
        meta.disabled = true;
        assert!(!db.record(&meta, &event(0)));
        assert_eq!(store.get(&["events", "aPing"]), None);
    }

    #[test]
    fn test_capacity_signal_only_for_events_ping() {
        let (db, _store, _metrics) = create_test_db(3);

        let meta = test_meta(&["events", "aPing"]);
        assert!(!db.record(&meta, &event(0)));
        assert!(!db.record(&meta, &event(1)));
        // Third append fills the "events" buffer; "aPing" never signals.
        assert!(db.record(&meta, &event(2)));

        let aping_only = test_meta(&["aPing"]);
        assert!(!db.record(&aping_only, &event(3)));
    }

    #[test]
    fn test_get_ping_events_empty_is_none() {
        let (db, _store, _metrics) = create_test_db(100);
        assert_eq!(db.get_ping_events("aPing", false), None);
    }

    #[test]
    fn test_drain_clears_buffer_and_counter() {
        let (db, store, metrics) = create_test_db(100);

        db.record(&test_meta(&["aPing"]), &event(0));
        let drained = db.get_ping_events("aPing", true).unwrap();
        assert_eq!(drained.len(), 1);

        assert_eq!(store.get(&["events", "aPing"]), None);
        assert_eq!(metrics.counter_value("glean.execution_counter", "aPing"), None);
        assert_eq!(db.get_ping_events("aPing", false), None);

        // The next lifetime chain starts back at counter 1.
        db.record(&test_meta(&["aPing"]), &event(3));
        assert_eq!(metrics.counter_value("glean.execution_counter", "aPing"), Some(1));
    }

    #[test]
    fn test_peek_keeps_buffer() {
        let (db, _store, metrics) = create_test_db(100);

        db.record(&test_meta(&["aPing"]), &event(0));
        assert!(db.get_ping_events("aPing", false).is_some());
        assert!(db.get_ping_events("aPing", false).is_some());
        assert_eq!(metrics.counter_value("glean.execution_counter", "aPing"), Some(1));
    }

    #[test]
    fn test_initialize_injects_marker_and_bumps_counter() {
        let (db, store, metrics) = create_test_db(100);

        db.initialize(DAY_ONE_MS);
        db.record(&test_meta(&["aPing"]), &event(0));

        let db = reopen(&store, 100);
        let pending = db.initialize(DAY_ONE_MS + ONE_HOUR_MS);
        assert!(pending);

        assert_eq!(metrics.counter_value("glean.execution_counter", "aPing"), Some(2));
        let raw = store.get(&["events", "aPing"]).unwrap();
        let entries = raw.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["category"], json!("glean"));
        assert_eq!(entries[1]["name"], json!("restarted"));
        assert_eq!(entries[1]["timestamp"], json!(ONE_HOUR_MS));
        assert_eq!(entries[1]["extra"]["#execution_counter"], json!(2));

        assert_eq!(
            store.get(&["events-meta", "start-time"]),
            Some(json!(DAY_ONE_MS + ONE_HOUR_MS))
        );
    }

    #[test]
    fn test_initialize_without_buffers_is_quiet() {
        let (db, store, _metrics) = create_test_db(100);

        assert!(!db.initialize(DAY_ONE_MS));
        assert_eq!(store.get(&["events"]), None);
        assert_eq!(store.get(&["events-meta", "start-time"]), Some(json!(DAY_ONE_MS)));
    }

    #[test]
    fn test_backward_clock_clamps_and_records_error() {
        let (db, store, metrics) = create_test_db(100);

        db.initialize(DAY_ONE_MS);
        db.record(&test_meta(&["aPing"]), &event(0));

        let db = reopen(&store, 100);
        db.initialize(DAY_ONE_MS - ONE_HOUR_MS);

        let raw = store.get(&["events", "aPing"]).unwrap();
        assert_eq!(raw[1]["timestamp"], json!(0));
        assert_eq!(
            num_recorded_errors(&metrics, "glean.restarted", ErrorKind::InvalidValue),
            1
        );
    }

    #[test]
    fn test_cross_restart_timestamps_are_stitched() {
        let (db, store, _metrics) = create_test_db(100);

        db.initialize(DAY_ONE_MS);
        db.record(&test_meta(&["aPing"]), &event(0));
        db.record(&test_meta(&["aPing"]), &event(10));

        let db = reopen(&store, 100);
        db.initialize(DAY_ONE_MS + ONE_HOUR_MS);
        db.record(&test_meta(&["aPing"]), &event(10));
        db.record(&test_meta(&["aPing"]), &event(40));

        let payloads = db.get_ping_events("aPing", false).unwrap();
        assert_eq!(
            timestamps(&payloads),
            vec![0, 10, ONE_HOUR_MS, ONE_HOUR_MS + 10, ONE_HOUR_MS + 40]
        );
        assert_eq!(payloads[2]["category"], json!("glean"));
        assert_eq!(payloads[2]["name"], json!("restarted"));
    }

    #[test]
    fn test_trailing_markers_are_trimmed() {
        let (db, store, _metrics) = create_test_db(100);

        db.initialize(DAY_ONE_MS);
        db.record(&test_meta(&["aPing"]), &event(0));

        // Two initializations with nothing recorded in between stack two
        // markers on the tail.
        let db = reopen(&store, 100);
        db.initialize(DAY_ONE_MS + ONE_HOUR_MS);
        let db = reopen(&store, 100);
        db.initialize(DAY_ONE_MS + 2 * ONE_HOUR_MS);

        let payloads = db.get_ping_events("aPing", false).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["name"], json!("an_event"));
    }

    #[test]
    fn test_buffer_of_only_markers_drains_to_none() {
        let (db, store, _metrics) = create_test_db(100);

        db.initialize(DAY_ONE_MS);
        db.record(&test_meta(&["aPing"]), &event(0));
        // Drop the real event, keep the buffer alive with a marker only.
        let db = reopen(&store, 100);
        db.initialize(DAY_ONE_MS + ONE_HOUR_MS);
        store
            .update(&["events", "aPing"], &mut |current| {
                let mut buffer = match current {
                    Some(Value::Array(buffer)) => buffer,
                    _ => Vec::new(),
                };
                buffer.remove(0);
                Value::Array(buffer)
            })
            .unwrap();

        assert_eq!(db.get_ping_events("aPing", true), None);
        assert_eq!(store.get(&["events", "aPing"]), None);
    }

    #[test]
    fn test_malformed_entries_are_dropped_and_counted() {
        let (db, store, metrics) = create_test_db(100);

        db.record(&test_meta(&["aPing"]), &event(0));
        store
            .update(&["events", "aPing"], &mut |current| {
                let mut buffer = match current {
                    Some(Value::Array(buffer)) => buffer,
                    _ => Vec::new(),
                };
                buffer.push(json!({"name": "missing_category"}));
                buffer.push(json!("not an object"));
                Value::Array(buffer)
            })
            .unwrap();

        let payloads = db.get_ping_events("aPing", false).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            num_recorded_errors(&metrics, "glean.events_database", ErrorKind::InvalidValue),
            2
        );
    }

    #[test]
    fn test_marker_leads_its_lifetime_despite_large_timestamp() {
        // The marker's raw timestamp (a start-time delta) can dwarf the
        // new lifetime's event timestamps; it still sorts first.
        let mut events = vec![
            RecordedEvent::restarted(2, ONE_HOUR_MS),
            event(10),
            event(40),
        ];
        events[1].set_execution_counter(2);
        events[2].set_execution_counter(2);
        // Persisted order scrambled on purpose.
        events.swap(0, 1);

        sort_events(&mut events);
        assert!(events[0].is_restarted());
        assert_eq!(events[1].timestamp, 10);
        assert_eq!(events[2].timestamp, 40);
    }

    #[test]
    fn test_sort_is_stable_for_full_ties() {
        let mut events = vec![
            RecordedEvent::new("test", "first", 5, None),
            RecordedEvent::new("test", "second", 5, None),
            RecordedEvent::new("test", "third", 5, None),
        ];
        for event in &mut events {
            event.set_execution_counter(1);
        }

        sort_events(&mut events);
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_rebase_floors_collisions() {
        let mut events = vec![event(5), event(5), event(7)];
        for event in &mut events {
            event.set_execution_counter(1);
        }

        rebase_timestamps(&mut events);
        let outputs: Vec<i64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(outputs, vec![0, 1, 2]);
    }

    #[test]
    fn test_clear_all_resets_everything() {
        let (db, store, metrics) = create_test_db(100);

        db.initialize(DAY_ONE_MS);
        db.record(&test_meta(&["aPing", "events"]), &event(0));
        db.clear_all();

        assert_eq!(store.get(&["events"]), None);
        assert_eq!(store.get(&["events-meta", "start-time"]), None);
        assert_eq!(metrics.counter_value("glean.execution_counter", "aPing"), None);
        assert_eq!(metrics.counter_value("glean.execution_counter", "events"), None);
    }
}
