//! Top-level SDK handle wiring configuration, storage, databases, clock
//! and uploader together.

use crate::clock::{Clock, SystemClock};
use crate::config::{self, Configuration};
use crate::error::{ErrorKind, GleanError};
use crate::events::database::EventsDatabase;
use crate::metrics::database::MetricsDatabase;
use crate::metrics::num_recorded_errors;
use crate::ping::{self, EVENTS_PING, REASON_STARTUP};
use crate::storage::{PersistentStore, SqliteStore};
use crate::upload::{PingUploader, Uploader};
use crate::utils::debug_log;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct Glean {
    config: Configuration,
    metrics: MetricsDatabase,
    events: EventsDatabase,
    uploader: Box<dyn Uploader>,
    clock: Box<dyn Clock>,
    upload_enabled: AtomicBool,
}

impl Glean {
    /// Wire up a handle over the given collaborators. Nothing touches
    /// the network or injects restart markers until [`Glean::initialize`].
    pub fn new(
        config: Configuration,
        store: Arc<dyn PersistentStore>,
        uploader: Box<dyn Uploader>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let metrics = MetricsDatabase::new(store.clone());
        let events = EventsDatabase::new(store, metrics.clone(), config.max_events);
        Self {
            config,
            metrics,
            events,
            uploader,
            clock,
            upload_enabled: AtomicBool::new(true),
        }
    }

    /// Convenience constructor: SQLite store at `data_path`, blocking
    /// HTTP uploader, system clock.
    pub fn with_defaults(config: Configuration, data_path: &Path) -> Result<Self, GleanError> {
        let store = SqliteStore::open(data_path)?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Box::new(PingUploader::new()),
            Box::new(SystemClock::new()),
        ))
    }

    /// Bridge buffers left over from previous lifetimes and, when any
    /// ping still holds events, submit the events ping with reason
    /// `"startup"`. Call exactly once, early in process startup.
    pub fn initialize(&self) {
        let pending = self.events.initialize(self.clock.start_time_ms());
        if pending {
            self.submit_events_ping(REASON_STARTUP);
        }
    }

    pub fn is_upload_enabled(&self) -> bool {
        self.upload_enabled.load(Ordering::Relaxed)
    }

    /// Globally gate recording and submission.
    pub fn set_upload_enabled(&self, enabled: bool) {
        self.upload_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &MetricsDatabase {
        &self.metrics
    }

    pub(crate) fn events(&self) -> &EventsDatabase {
        &self.events
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The ordered, normalized event payloads for `ping`; the drain the
    /// ping assembler uses when building a payload.
    pub fn get_ping_events(&self, ping: &str, clear: bool) -> Option<Vec<Value>> {
        self.events.get_ping_events(ping, clear)
    }

    /// Drain the "events" ping buffer and hand one ping to the uploader.
    /// A quiet no-op when there is nothing to send.
    pub fn submit_events_ping(&self, reason: &str) {
        if !self.is_upload_enabled() {
            debug_log("events ping not submitted: upload is disabled");
            return;
        }
        let Some(events) = self.events.get_ping_events(EVENTS_PING, true) else {
            debug_log(&format!("events ping not submitted ({}): no events", reason));
            return;
        };

        let start_time = DateTime::<Utc>::from_timestamp_millis(self.clock.start_time_ms())
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        let end_time = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        ping::submit(
            &self.config,
            self.uploader.as_ref(),
            reason,
            events,
            &start_time,
            &end_time,
        );
    }

    /// Wipe all event state: buffers, counters, the persisted start time.
    pub fn clear_all(&self) {
        self.events.clear_all();
    }

    /// Set the debug view tag at runtime. Invalid tags are rejected with
    /// a logged error and leave the previous value in place.
    pub fn set_debug_view_tag(&mut self, tag: &str) -> bool {
        if !config::is_valid_debug_view_tag(tag) {
            debug_log(&format!("invalid debug view tag {}, ignoring", tag));
            return false;
        }
        self.config.debug_view_tag = Some(tag.to_string());
        true
    }

    /// Set the source tags at runtime, with the same reject-and-keep
    /// behavior as [`Glean::set_debug_view_tag`].
    pub fn set_source_tags(&mut self, tags: Vec<String>) -> bool {
        if !config::are_valid_source_tags(&tags) {
            debug_log(&format!("invalid source tags {:?}, ignoring", tags));
            return false;
        }
        self.config.source_tags = Some(tags);
        true
    }

    pub fn set_log_pings(&mut self, enabled: bool) {
        self.config.log_pings = enabled;
    }

    /// Number of errors of `kind` recorded against `metric_id`
    /// (`category.name`). Test-only.
    pub fn test_get_num_recorded_errors(&self, metric_id: &str, kind: ErrorKind) -> i64 {
        num_recorded_errors(&self.metrics, metric_id, kind)
    }
}
