//! Events-ping assembly and submission.

use crate::config::Configuration;
use crate::upload::Uploader;
use crate::utils::debug_log;
use chrono::Utc;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Name of the ping that carries event batches.
pub const EVENTS_PING: &str = "events";

/// The buffer held events from a previous lifetime at startup.
pub const REASON_STARTUP: &str = "startup";
/// The buffer reached the configured capacity.
pub const REASON_MAX_CAPACITY: &str = "max_capacity";

pub(crate) fn submission_url(config: &Configuration, document_id: &str) -> String {
    format!(
        "{}/submit/{}/{}",
        config.server_endpoint.trim_end_matches('/'),
        EVENTS_PING,
        document_id
    )
}

pub(crate) fn submission_headers(config: &Configuration) -> Vec<(String, String)> {
    let mut headers = vec![
        (
            "Content-Type".to_string(),
            "application/json; charset=utf-8".to_string(),
        ),
        ("Date".to_string(), Utc::now().to_rfc2822()),
    ];
    if let Some(tag) = &config.debug_view_tag {
        headers.push(("X-Debug-ID".to_string(), tag.clone()));
    }
    if let Some(tags) = &config.source_tags {
        headers.push(("X-Source-Tags".to_string(), tags.join(",")));
    }
    headers
}

pub(crate) fn assemble_events_ping(
    config: &Configuration,
    reason: &str,
    events: Vec<Value>,
    start_time: &str,
    end_time: &str,
) -> Value {
    let ping_info = json!({
        "reason": reason,
        "start_time": start_time,
        "end_time": end_time,
    });

    let mut client_info = Map::new();
    client_info.insert(
        "telemetry_sdk_build".to_string(),
        json!(env!("CARGO_PKG_VERSION")),
    );
    if let Some(app_build) = &config.app_build {
        client_info.insert("app_build".to_string(), json!(app_build));
    }
    if let Some(version) = &config.app_display_version {
        client_info.insert("app_display_version".to_string(), json!(version));
    }
    if let Some(channel) = &config.channel {
        client_info.insert("app_channel".to_string(), json!(channel));
    }
    if let Some(build_date) = &config.build_date {
        client_info.insert("build_date".to_string(), json!(build_date));
    }

    json!({
        "ping_info": ping_info,
        "client_info": Value::Object(client_info),
        "events": events,
    })
}

/// Assemble and hand one events ping to the uploader.
///
/// Failures are logged and the batch dropped; delivery retry is the
/// embedder's concern.
pub(crate) fn submit(
    config: &Configuration,
    uploader: &dyn Uploader,
    reason: &str,
    events: Vec<Value>,
    start_time: &str,
    end_time: &str,
) {
    let document_id = Uuid::new_v4().to_string();
    let payload = assemble_events_ping(config, reason, events, start_time, end_time);

    if config.log_pings {
        let pretty = serde_json::to_string_pretty(&payload).unwrap_or_default();
        eprintln!("[glean-events] events ping ({}):\n{}", reason, pretty);
    }

    let body = match serde_json::to_vec(&payload) {
        Ok(body) => body,
        Err(e) => {
            debug_log(&format!("failed to serialize events ping: {}", e));
            return;
        }
    };

    let url = submission_url(config, &document_id);
    match uploader.post(&url, &body, &submission_headers(config)) {
        Ok(status) if (200..300).contains(&status) => {
            debug_log(&format!("events ping {} accepted ({})", document_id, status));
        }
        Ok(status) => {
            debug_log(&format!("events ping {} rejected ({})", document_id, status));
        }
        Err(e) => {
            debug_log(&format!("events ping upload failed: {}", e));
        }
    }
}
