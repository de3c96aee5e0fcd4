use std::sync::OnceLock;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

fn is_debug_enabled() -> bool {
    *DEBUG_ENABLED.get_or_init(|| std::env::var("GLEAN_EVENTS_DEBUG").unwrap_or_default() == "1")
}

/// Debug logging utility function
///
/// Prints debug messages with a colored prefix when the `GLEAN_EVENTS_DEBUG`
/// environment variable is set to "1". Recording paths never surface errors
/// to callers, so this is the only place storage and upload failures show up.
pub(crate) fn debug_log(msg: &str) {
    if is_debug_enabled() {
        eprintln!("\x1b[1;33m[glean-events]\x1b[0m {}", msg);
    }
}
