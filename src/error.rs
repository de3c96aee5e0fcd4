use std::fmt;

/// Error kinds tracked by the per-metric error counters.
///
/// Each kind maps to a counter named `glean.error.<kind>`, keyed by the
/// identifier of the metric the error was recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unparseable or out-of-contract input (reserved extra key,
    /// non-monotonic clock on restart, malformed persisted entry).
    InvalidValue,
    /// Value of an unexpected shape (e.g. a boolean where a string or
    /// number is required).
    InvalidType,
    /// Input exceeded a configured bound (extra value length).
    InvalidOverflow,
    /// Declared for completeness; not raised by this subsystem.
    InvalidLabel,
    /// Declared for completeness; not raised by this subsystem.
    InvalidState,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidValue => "invalid_value",
            ErrorKind::InvalidType => "invalid_type",
            ErrorKind::InvalidOverflow => "invalid_overflow",
            ErrorKind::InvalidLabel => "invalid_label",
            ErrorKind::InvalidState => "invalid_state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum GleanError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Sqlite(rusqlite::Error),
    /// Errors from the ping uploader (connection failures, TLS, timeouts).
    Http(String),
    /// Invalid configuration detected at construction time.
    Config(String),
    Generic(String),
}

impl fmt::Display for GleanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GleanError::Io(e) => write!(f, "IO error: {}", e),
            GleanError::Json(e) => write!(f, "JSON error: {}", e),
            GleanError::Sqlite(e) => write!(f, "SQLite error: {}", e),
            GleanError::Http(e) => write!(f, "HTTP error: {}", e),
            GleanError::Config(e) => write!(f, "Configuration error: {}", e),
            GleanError::Generic(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GleanError {}

impl From<std::io::Error> for GleanError {
    fn from(err: std::io::Error) -> Self {
        GleanError::Io(err)
    }
}

impl From<serde_json::Error> for GleanError {
    fn from(err: serde_json::Error) -> Self {
        GleanError::Json(err)
    }
}

impl From<rusqlite::Error> for GleanError {
    fn from(err: rusqlite::Error) -> Self {
        GleanError::Sqlite(err)
    }
}
