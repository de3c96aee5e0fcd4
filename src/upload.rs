//! Ping transport.
//!
//! The subsystem only ever needs to POST a finished payload; retry,
//! backoff and scheduling belong to the embedder. Anything implementing
//! [`Uploader`] can be injected, the default is a blocking minreq client.

use crate::error::GleanError;

pub trait Uploader: Send + Sync {
    /// POST a ping body, returning the HTTP status code.
    fn post(&self, url: &str, body: &[u8], headers: &[(String, String)]) -> Result<u16, GleanError>;
}

/// Default uploader backed by minreq.
pub struct PingUploader {
    timeout_secs: u64,
}

impl PingUploader {
    pub fn new() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for PingUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl Uploader for PingUploader {
    fn post(&self, url: &str, body: &[u8], headers: &[(String, String)]) -> Result<u16, GleanError> {
        let mut request = minreq::post(url)
            .with_header(
                "User-Agent",
                format!("glean-events/{}", env!("CARGO_PKG_VERSION")),
            )
            .with_timeout(self.timeout_secs);
        for (name, value) in headers {
            request = request.with_header(name.as_str(), value.as_str());
        }

        let response = request
            .with_body(body.to_vec())
            .send()
            .map_err(|e| GleanError::Http(e.to_string()))?;
        Ok(response.status_code as u16)
    }
}
