//! SDK configuration.
//!
//! Everything is validated when the configuration is built; a bad
//! endpoint or debug option fails construction instead of surfacing
//! later inside the recording pipeline. Runtime debug updates go through
//! the setters on [`crate::core::Glean`], which reuse the validators
//! here and leave prior state unchanged on rejection.

use crate::error::GleanError;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use url::Url;

/// Default ingestion endpoint for submitted pings.
pub const DEFAULT_TELEMETRY_ENDPOINT: &str = "https://incoming.telemetry.mozilla.org";
/// Default capacity of the "events" ping buffer.
pub const DEFAULT_MAX_EVENTS: usize = 1;

/// Pattern for debug view tags and source tags.
fn debug_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9-]{1,20}$").unwrap())
}

pub(crate) fn is_valid_debug_view_tag(tag: &str) -> bool {
    debug_tag_regex().is_match(tag)
}

pub(crate) fn are_valid_source_tags(tags: &[String]) -> bool {
    (1..=5).contains(&tags.len())
        && tags
            .iter()
            .all(|tag| !tag.starts_with("glean") && debug_tag_regex().is_match(tag))
}

#[derive(Debug, Clone)]
pub struct Configuration {
    /// Base URL pings are submitted to. HTTPS outside of test setups.
    pub server_endpoint: String,
    /// Buffer size that triggers submission of the "events" ping.
    pub max_events: usize,
    pub channel: Option<String>,
    pub app_build: Option<String>,
    pub app_display_version: Option<String>,
    pub build_date: Option<String>,
    /// Dump every submitted ping payload to stderr.
    pub log_pings: bool,
    pub debug_view_tag: Option<String>,
    pub source_tags: Option<Vec<String>>,
    /// Permit plain-http endpoints. Test setups only.
    pub allow_insecure_endpoint: bool,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    /// Build a configuration from an external JSON options object.
    /// Unknown options are rejected.
    pub fn from_json(options: Value) -> Result<Configuration, GleanError> {
        let options: ConfigurationOptions = serde_json::from_value(options)
            .map_err(|e| GleanError::Config(format!("unrecognized configuration: {}", e)))?;

        let mut builder = ConfigurationBuilder::new();
        if let Some(endpoint) = options.server_endpoint {
            builder = builder.server_endpoint(endpoint);
        }
        if let Some(max_events) = options.max_events {
            builder = builder.max_events(max_events);
        }
        if let Some(channel) = options.channel {
            builder = builder.channel(channel);
        }
        if let Some(app_build) = options.app_build {
            builder = builder.app_build(app_build);
        }
        if let Some(version) = options.app_display_version {
            builder = builder.app_display_version(version);
        }
        if let Some(build_date) = options.build_date {
            builder = builder.build_date(build_date);
        }
        if let Some(log_pings) = options.log_pings {
            builder = builder.log_pings(log_pings);
        }
        if let Some(tag) = options.debug_view_tag {
            builder = builder.debug_view_tag(tag);
        }
        if let Some(tags) = options.source_tags {
            builder = builder.source_tags(tags);
        }
        builder.build()
    }
}

/// External options object. Field names match the embedder-facing
/// configuration contract.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ConfigurationOptions {
    server_endpoint: Option<String>,
    max_events: Option<usize>,
    channel: Option<String>,
    app_build: Option<String>,
    app_display_version: Option<String>,
    build_date: Option<String>,
    log_pings: Option<bool>,
    debug_view_tag: Option<String>,
    source_tags: Option<Vec<String>>,
}

pub struct ConfigurationBuilder {
    server_endpoint: String,
    max_events: usize,
    channel: Option<String>,
    app_build: Option<String>,
    app_display_version: Option<String>,
    build_date: Option<String>,
    log_pings: bool,
    debug_view_tag: Option<String>,
    source_tags: Option<Vec<String>>,
    allow_insecure_endpoint: bool,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self {
            server_endpoint: DEFAULT_TELEMETRY_ENDPOINT.to_string(),
            max_events: DEFAULT_MAX_EVENTS,
            channel: None,
            app_build: None,
            app_display_version: None,
            build_date: None,
            log_pings: false,
            debug_view_tag: None,
            source_tags: None,
            allow_insecure_endpoint: false,
        }
    }

    pub fn server_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.server_endpoint = endpoint.into();
        self
    }

    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn app_build(mut self, app_build: impl Into<String>) -> Self {
        self.app_build = Some(app_build.into());
        self
    }

    pub fn app_display_version(mut self, version: impl Into<String>) -> Self {
        self.app_display_version = Some(version.into());
        self
    }

    pub fn build_date(mut self, build_date: impl Into<String>) -> Self {
        self.build_date = Some(build_date.into());
        self
    }

    pub fn log_pings(mut self, log_pings: bool) -> Self {
        self.log_pings = log_pings;
        self
    }

    pub fn debug_view_tag(mut self, tag: impl Into<String>) -> Self {
        self.debug_view_tag = Some(tag.into());
        self
    }

    pub fn source_tags(mut self, tags: Vec<String>) -> Self {
        self.source_tags = Some(tags);
        self
    }

    pub fn allow_insecure_endpoint(mut self, allow: bool) -> Self {
        self.allow_insecure_endpoint = allow;
        self
    }

    pub fn build(self) -> Result<Configuration, GleanError> {
        let url = Url::parse(&self.server_endpoint).map_err(|e| {
            GleanError::Config(format!(
                "invalid server endpoint {}: {}",
                self.server_endpoint, e
            ))
        })?;
        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure_endpoint => {}
            scheme => {
                return Err(GleanError::Config(format!(
                    "server endpoint must use https, got {}",
                    scheme
                )));
            }
        }

        if self.max_events < 1 {
            return Err(GleanError::Config(
                "maxEvents must be at least 1".to_string(),
            ));
        }

        if let Some(tag) = &self.debug_view_tag
            && !is_valid_debug_view_tag(tag)
        {
            return Err(GleanError::Config(format!("invalid debug view tag {}", tag)));
        }

        if let Some(tags) = &self.source_tags
            && !are_valid_source_tags(tags)
        {
            return Err(GleanError::Config(format!(
                "invalid source tags {:?}",
                tags
            )));
        }

        Ok(Configuration {
            server_endpoint: self.server_endpoint,
            max_events: self.max_events,
            channel: self.channel,
            app_build: self.app_build,
            app_display_version: self.app_display_version,
            build_date: self.build_date,
            log_pings: self.log_pings,
            debug_view_tag: self.debug_view_tag,
            source_tags: self.source_tags,
            allow_insecure_endpoint: self.allow_insecure_endpoint,
        })
    }
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
