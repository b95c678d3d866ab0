//! Error kinds shared across the probe execution engine.

use std::fmt;

/// An error raised while answering a probe request, or while setting up the
/// process.
#[derive(Debug)]
pub enum ExporterError {
    /// A query parameter was missing or malformed.
    ParamInvalid { param: String, reason: String },

    /// `X-Prometheus-Scrape-Timeout-Seconds` failed to parse as a float.
    TimeoutParse { value: String },

    /// Target discovery (list-by-filter, resource graph, or tag scrape
    /// listing) failed; the probe cannot continue without targets.
    DiscoveryFailed { source: String },

    /// A single target's metric fetch failed. Carried for logging; never
    /// aborts the probe.
    UpstreamTransient {
        name: String,
        filter: String,
        resource_id: String,
        source: String,
    },

    /// Authentication or client construction failed at process startup.
    FatalInit { reason: String },
}

impl ExporterError {
    pub fn param_invalid(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParamInvalid {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Wraps an error with the `name[<Name>] filter[<Filter>]: <cause>`
    /// contextual prefix used when a per-target failure is logged.
    pub fn with_settings_context(source: impl fmt::Display, name: &str, filter: &str) -> String {
        let mut parts = Vec::new();
        if !name.is_empty() {
            parts.push(format!("name[{name}]"));
        }
        if !filter.is_empty() {
            parts.push(format!("filter[{filter}]"));
        }
        if parts.is_empty() {
            source.to_string()
        } else {
            format!("{}: {}", parts.join(" "), source)
        }
    }

    /// Whether this error should be surfaced to the HTTP client as a 400.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Self::ParamInvalid { .. } | Self::TimeoutParse { .. } | Self::DiscoveryFailed { .. }
        )
    }
}

impl fmt::Display for ExporterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParamInvalid { param, reason } => {
                write!(f, "parameter \"{param}\" {reason}")
            }
            Self::TimeoutParse { value } => {
                write!(f, "failed to parse timeout from Prometheus header: {value}")
            }
            Self::DiscoveryFailed { source } => write!(f, "servicediscovery failed: {source}"),
            Self::UpstreamTransient {
                name,
                filter,
                resource_id,
                source,
            } => write!(
                f,
                "{}: resourceID[{resource_id}]",
                Self::with_settings_context(source, name, filter)
            ),
            Self::FatalInit { reason } => write!(f, "fatal initialization error: {reason}"),
        }
    }
}

impl std::error::Error for ExporterError {}
