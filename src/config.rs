//! Process configuration: CLI flags and environment variables parsed once at
//! startup via `clap::Parser`.

use std::fmt;

use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AzureEnvironment {
    #[value(name = "AZUREPUBLICCLOUD")]
    Public,
    #[value(name = "AZUREUSGOVERNMENTCLOUD")]
    UsGovernment,
    #[value(name = "AZURECHINACLOUD")]
    China,
    #[value(name = "AZUREGERMANCLOUD")]
    Germany,
}

impl AzureEnvironment {
    /// Base URI for the Azure Resource Manager endpoint of this cloud.
    pub fn resource_manager_base(self) -> &'static str {
        match self {
            AzureEnvironment::Public => "https://management.azure.com",
            AzureEnvironment::UsGovernment => "https://management.usgovcloudapi.net",
            AzureEnvironment::China => "https://management.chinacloudapi.cn",
            AzureEnvironment::Germany => "https://management.microsoftazure.de",
        }
    }

    /// Base URI for the Azure AD token endpoint of this cloud.
    pub fn active_directory_base(self) -> &'static str {
        match self {
            AzureEnvironment::Public => "https://login.microsoftonline.com",
            AzureEnvironment::UsGovernment => "https://login.microsoftonline.us",
            AzureEnvironment::China => "https://login.chinacloudapi.cn",
            AzureEnvironment::Germany => "https://login.microsoftonline.de",
        }
    }

    /// Resource/audience used when requesting tokens, overridable by
    /// `--azure-ad-resource-url`.
    pub fn default_resource_url(self) -> &'static str {
        match self {
            AzureEnvironment::Public => "https://management.azure.com/",
            AzureEnvironment::UsGovernment => "https://management.usgovcloudapi.net/",
            AzureEnvironment::China => "https://management.chinacloudapi.cn/",
            AzureEnvironment::Germany => "https://management.microsoftazure.de/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogFormat {
    Logfmt,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogSource {
    #[value(name = "")]
    None,
    #[value(name = "short")]
    Short,
    #[value(name = "file")]
    File,
    #[value(name = "full")]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogColor {
    #[value(name = "")]
    Unset,
    #[value(name = "auto")]
    Auto,
    #[value(name = "yes")]
    Yes,
    #[value(name = "no")]
    No,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub source: LogSource,
    pub color: LogColor,
    pub time: bool,
}

/// Prometheus probe exporter for Azure Monitor, Azure Resource Manager and
/// Azure Resource Graph.
#[derive(Debug, Clone, Parser)]
#[command(name = "azure-metrics-exporter", version = env!("EXPORTER_BUILD_VERSION"))]
pub struct Config {
    /// Address to bind the HTTP server to, e.g. ":8080" or "0.0.0.0:8080".
    #[arg(long = "bind", env = "SERVER_BIND", default_value = ":8080")]
    pub server_bind: String,

    #[arg(long = "server.timeout.read", env = "SERVER_TIMEOUT_READ", default_value = "5s", value_parser = parse_duration_secs)]
    pub server_timeout_read: u64,

    #[arg(long = "server.timeout.write", env = "SERVER_TIMEOUT_WRITE", default_value = "10s", value_parser = parse_duration_secs)]
    pub server_timeout_write: u64,

    #[arg(long = "concurrency.subscription", env = "CONCURRENCY_SUBSCRIPTION", default_value_t = 5)]
    pub concurrency_subscription: usize,

    #[arg(long = "concurrency.subscription.resource", env = "CONCURRENCY_SUBSCRIPTION_RESOURCE", default_value_t = 10)]
    pub concurrency_subscription_resource: usize,

    #[arg(long = "enable-caching", env = "ENABLE_CACHING")]
    pub enable_caching: bool,

    #[arg(long = "azure.servicediscovery.cache", env = "AZURE_SERVICEDISCOVERY_CACHE", default_value = "30m", value_parser = parse_duration_secs)]
    pub azure_servicediscovery_cache: u64,

    #[arg(long = "azure-environment", env = "AZURE_ENVIRONMENT", default_value = "AZUREPUBLICCLOUD")]
    pub azure_environment: AzureEnvironment,

    #[arg(long = "azure-ad-resource-url", env = "AZURE_AD_RESOURCE")]
    pub azure_ad_resource_url: Option<String>,

    #[arg(long = "metrics.template", env = "METRIC_TEMPLATE", default_value = "{name}")]
    pub metrics_template: String,

    #[arg(long = "metrics.help", env = "METRIC_HELP", default_value = "Azure monitor insight metric")]
    pub metrics_help: String,

    #[arg(long = "metrics.dimensions.lowercase", env = "METRIC_DIMENSIONS_LOWERCASE")]
    pub metrics_dimensions_lowercase: bool,

    #[arg(long = "metrics.resourceid.lowercase", env = "METRIC_RESOURCEID_LOWERCASE")]
    pub metrics_resourceid_lowercase: bool,

    #[arg(long = "azure.resource-tag", env = "AZURE_RESOURCE_TAG", default_value = "owner", value_delimiter = ' ')]
    pub azure_resource_tag: Vec<String>,

    #[arg(long = "log.level", env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    #[arg(long = "log.format", env = "LOG_FORMAT", default_value = "logfmt")]
    pub log_format: LogFormat,

    #[arg(long = "log.source", env = "LOG_SOURCE", default_value = "")]
    pub log_source: LogSource,

    #[arg(long = "log.color", env = "LOG_COLOR", default_value = "auto")]
    pub log_color: LogColor,

    #[arg(long = "log.time", env = "LOG_TIME", default_value_t = true)]
    pub log_time: bool,
}

impl Config {
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level,
            format: self.log_format,
            source: self.log_source,
            color: self.log_color,
            time: self.log_time,
        }
    }

    /// Resolves `server.bind` into a `host:port` string suitable for
    /// `TcpListener::bind`; a leading `:` means "bind all interfaces".
    pub fn bind_address(&self) -> String {
        if let Some(port) = self.server_bind.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else {
            self.server_bind.clone()
        }
    }

    pub fn azure_ad_resource(&self) -> String {
        self.azure_ad_resource_url
            .clone()
            .unwrap_or_else(|| self.azure_environment.default_resource_url().to_string())
    }
}

impl fmt::Display for AzureEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AzureEnvironment::Public => "AZUREPUBLICCLOUD",
            AzureEnvironment::UsGovernment => "AZUREUSGOVERNMENTCLOUD",
            AzureEnvironment::China => "AZURECHINACLOUD",
            AzureEnvironment::Germany => "AZUREGERMANCLOUD",
        };
        f.write_str(s)
    }
}

/// Parses a simple duration string (`"5s"`, `"30m"`, `"2h"`, or a bare
/// integer of seconds) into a second count.
fn parse_duration_secs(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    if let Some(digits) = raw.strip_suffix('s') {
        return digits.parse().map_err(|_| format!("invalid duration \"{raw}\""));
    }
    if let Some(digits) = raw.strip_suffix('m') {
        return digits
            .parse::<u64>()
            .map(|m| m * 60)
            .map_err(|_| format!("invalid duration \"{raw}\""));
    }
    if let Some(digits) = raw.strip_suffix('h') {
        return digits
            .parse::<u64>()
            .map(|h| h * 3600)
            .map_err(|_| format!("invalid duration \"{raw}\""));
    }
    raw.parse().map_err(|_| format!("invalid duration \"{raw}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_expands_bare_port() {
        let cfg = Config::parse_from(["exporter", "--bind", ":9090"]);
        assert_eq!(cfg.bind_address(), "0.0.0.0:9090");
    }

    #[test]
    fn duration_parsing_handles_suffixes() {
        assert_eq!(parse_duration_secs("30m").unwrap(), 1800);
        assert_eq!(parse_duration_secs("5s").unwrap(), 5);
        assert_eq!(parse_duration_secs("2h").unwrap(), 7200);
    }

    #[test]
    fn azure_ad_resource_defaults_to_environment() {
        let cfg = Config::parse_from(["exporter"]);
        assert_eq!(cfg.azure_ad_resource(), "https://management.azure.com/");
    }
}
