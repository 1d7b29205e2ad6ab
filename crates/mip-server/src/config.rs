//! Node configuration loading from file and environment variables.

use mip_federation::Member;
use mip_identity::IdentitySettings;
use mip_types::{
    DeclinedRequestPolicy, NodePolicy, DEFAULT_DAILY_RATE_LIMIT, DEFAULT_TIMESTAMP_WINDOW_SECS,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Organization metadata and trust policy.
    #[serde(default)]
    pub node: NodeConfig,

    /// Request authentication settings.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Outbound delivery settings.
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Local admin API settings.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// The member directory served to connected peers.
    #[serde(default)]
    pub members: Vec<Member>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_organization_name")]
    pub organization_name: String,

    #[serde(default)]
    pub contact_person: Option<String>,

    #[serde(default)]
    pub contact_phone: Option<String>,

    /// Externally reachable base URL. The node's MIP URL is
    /// `{public_url}/mip/node/{mip_identifier}`.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Whether peers may learn about this node through connected-organization
    /// queries.
    #[serde(default = "default_true")]
    pub share_my_organization: bool,

    /// Trusted endorsements required for auto-approval.
    #[serde(default = "default_trust_threshold")]
    pub trust_threshold: u32,

    /// Informational daily quota granted to new connections.
    #[serde(default = "default_daily_rate_limit")]
    pub default_daily_rate_limit: u32,

    /// Whether a declined node may ask again.
    #[serde(default)]
    pub declined_requests: DeclinedRequestPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Accepted clock skew for request timestamps.
    #[serde(default = "default_timestamp_window")]
    pub timestamp_window_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboundConfig {
    /// Per-call timeout for requests to peers.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Jobs buffered before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deliveries allowed in flight at once.
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for `/api/admin`. Unset disables the admin API.
    #[serde(default)]
    pub token: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "mip_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_organization_name() -> String {
    "MIP Node".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_true() -> bool {
    true
}

fn default_trust_threshold() -> u32 {
    1
}

fn default_daily_rate_limit() -> u32 {
    DEFAULT_DAILY_RATE_LIMIT
}

fn default_timestamp_window() -> i64 {
    DEFAULT_TIMESTAMP_WINDOW_SECS
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_concurrent_deliveries() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            organization_name: default_organization_name(),
            contact_person: None,
            contact_phone: None,
            public_url: default_public_url(),
            share_my_organization: true,
            trust_threshold: default_trust_threshold(),
            default_daily_rate_limit: default_daily_rate_limit(),
            declined_requests: DeclinedRequestPolicy::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            timestamp_window_seconds: default_timestamp_window(),
        }
    }
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            queue_capacity: default_queue_capacity(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Settings for generating this node's identity.
    pub fn identity_settings(&self) -> IdentitySettings {
        IdentitySettings {
            organization_name: self.node.organization_name.clone(),
            contact_person: self.node.contact_person.clone(),
            contact_phone: self.node.contact_phone.clone(),
            public_url: self.node.public_url.clone(),
            share_my_organization: self.node.share_my_organization,
            trust_threshold: self.node.trust_threshold,
        }
    }

    /// The trust policy handed to the node.
    pub fn node_policy(&self) -> NodePolicy {
        NodePolicy {
            timestamp_window_secs: self.security.timestamp_window_seconds,
            default_daily_rate_limit: self.node.default_daily_rate_limit,
            declined_requests: self.node.declined_requests,
        }
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound.timeout_seconds)
    }

    /// Rejects values the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.organization_name.trim().is_empty() {
            return Err(ConfigError::Invalid("node.organization_name must not be empty".into()));
        }
        if self.node.trust_threshold < 1 {
            return Err(ConfigError::Invalid("node.trust_threshold must be at least 1".into()));
        }
        if self.security.timestamp_window_seconds < 1 {
            return Err(ConfigError::Invalid(
                "security.timestamp_window_seconds must be at least 1".into(),
            ));
        }
        if self.outbound.timeout_seconds < 1 {
            return Err(ConfigError::Invalid("outbound.timeout_seconds must be at least 1".into()));
        }
        if self.outbound.queue_capacity < 1 {
            return Err(ConfigError::Invalid("outbound.queue_capacity must be at least 1".into()));
        }
        if self.outbound.max_concurrent_deliveries < 1 {
            return Err(ConfigError::Invalid(
                "outbound.max_concurrent_deliveries must be at least 1".into(),
            ));
        }
        url::Url::parse(&self.node.public_url)
            .map_err(|e| ConfigError::Invalid(format!("node.public_url is not a URL: {}", e)))?;
        if self.admin.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid("admin.token must not be blank".into()));
        }
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `MIP_HOST` overrides `server.host`
/// - `MIP_PORT` overrides `server.port`
/// - `MIP_ORGANIZATION_NAME` overrides `node.organization_name`
/// - `MIP_PUBLIC_URL` overrides `node.public_url`
/// - `MIP_TRUST_THRESHOLD` overrides `node.trust_threshold`
/// - `MIP_ADMIN_TOKEN` overrides `admin.token`
/// - `MIP_LOG_LEVEL` overrides `logging.level`
/// - `MIP_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration fails validation.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Applies `MIP_*` overrides read through `var`. Unparseable numeric values
/// are ignored.
pub fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("MIP_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("MIP_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(name) = var("MIP_ORGANIZATION_NAME") {
        config.node.organization_name = name;
    }
    if let Some(url) = var("MIP_PUBLIC_URL") {
        config.node.public_url = url;
    }
    if let Some(threshold) = var("MIP_TRUST_THRESHOLD") {
        if let Ok(parsed) = threshold.parse() {
            config.node.trust_threshold = parsed;
        }
    }
    if let Some(token) = var("MIP_ADMIN_TOKEN") {
        config.admin.token = Some(token);
    }
    if let Some(level) = var("MIP_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("MIP_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn parse(contents: &str) -> Config {
        toml::from_str(contents).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.node.trust_threshold, 1);
        assert_eq!(config.security.timestamp_window_seconds, 300);
        assert_eq!(config.outbound.timeout_seconds, 10);
        assert_eq!(config.outbound.queue_capacity, 256);
        assert_eq!(config.outbound.max_concurrent_deliveries, 8);
        assert!(config.admin.token.is_none());
        assert!(config.members.is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.node.organization_name, "MIP Node");
    }

    #[test]
    fn file_values_are_loaded() {
        let file = write_config(
            r#"
[server]
host = "0.0.0.0"
port = 8080

[node]
organization_name = "Lodge 12"
contact_person = "Ada Lovelace"
public_url = "https://lodge12.example/"
trust_threshold = 2
declined_requests = "allow_rerequest"

[security]
timestamp_window_seconds = 120

[outbound]
timeout_seconds = 3

[[members]]
member_number = "1001"
first_name = "Ada"
last_name = "Lovelace"
birthdate = "1815-12-10"
"#,
        );
        let config = load_config(file.path().to_str()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.node.organization_name, "Lodge 12");
        assert_eq!(config.node.contact_person.as_deref(), Some("Ada Lovelace"));
        assert_eq!(config.node.trust_threshold, 2);
        assert_eq!(config.outbound_timeout(), Duration::from_secs(3));
        assert_eq!(config.members.len(), 1);
        assert!(config.members[0].good_standing);

        let policy = config.node_policy();
        assert_eq!(policy.timestamp_window_secs, 120);
        assert_eq!(policy.declined_requests, DeclinedRequestPolicy::AllowRerequest);

        let settings = config.identity_settings();
        assert_eq!(settings.public_url, "https://lodge12.example/");
        assert_eq!(settings.trust_threshold, 2);
    }

    #[test]
    fn parse_errors_are_reported() {
        let file = write_config("[server]\nport = \"not a number\"\n");
        assert!(matches!(load_config(file.path().to_str()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let zero_threshold = parse("[node]\ntrust_threshold = 0\n");
        assert!(matches!(zero_threshold.validate(), Err(ConfigError::Invalid(_))));

        let blank_name = parse("[node]\norganization_name = \"  \"\n");
        assert!(matches!(blank_name.validate(), Err(ConfigError::Invalid(_))));

        let zero_window = parse("[security]\ntimestamp_window_seconds = 0\n");
        assert!(matches!(zero_window.validate(), Err(ConfigError::Invalid(_))));

        let zero_timeout = parse("[outbound]\ntimeout_seconds = 0\n");
        assert!(matches!(zero_timeout.validate(), Err(ConfigError::Invalid(_))));

        let no_deliveries = parse("[outbound]\nmax_concurrent_deliveries = 0\n");
        assert!(matches!(no_deliveries.validate(), Err(ConfigError::Invalid(_))));

        let bad_url = parse("[node]\npublic_url = \"localhost\"\n");
        assert!(matches!(bad_url.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = parse("[node]\norganization_name = \"From File\"\n");
        let env: HashMap<&str, &str> = HashMap::from([
            ("MIP_PORT", "4100"),
            ("MIP_ORGANIZATION_NAME", "From Env"),
            ("MIP_TRUST_THRESHOLD", "3"),
            ("MIP_ADMIN_TOKEN", "secret"),
            ("MIP_LOG_JSON", "1"),
            ("MIP_HOST", "not-an-ip"),
        ]);
        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 4100);
        assert_eq!(config.server.host, default_host());
        assert_eq!(config.node.organization_name, "From Env");
        assert_eq!(config.node.trust_threshold, 3);
        assert_eq!(config.admin.token.as_deref(), Some("secret"));
        assert!(config.logging.json);
    }
}
