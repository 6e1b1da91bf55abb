// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP server and manager configuration.
//!
//! Server entries are read from the `mcpServers` section of `.tether.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "filesystem": {
//!       "transport": {
//!         "type": "stdio",
//!         "command": "npx",
//!         "args": ["-y", "@modelcontextprotocol/server-filesystem", "/path"]
//!       },
//!       "startup_timeout_sec": 30
//!     },
//!     "github": {
//!       "transport": {
//!         "type": "streamable_http",
//!         "url": "https://mcp.github.com/v1",
//!         "headers": { "Authorization": "Bearer ${GITHUB_TOKEN}" }
//!       },
//!       "enabled_tools": ["get_issue", "create_pr"]
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::error::McpError;
use super::name::ServerName;

/// Transport used to reach an MCP server. Selected by the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportSpec {
    /// Local subprocess speaking JSON-RPC over stdin/stdout.
    Stdio {
        #[serde(default)]
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// Plain HTTP endpoint.
    Http {
        #[serde(default)]
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
    },

    /// Server-Sent Events endpoint.
    Sse {
        #[serde(default)]
        url: String,
    },

    /// Streamable HTTP endpoint.
    StreamableHttp {
        #[serde(default)]
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
    },
}

impl TransportSpec {
    /// Create a stdio transport.
    pub fn stdio(command: impl Into<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Create an HTTP transport.
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: None,
        }
    }

    /// Create an SSE transport.
    pub fn sse(url: impl Into<String>) -> Self {
        Self::Sse { url: url.into() }
    }

    /// Create a streamable HTTP transport.
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self::StreamableHttp {
            url: url.into(),
            headers: None,
        }
    }

    /// Discriminant as it appears in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Sse { .. } => "sse",
            Self::StreamableHttp { .. } => "streamable_http",
        }
    }

    /// Headers with `${VAR}` references expanded from the environment.
    pub fn expanded_headers(&self) -> HashMap<String, String> {
        match self {
            Self::Http {
                headers: Some(headers),
                ..
            }
            | Self::StreamableHttp {
                headers: Some(headers),
                ..
            } => headers
                .iter()
                .map(|(k, v)| (k.clone(), expand_env(v)))
                .collect(),
            _ => HashMap::new(),
        }
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Expand `${VAR}` references. Unset variables expand to an empty string.
///
/// Substituted values are not expanded again.
pub fn expand_env(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        result.push_str(&std::env::var(var_name).unwrap_or_default());
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}

/// Outcome of [`validate_transport_config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Check the shape of a transport configuration.
pub fn validate_transport_config(spec: Option<&TransportSpec>) -> TransportValidation {
    let Some(spec) = spec else {
        return TransportValidation {
            is_valid: false,
            errors: vec!["transport configuration required".to_string()],
        };
    };

    let mut errors = Vec::new();
    match spec {
        TransportSpec::Stdio { command, .. } => {
            if command.trim().is_empty() {
                errors.push("stdio transport requires a non-empty command".to_string());
            }
        }
        TransportSpec::Http { url, .. }
        | TransportSpec::Sse { url }
        | TransportSpec::StreamableHttp { url, .. } => {
            if let Err(message) = check_url(url) {
                errors.push(format!("{} transport {}", spec.kind(), message));
            }
        }
    }

    TransportValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

fn check_url(raw: &str) -> Result<(), String> {
    if raw.trim().is_empty() {
        return Err("requires a url".to_string());
    }
    let url = Url::parse(raw).map_err(|e| format!("has an invalid url '{raw}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("url '{raw}' must use http or https, not '{other}'")),
    }
}

/// Server configuration exactly as it appears on the wire, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawServerConfig {
    /// Server name. Filled from the map key when loaded from `mcpServers`.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub transport: Option<TransportSpec>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_sec: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_sec: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_tool_timeout() -> u64 {
    300
}

/// Validated configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawServerConfig")]
pub struct ServerConfig {
    pub name: ServerName,

    pub transport: TransportSpec,

    /// Whether this server is enabled.
    pub enabled: bool,

    /// Connect and handshake timeout in seconds.
    pub startup_timeout_sec: u64,

    /// Tool call timeout in seconds.
    pub tool_timeout_sec: u64,

    /// List of enabled tools (if empty, all tools are enabled).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<String>,

    /// List of disabled tools.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,
}

impl ServerConfig {
    /// Create a configuration with default timeouts and no tool filters.
    pub fn new(name: ServerName, transport: TransportSpec) -> Self {
        Self {
            name,
            transport,
            enabled: true,
            startup_timeout_sec: default_startup_timeout(),
            tool_timeout_sec: default_tool_timeout(),
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
        }
    }

    /// Add command arguments (stdio only).
    pub fn with_args(mut self, new_args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let TransportSpec::Stdio { args, .. } = &mut self.transport {
            *args = new_args.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Set request headers (HTTP and streamable HTTP only).
    pub fn with_headers(
        mut self,
        new_headers: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        if let TransportSpec::Http { headers, .. } | TransportSpec::StreamableHttp { headers, .. } =
            &mut self.transport
        {
            *headers = Some(
                new_headers
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            );
        }
        self
    }

    /// Set the startup timeout.
    pub fn with_startup_timeout(mut self, secs: u64) -> Self {
        self.startup_timeout_sec = secs;
        self
    }

    /// Set enabled tools.
    pub fn with_enabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enabled_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set disabled tools.
    pub fn with_disabled_tools(
        mut self,
        tools: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.disabled_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_sec)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_sec)
    }

    /// Check if a tool is enabled.
    pub fn is_tool_enabled(&self, tool_name: &str) -> bool {
        if self.disabled_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = McpError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let mut errors = Vec::new();
        let name = ServerName::new(&raw.name);
        if name.is_none() {
            errors.push(format!("invalid server name '{}'", raw.name));
        }
        errors.extend(validate_transport_config(raw.transport.as_ref()).errors);

        match (name, raw.transport) {
            (Some(name), Some(transport)) if errors.is_empty() => Ok(Self {
                name,
                transport,
                enabled: raw.enabled,
                startup_timeout_sec: raw.startup_timeout_sec,
                tool_timeout_sec: raw.tool_timeout_sec,
                enabled_tools: raw.enabled_tools,
                disabled_tools: raw.disabled_tools,
            }),
            _ => Err(McpError::Validation(errors)),
        }
    }
}

/// Reconnection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectionConfig {
    /// A policy that never schedules a retry.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Periodic health probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            probe_timeout_ms: 10_000,
        }
    }
}

/// Per-server token budget for tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenLimitConfig {
    pub enabled: bool,
    pub max_tokens_per_server: u64,
    pub warning_threshold_percent: u8,
}

impl Default for TokenLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_tokens_per_server: 100_000,
            warning_threshold_percent: 80,
        }
    }
}

/// Everything the manager needs besides the servers themselves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
    pub reconnection: ReconnectionConfig,
    pub health_check: HealthCheckConfig,
    pub token_limits: TokenLimitConfig,
}

impl ManagerConfig {
    pub fn with_reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = reconnection;
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_token_limits(mut self, token_limits: TokenLimitConfig) -> Self {
        self.token_limits = token_limits;
        self
    }
}

/// Resolve a `mcpServers` map into validated configs, keyed by name.
///
/// Entries that fail validation are returned separately so callers can
/// report them without dropping the valid ones.
pub fn resolve_servers(
    servers: &HashMap<String, RawServerConfig>,
) -> (Vec<ServerConfig>, Vec<(String, McpError)>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();

    let mut names: Vec<&String> = servers.keys().collect();
    names.sort();
    for key in names {
        let mut raw = servers[key].clone();
        if raw.name.is_empty() {
            raw.name = key.clone();
        }
        match ServerConfig::try_from(raw) {
            Ok(config) => valid.push(config),
            Err(e) => invalid.push((key.clone(), e)),
        }
    }

    (valid, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_shape() {
        let json = r#"
        {
            "name": "filesystem",
            "transport": {
                "type": "stdio",
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
            }
        }
        "#;

        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name.as_str(), "filesystem");
        assert_eq!(config.transport.kind(), "stdio");
        assert!(config.enabled);
        assert_eq!(config.startup_timeout_sec, 30);
    }

    #[test]
    fn test_parse_rejects_invalid_entries() {
        let json = r#"{ "name": "bad name", "transport": { "type": "sse", "url": "nope" } }"#;
        let err = serde_json::from_str::<ServerConfig>(json).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("invalid server name"));
        assert!(text.contains("sse transport"));
    }

    #[test]
    fn test_streamable_http_tag() {
        let json = r#"{ "type": "streamable_http", "url": "https://x.dev/mcp", "headers": {"X-Key": "1"} }"#;
        let spec: TransportSpec = serde_json::from_str(json).unwrap();
        assert!(matches!(spec, TransportSpec::StreamableHttp { .. }));
        assert_eq!(spec.to_string(), "streamable_http");
    }

    #[test]
    fn test_validate_missing_transport() {
        let result = validate_transport_config(None);
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["transport configuration required".to_string()]);
    }

    #[test]
    fn test_validate_stdio_command() {
        assert!(validate_transport_config(Some(&TransportSpec::stdio("npx"))).is_valid);

        let result = validate_transport_config(Some(&TransportSpec::stdio("  ")));
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_validate_urls() {
        for spec in [
            TransportSpec::http("https://api.example.com/mcp"),
            TransportSpec::sse("http://localhost:8080/sse"),
            TransportSpec::streamable_http("https://api.example.com/mcp"),
        ] {
            assert!(validate_transport_config(Some(&spec)).is_valid, "{spec}");
        }

        for spec in [
            TransportSpec::http(""),
            TransportSpec::sse("not a url"),
            TransportSpec::streamable_http("ftp://example.com"),
        ] {
            let result = validate_transport_config(Some(&spec));
            assert!(!result.is_valid, "{spec}");
            assert_eq!(result.errors.len(), 1);
        }
    }

    #[test]
    fn test_tool_filtering() {
        let name = ServerName::new("fs").unwrap();
        let config = ServerConfig::new(name.clone(), TransportSpec::stdio("test"))
            .with_enabled_tools(["read_file", "write_file"]);

        assert!(config.is_tool_enabled("read_file"));
        assert!(!config.is_tool_enabled("delete_file"));

        let config = ServerConfig::new(name, TransportSpec::stdio("test"))
            .with_disabled_tools(["delete_file"]);
        assert!(config.is_tool_enabled("any_tool"));
        assert!(!config.is_tool_enabled("delete_file"));
    }

    #[test]
    fn test_expanded_values_are_not_rescanned() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("TETHER_TEST_SELF_REF", "${TETHER_TEST_SELF_REF}");
        }

        assert_eq!(
            expand_env("Bearer ${TETHER_TEST_SELF_REF} and ${TETHER_TEST_UNSET_VAR}!"),
            "Bearer ${TETHER_TEST_SELF_REF} and !"
        );
        assert_eq!(expand_env("open ${NO_CLOSE"), "open ${NO_CLOSE");

        // SAFETY: cleanup after test
        unsafe {
            std::env::remove_var("TETHER_TEST_SELF_REF");
        }
    }

    #[test]
    fn test_header_env_expansion() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("TETHER_TEST_TOKEN", "my_secret_token");
        }

        let config = ServerConfig::new(
            ServerName::new("gh").unwrap(),
            TransportSpec::http("https://api.example.com"),
        )
        .with_headers([("Authorization", "Bearer ${TETHER_TEST_TOKEN}")]);

        let headers = config.transport.expanded_headers();
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("Bearer my_secret_token")
        );

        // SAFETY: cleanup after test
        unsafe {
            std::env::remove_var("TETHER_TEST_TOKEN");
        }
    }

    #[test]
    fn test_manager_config_defaults() {
        let config: ManagerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.reconnection.max_retries, 5);
        assert_eq!(config.reconnection.initial_delay_ms, 1_000);
        assert_eq!(config.reconnection.max_delay_ms, 30_000);
        assert_eq!(config.health_check.interval_ms, 60_000);
        assert!(!config.token_limits.enabled);

        let config: ManagerConfig =
            serde_json::from_str(r#"{"reconnection": {"maxRetries": 2}}"#).unwrap();
        assert_eq!(config.reconnection.max_retries, 2);
        assert!(config.reconnection.enabled);
    }

    #[test]
    fn test_resolve_servers_uses_map_keys() {
        let json = r#"
        {
            "fs": { "transport": { "type": "stdio", "command": "npx" } },
            "broken": { "transport": { "type": "http", "url": "" } },
            "bad__name": { "transport": { "type": "stdio", "command": "x" } }
        }
        "#;
        let servers: HashMap<String, RawServerConfig> = serde_json::from_str(json).unwrap();
        let (valid, invalid) = resolve_servers(&servers);

        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].name.as_str(), "fs");
        assert_eq!(invalid.len(), 2);
        assert!(invalid
            .iter()
            .all(|(_, e)| matches!(e, McpError::Validation(_))));
    }
}
