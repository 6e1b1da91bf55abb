// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Production [`Connector`] backed by the `rmcp` SDK.
//!
//! stdio servers are spawned as child processes. `http`, `streamable_http`
//! and `sse` endpoints all go through the streamable HTTP client, which
//! speaks the SSE response framing as well.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::config::{expand_env, ServerConfig, TransportSpec};
use super::error::McpError;
use super::session::{Connector, McpSession};
use super::types::{McpToolResult, PromptSpec, ResourceSpec, ServerInfo, ToolSpec};

type Service = RunningService<RoleClient, ()>;

/// Opens real MCP connections.
#[derive(Debug, Clone, Default)]
pub struct RmcpConnector;

impl RmcpConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect_stdio(
        config: &ServerConfig,
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Service, McpError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k, expand_env(v))))
            .stderr(Stdio::null());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| {
            McpError::connection(config.name.as_str(), format!("spawn '{command}': {e}"))
        })?;

        ().serve(transport)
            .await
            .map_err(|e| McpError::connection(config.name.as_str(), format!("initialize: {e}")))
    }

    async fn connect_http(config: &ServerConfig, url: &str) -> Result<Service, McpError> {
        let headers = build_headers(config)?;
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| McpError::connection(config.name.as_str(), format!("http client: {e}")))?;

        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(url.to_string()),
        );

        ().serve(transport)
            .await
            .map_err(|e| McpError::connection(config.name.as_str(), format!("initialize: {e}")))
    }
}

fn build_headers(config: &ServerConfig) -> Result<HeaderMap, McpError> {
    let mut headers = HeaderMap::new();
    for (key, value) in config.transport.expanded_headers() {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| McpError::validation(format!("invalid header name '{key}': {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| McpError::validation(format!("invalid value for header '{key}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        tracing::debug!(server = %config.name, transport = %config.transport, "opening MCP transport");

        let service = match &config.transport {
            TransportSpec::Stdio {
                command,
                args,
                env,
                cwd,
            } => Self::connect_stdio(config, command, args, env, cwd.as_deref()).await?,
            TransportSpec::Http { url, .. }
            | TransportSpec::Sse { url }
            | TransportSpec::StreamableHttp { url, .. } => Self::connect_http(config, url).await?,
        };

        Ok(Arc::new(RmcpSession::new(config.name.to_string(), service)))
    }
}

/// An initialized `rmcp` client session.
pub struct RmcpSession {
    server: String,
    peer: Peer<RoleClient>,
    info: Option<ServerInfo>,
    service: Mutex<Option<Service>>,
}

impl RmcpSession {
    fn new(server: String, service: Service) -> Self {
        let info = service
            .peer_info()
            .and_then(|init| serde_json::to_value(init).ok())
            .map(|v| ServerInfo::from_wire(&v));
        Self {
            server,
            peer: service.peer().clone(),
            info,
            service: Mutex::new(Some(service)),
        }
    }

    fn protocol_error(&self, op: &str, e: impl std::fmt::Display) -> McpError {
        McpError::Protocol(format!("{op} on '{}': {e}", self.server))
    }
}

fn decode_all<T: Serialize, U>(items: Vec<T>, decode: impl Fn(&Value) -> Option<U>) -> Vec<U> {
    items
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .filter_map(|v| decode(&v))
        .collect()
}

#[async_trait]
impl McpSession for RmcpSession {
    fn server_info(&self) -> Option<ServerInfo> {
        self.info.clone()
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|e| McpError::connection(&self.server, format!("tools/list: {e}")))?;
        Ok(decode_all(tools, ToolSpec::from_wire))
    }

    async fn list_prompts(&self) -> Result<Vec<PromptSpec>, McpError> {
        let prompts = self
            .peer
            .list_all_prompts()
            .await
            .map_err(|e| self.protocol_error("prompts/list", e))?;
        Ok(decode_all(prompts, PromptSpec::from_wire))
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSpec>, McpError> {
        let resources = self
            .peer
            .list_all_resources()
            .await
            .map_err(|e| self.protocol_error("resources/list", e))?;
        Ok(decode_all(resources, ResourceSpec::from_wire))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let params = serde_json::from_value(json!({ "name": name, "arguments": arguments }))?;

        let result = self
            .peer
            .call_tool(params)
            .await
            .map_err(|e| McpError::tool_failed(name, e.to_string()))?;
        let wire = serde_json::to_value(&result)?;
        Ok(McpToolResult::from_wire(&wire))
    }

    async fn close(&self) -> Result<(), McpError> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .map(|reason| tracing::debug!(server = %self.server, ?reason, "MCP session closed"))
            .map_err(|e| McpError::connection(&self.server, format!("close: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::name::ServerName;

    #[test]
    fn test_build_headers_expands_env() {
        std::env::set_var("TETHER_TRANSPORT_TEST_TOKEN", "abc");
        let config = ServerConfig::new(
            ServerName::new("remote").unwrap(),
            TransportSpec::http("https://example.com/mcp"),
        )
        .with_headers([("Authorization", "Bearer ${TETHER_TRANSPORT_TEST_TOKEN}")]);

        let headers = build_headers(&config).unwrap();
        assert_eq!(headers["authorization"], "Bearer abc");
    }

    #[test]
    fn test_build_headers_rejects_bad_name() {
        let config = ServerConfig::new(
            ServerName::new("remote").unwrap(),
            TransportSpec::http("https://example.com/mcp"),
        )
        .with_headers([("bad header", "x")]);

        let err = build_headers(&config).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_missing_binary_is_connection_error() {
        let config = ServerConfig::new(
            ServerName::new("ghost").unwrap(),
            TransportSpec::stdio("tether-definitely-not-a-real-binary"),
        );
        let err = match RmcpConnector::new().connect(&config).await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(err.is_retryable());
    }
}
