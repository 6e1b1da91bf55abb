// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests for the MCP connection manager against in-process servers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use tether::mcp::{
    ConnectionManager, ConnectionStatus, Connector, HealthCheckConfig, ManagerConfig,
    McpError, McpEvent, McpManager, McpSession, McpToolResult, PromptSpec, ReconnectionConfig,
    ResourceSpec, ServerCapabilities, ServerConfig, ServerInfo, ServerName, TokenLimitConfig,
    ToolSpec, TransportSpec,
};

// ============================================================================
// In-process servers
// ============================================================================

/// A server that can be taken down and brought back up.
#[derive(Default)]
struct Server {
    down: AtomicBool,
}

struct Session {
    server: Arc<Server>,
    name: String,
}

#[async_trait]
impl McpSession for Session {
    fn server_info(&self) -> Option<ServerInfo> {
        Some(ServerInfo {
            name: format!("{}-server", self.name),
            version: "1.0.0".to_string(),
            capabilities: ServerCapabilities {
                tools: true,
                resources: true,
                prompts: true,
                logging: false,
            },
            protocol_version: None,
        })
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        if self.server.down.load(Ordering::SeqCst) {
            return Err(McpError::connection(&self.name, "broken pipe"));
        }
        Ok(vec![
            ToolSpec::new("search").with_description("Search the index"),
            ToolSpec::new("status"),
        ])
    }

    async fn list_prompts(&self) -> Result<Vec<PromptSpec>, McpError> {
        Ok(vec![PromptSpec::new("summarize")])
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSpec>, McpError> {
        Ok(vec![ResourceSpec::new(
            format!("mem://{}/index", self.name),
            "index",
        )])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        if self.server.down.load(Ordering::SeqCst) {
            return Err(McpError::connection(&self.name, "broken pipe"));
        }
        Ok(McpToolResult::text(format!("{}:{}:{}", self.name, name, arguments)))
    }

    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }
}

#[derive(Default)]
struct Cluster {
    servers: Mutex<HashMap<String, Arc<Server>>>,
    connects: AtomicUsize,
}

impl Cluster {
    fn server(&self, name: &str) -> Arc<Server> {
        Arc::clone(
            self.servers
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default(),
        )
    }

    fn set_down(&self, name: &str, down: bool) {
        self.server(name).down.store(down, Ordering::SeqCst);
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for Cluster {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let server = self.server(config.name.as_str());
        if server.down.load(Ordering::SeqCst) {
            return Err(McpError::connection(config.name.as_str(), "connection refused"));
        }
        Ok(Arc::new(Session {
            server,
            name: config.name.to_string(),
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn name(raw: &str) -> ServerName {
    ServerName::new(raw).unwrap()
}

fn server_config(raw: &str) -> ServerConfig {
    ServerConfig::new(name(raw), TransportSpec::stdio(format!("mcp-{raw}")))
}

fn quiet_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_reconnection(ReconnectionConfig {
            initial_delay_ms: 500,
            max_delay_ms: 4_000,
            max_retries: 3,
            ..Default::default()
        })
        .with_health_check(HealthCheckConfig {
            interval_ms: 1_000,
            ..Default::default()
        })
}

/// Receive events until one matches, failing after a minute of (virtual) time.
async fn wait_for(
    rx: &mut broadcast::Receiver<McpEvent>,
    pred: impl Fn(&McpEvent) -> bool,
) -> McpEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed");
        if pred(&event) {
            return event;
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_catalog_spans_servers() {
    let cluster = Arc::new(Cluster::default());
    let manager = McpManager::new(quiet_config(), cluster.clone());

    let results = manager
        .add_servers([server_config("search"), server_config("git")])
        .await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let servers: Vec<String> = manager
        .get_servers()
        .await
        .iter()
        .map(|n| n.to_string())
        .collect();
    assert_eq!(servers, vec!["git", "search"]);

    let tools: Vec<String> = manager
        .get_tools()
        .await
        .iter()
        .map(|t| t.qualified_name())
        .collect();
    assert_eq!(
        tools,
        vec![
            "mcp__git__search",
            "mcp__git__status",
            "mcp__search__search",
            "mcp__search__status",
        ]
    );
    assert_eq!(manager.get_prompts().await.len(), 2);
    assert_eq!(manager.list_resources().await.len(), 2);

    let result = manager
        .call_tool("mcp__search__search", json!({"q": "tokio"}))
        .await
        .unwrap();
    assert_eq!(result.as_text(), r#"search:search:{"q":"tokio"}"#);

    manager.remove_server(&name("git")).await.unwrap();
    assert!(manager.get_connection_state(&name("git")).await.is_none());
    assert!(manager
        .get_tools()
        .await
        .iter()
        .all(|t| t.server.as_str() == "search"));

    manager.shutdown().await.unwrap();
    assert!(manager.get_servers().await.is_empty());
    assert_eq!(cluster.connects(), 2);
}

#[tokio::test]
async fn test_invalid_transport_is_rejected_before_connecting() {
    let cluster = Arc::new(Cluster::default());
    let manager = McpManager::new(quiet_config(), cluster.clone());

    let err = manager
        .add_server(ServerConfig::new(name("remote"), TransportSpec::sse("not a url")))
        .await
        .unwrap_err();

    assert!(matches!(err, McpError::Validation(_)));
    assert!(manager.get_connection_state(&name("remote")).await.is_none());
    assert_eq!(cluster.connects(), 0);
}

// ============================================================================
// Self-healing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_crashed_server_is_detected_and_reconnected() {
    let cluster = Arc::new(Cluster::default());
    let manager = McpManager::new(quiet_config(), cluster.clone());
    let mut rx = manager.subscribe();

    manager.add_server(server_config("search")).await.unwrap();
    assert!(manager.start_health_checks());

    cluster.set_down("search", true);
    wait_for(&mut rx, |e| matches!(e, McpEvent::ServerUnhealthy { .. })).await;

    let state = manager.get_connection_state(&name("search")).await.unwrap();
    assert_ne!(state.status, ConnectionStatus::Connected);
    assert!(manager.get_tools().await.is_empty());
    assert!(matches!(
        manager.call_tool("mcp__search__status", json!({})).await,
        Err(McpError::NotReady(_))
    ));

    // First retry hits the still-down server.
    wait_for(&mut rx, |e| {
        matches!(e, McpEvent::ReconnectionScheduled { attempt: 2, .. })
    })
    .await;

    cluster.set_down("search", false);
    let event = wait_for(&mut rx, |e| {
        matches!(e, McpEvent::ReconnectionSucceeded { .. })
    })
    .await;
    assert_eq!(
        event,
        McpEvent::ReconnectionSucceeded {
            name: name("search"),
            attempts: 2,
        }
    );

    assert_eq!(manager.get_tools().await.len(), 2);
    let report = manager.health_report(&name("search")).await.unwrap();
    assert!(report.failure_count >= 1);

    manager.shutdown().await.unwrap();
    assert!(!manager.health_checks_running());
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_after_max_attempts() {
    let cluster = Arc::new(Cluster::default());
    cluster.set_down("search", true);
    let manager = McpManager::new(quiet_config(), cluster.clone());
    let mut rx = manager.subscribe();

    let err = manager.add_server(server_config("search")).await.unwrap_err();
    assert!(err.is_retryable());

    let event = wait_for(&mut rx, |e| matches!(e, McpEvent::ReconnectionFailed { .. })).await;
    assert_eq!(
        event,
        McpEvent::ReconnectionFailed {
            name: name("search"),
            attempts: 3,
        }
    );

    // Initial attempt plus three retries, and nothing after that.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(cluster.connects(), 4);
    assert!(!manager.reconnect_pending(&name("search")));

    // A manual reconnect still works once the server is back.
    cluster.set_down("search", false);
    manager.reconnect(&name("search")).await.unwrap();
    assert_eq!(manager.get_servers().await, vec![name("search")]);
}

// ============================================================================
// Token budget
// ============================================================================

#[tokio::test]
async fn test_token_budget_events() {
    let cluster = Arc::new(Cluster::default());
    let config = quiet_config().with_token_limits(TokenLimitConfig {
        enabled: true,
        max_tokens_per_server: 20,
        warning_threshold_percent: 50,
    });
    let manager = McpManager::new(config, cluster);
    let mut rx = manager.subscribe();
    manager.add_server(server_config("search")).await.unwrap();

    manager.record_token_usage(&name("search"), 12).await;
    let warning = wait_for(&mut rx, |e| matches!(e, McpEvent::TokenWarning { .. })).await;
    assert_eq!(
        warning,
        McpEvent::TokenWarning {
            name: name("search"),
            usage: 12,
            limit: 20,
        }
    );

    manager.record_token_usage(&name("search"), 10).await;
    wait_for(&mut rx, |e| matches!(e, McpEvent::TokenLimitExceeded { .. })).await;
    assert_eq!(manager.token_usage(&name("search")).await, 22);
}

// ============================================================================
// anyhow facade
// ============================================================================

#[tokio::test]
async fn test_facade_reports_typed_causes() {
    let cluster = Arc::new(Cluster::default());
    let facade = ConnectionManager::new(
        ManagerConfig::default().with_reconnection(ReconnectionConfig::disabled()),
        cluster.clone(),
    );

    facade
        .connect("search", TransportSpec::stdio("mcp-search"))
        .await
        .unwrap();
    assert_eq!(facade.list_tools().await.len(), 2);

    let err = facade
        .call_tool("mcp__search__missing", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<McpError>(),
        Some(McpError::ToolNotFound { .. })
    ));

    cluster.set_down("search", true);
    let err = facade
        .call_tool("mcp__search__status", json!({}))
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<McpError>().is_some());

    facade.shutdown().await.unwrap();
    facade.shutdown().await.unwrap();
    assert!(facade.servers().await.is_empty());
}
