// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `anyhow`-based facade over [`McpManager`] for older call sites.
//!
//! Failures come back as `anyhow::Error` with context; the originating
//! [`McpError`] stays reachable through `downcast_ref`. Events from the core
//! manager are re-published unchanged on the facade's own bus.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::error::Result;

use super::config::{ManagerConfig, ServerConfig, TransportSpec};
use super::error::McpError;
use super::events::{EventBus, McpEvent};
use super::manager::McpManager;
use super::name::ServerName;
use super::session::Connector;
use super::types::{ConnectionState, McpPromptInfo, McpResourceInfo, McpToolInfo, McpToolResult};

/// Connection manager with string names and `anyhow` errors.
#[derive(Debug)]
pub struct ConnectionManager {
    core: McpManager,
    events: EventBus,
    forwarder: JoinHandle<()>,
}

impl ConnectionManager {
    /// Wrap an existing manager. Must be called inside a Tokio runtime.
    pub fn from_manager(core: McpManager) -> Self {
        let events = EventBus::default();
        let forwarder = tokio::spawn(forward(core.subscribe(), events.clone()));
        Self {
            core,
            events,
            forwarder,
        }
    }

    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        Self::from_manager(McpManager::new(config, connector))
    }

    pub fn with_defaults(config: ManagerConfig) -> Self {
        Self::from_manager(McpManager::with_defaults(config))
    }

    /// The underlying `Result`-typed manager.
    pub fn manager(&self) -> &McpManager {
        &self.core
    }

    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.events.subscribe()
    }

    pub async fn add_server(&self, config: ServerConfig) -> Result<()> {
        let name = config.name.clone();
        self.core
            .add_server(config)
            .await
            .map_err(|e| raise(e, format!("adding MCP server '{name}'")))
    }

    /// Connect a server given a plain name and transport.
    pub async fn connect(&self, name: &str, transport: TransportSpec) -> Result<()> {
        let name = parse_name(name)?;
        self.add_server(ServerConfig::new(name, transport)).await
    }

    pub async fn remove_server(&self, name: &str) -> Result<()> {
        let parsed = parse_name(name)?;
        self.core
            .remove_server(&parsed)
            .await
            .map_err(|e| raise(e, format!("removing MCP server '{name}'")))
    }

    /// Names of connected servers.
    pub async fn servers(&self) -> Vec<String> {
        self.core
            .get_servers()
            .await
            .into_iter()
            .map(|n| n.to_string())
            .collect()
    }

    /// Connection state, or `None` for unknown or invalid names.
    pub async fn connection_state(&self, name: &str) -> Option<ConnectionState> {
        let name = ServerName::new(name)?;
        self.core.get_connection_state(&name).await
    }

    pub async fn list_tools(&self) -> Vec<McpToolInfo> {
        self.core.get_tools().await
    }

    pub async fn list_prompts(&self) -> Vec<McpPromptInfo> {
        self.core.get_prompts().await
    }

    pub async fn list_resources(&self) -> Vec<McpResourceInfo> {
        self.core.list_resources().await
    }

    pub async fn call_tool(&self, qualified: &str, arguments: Value) -> Result<McpToolResult> {
        self.core
            .call_tool(qualified, arguments)
            .await
            .map_err(|e| raise(e, format!("calling MCP tool '{qualified}'")))
    }

    pub async fn health_check(&self, name: &str) -> Result<bool> {
        let parsed = parse_name(name)?;
        self.core
            .health_check(&parsed)
            .await
            .map_err(|e| raise(e, format!("health check for MCP server '{name}'")))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.core
            .shutdown()
            .await
            .context("shutting down MCP connections")
    }

    pub async fn dispose(&self) -> Result<()> {
        self.shutdown().await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn raise(error: McpError, context: String) -> anyhow::Error {
    anyhow::Error::new(error).context(context)
}

fn parse_name(raw: &str) -> Result<ServerName> {
    ServerName::new(raw)
        .ok_or_else(|| McpError::validation(format!("invalid server name '{raw}'")))
        .map_err(|e| raise(e, format!("resolving MCP server '{raw}'")))
}

async fn forward(mut rx: broadcast::Receiver<McpEvent>, bus: EventBus) {
    loop {
        match rx.recv().await {
            Ok(event) => bus.emit(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "MCP event forwarder lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
