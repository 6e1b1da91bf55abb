// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Seam between the connection manager and the protocol SDK.
//!
//! The manager owns connection lifecycles; message semantics belong to a
//! [`McpSession`] produced by a [`Connector`]. Production code uses
//! [`super::transport::RmcpConnector`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::config::ServerConfig;
use super::error::McpError;
use super::types::{McpToolResult, PromptSpec, ResourceSpec, ServerInfo, ToolSpec};

/// A live, initialized protocol session with one server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Information reported by the server during the handshake.
    fn server_info(&self) -> Option<ServerInfo>;

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError>;

    async fn list_prompts(&self) -> Result<Vec<PromptSpec>, McpError>;

    async fn list_resources(&self) -> Result<Vec<ResourceSpec>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError>;

    /// Liveness probe. Re-listing tools is cheap and supported everywhere.
    async fn ping(&self) -> Result<(), McpError> {
        self.list_tools().await.map(|_| ())
    }

    /// Close the transport. Further calls fail.
    async fn close(&self) -> Result<(), McpError>;
}

/// Opens transports and performs the protocol handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError>;
}
