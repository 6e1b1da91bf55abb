// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP error types.
//!
//! The connection manager never panics on an expected failure: every fallible
//! operation returns `Result<T, McpError>`. Only [`McpError::is_retryable`]
//! failures are handed to the reconnection scheduler.

use thiserror::Error;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Bad server name or transport configuration. Never retried.
    #[error("Invalid MCP server configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Transport or handshake failure.
    #[error("Failed to connect to MCP server '{server}': {message}")]
    Connection { server: String, message: String },

    /// Connection or probe timeout.
    #[error("MCP server '{server}' timed out after {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },

    /// Server not tracked by the manager.
    #[error("MCP server not found: {0}")]
    NotFound(String),

    /// Server tracked but not connected.
    #[error("MCP server '{0}' is not ready")]
    NotReady(String),

    /// Tool not found on server.
    #[error("Tool not found: {server}::{tool}")]
    ToolNotFound { server: String, tool: String },

    /// Tool call failed.
    #[error("Tool call '{tool}' failed: {message}")]
    ToolCallFailed { tool: String, message: String },

    /// Protocol error reported by the peer.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Several failures collected during a bulk operation.
    #[error("{} MCP operations failed: {}", .0.len(), summarize(.0))]
    Aggregate(Vec<McpError>),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn summarize(errors: &[McpError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl McpError {
    /// Create a connection error.
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a single-message validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Create a tool call failed error.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolCallFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether the reconnection scheduler may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Short classification used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Connection { .. } | Self::Timeout { .. } => "connection",
            Self::NotFound(_) => "not_found",
            Self::NotReady(_) => "not_ready",
            Self::ToolNotFound { .. } | Self::ToolCallFailed { .. } => "tool",
            Self::Protocol(_) => "protocol",
            Self::Aggregate(_) => "aggregate",
            Self::Config(_) | Self::Io(_) | Self::Json(_) => "config",
        }
    }
}
