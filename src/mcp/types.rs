// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP types for connection state, catalog entries and tool results.
//!
//! Descriptors are decoded from the JSON form of the protocol SDK's models,
//! so the manager only depends on the field names of the MCP wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::name::ServerName;

/// Lifecycle status of a tracked server. Untracked servers have no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Transport is being opened or the handshake is in progress.
    Connecting,

    /// Handshake and discovery succeeded.
    Connected,

    /// The last attempt failed. The scheduler may re-drive it.
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one server's connection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Reconnection attempts since the last successful connect.
    pub attempt: u32,
}

impl ConnectionState {
    pub fn connecting() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            connected_at: None,
            last_error: None,
            attempt: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// A capability tagged with the server that provides it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry<T> {
    /// Server this entry belongs to.
    pub server: ServerName,

    #[serde(flatten)]
    pub item: T,
}

impl<T> CatalogEntry<T> {
    pub fn new(server: ServerName, item: T) -> Self {
        Self { server, item }
    }
}

impl<T> std::ops::Deref for CatalogEntry<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

/// Information about an MCP tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,

    pub description: Option<String>,

    /// JSON Schema for tool input.
    pub input_schema: Value,

    /// Whether the tool is destructive (writes files, runs commands, etc.).
    #[serde(default)]
    pub destructive: bool,

    /// Whether the tool is read-only (safe to auto-approve).
    #[serde(default)]
    pub read_only: bool,

    /// Whether the tool is idempotent (safe to retry).
    #[serde(default)]
    pub idempotent: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: serde_json::json!({ "type": "object" }),
            destructive: false,
            read_only: false,
            idempotent: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Decode a `tools/list` entry.
    pub fn from_wire(tool: &Value) -> Option<Self> {
        let name = tool.get("name")?.as_str()?.to_string();
        let hint = |key: &str| {
            tool.get("annotations")
                .and_then(|a| a.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };

        Some(Self {
            name,
            description: tool
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            input_schema: tool
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
            destructive: hint("destructiveHint"),
            read_only: hint("readOnlyHint"),
            idempotent: hint("idempotentHint"),
        })
    }
}

/// An argument accepted by a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Information about an MCP prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl PromptSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
        }
    }

    /// Decode a `prompts/list` entry.
    pub fn from_wire(prompt: &Value) -> Option<Self> {
        let arguments = prompt
            .get("arguments")
            .and_then(Value::as_array)
            .map(|args| {
                args.iter()
                    .filter_map(|a| {
                        Some(PromptArgument {
                            name: a.get("name")?.as_str()?.to_string(),
                            description: a
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            required: a.get("required").and_then(Value::as_bool).unwrap_or(false),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            name: prompt.get("name")?.as_str()?.to_string(),
            description: prompt
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            arguments,
        })
    }
}

/// Information about an MCP resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

impl ResourceSpec {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
        }
    }

    /// Decode a `resources/list` entry.
    pub fn from_wire(resource: &Value) -> Option<Self> {
        let text = |key: &str| {
            resource
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Some(Self {
            uri: text("uri")?,
            name: text("name")?,
            description: text("description"),
            mime_type: text("mimeType"),
        })
    }
}

/// A tool in the aggregated catalog.
pub type McpToolInfo = CatalogEntry<ToolSpec>;

/// A prompt in the aggregated catalog.
pub type McpPromptInfo = CatalogEntry<PromptSpec>;

/// A resource in the aggregated catalog.
pub type McpResourceInfo = CatalogEntry<ResourceSpec>;

impl McpToolInfo {
    /// Get the qualified tool name (`mcp__server__tool`).
    pub fn qualified_name(&self) -> String {
        self.server.qualify(&self.item.name)
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolResult {
    /// Result content (text, images, etc.).
    pub content: Vec<McpContent>,

    /// Whether the server flagged the result as an error.
    #[serde(default)]
    pub is_error: bool,
}

impl McpToolResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Decode a `tools/call` result.
    pub fn from_wire(result: &Value) -> Self {
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let content = result
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(McpContent::from_wire).collect())
            .unwrap_or_default();

        Self { content, is_error }
    }

    /// Get the text content as a single string.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpContent::Text { text } => Some(text.as_str()),
                McpContent::Resource { text, .. } => text.as_deref(),
                McpContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rough token count of the textual output (four characters per token).
    pub fn estimated_tokens(&self) -> u64 {
        let chars: usize = self
            .content
            .iter()
            .map(|c| match c {
                McpContent::Text { text } => text.len(),
                McpContent::Image { data, .. } => data.len(),
                McpContent::Resource { text, .. } => text.as_ref().map_or(0, String::len),
            })
            .sum();
        chars.div_ceil(4) as u64
    }
}

/// Content types that can be returned by MCP tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    /// Plain text content.
    Text { text: String },

    /// Base64-encoded image content.
    Image { data: String, mime_type: String },

    /// Embedded resource.
    Resource {
        uri: String,
        mime_type: Option<String>,
        text: Option<String>,
    },
}

impl McpContent {
    fn from_wire(c: &Value) -> Option<Self> {
        match c.get("type")?.as_str()? {
            "text" => Some(Self::Text {
                text: c.get("text")?.as_str()?.to_string(),
            }),
            "image" => Some(Self::Image {
                data: c.get("data")?.as_str()?.to_string(),
                mime_type: c.get("mimeType")?.as_str()?.to_string(),
            }),
            "resource" => {
                let resource = c.get("resource")?;
                Some(Self::Resource {
                    uri: resource.get("uri")?.as_str()?.to_string(),
                    mime_type: resource
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    text: resource
                        .get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            }
            _ => None,
        }
    }
}

/// Server capabilities reported during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: bool,

    #[serde(default)]
    pub resources: bool,

    #[serde(default)]
    pub prompts: bool,

    #[serde(default)]
    pub logging: bool,
}

/// Server information reported during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub capabilities: ServerCapabilities,

    #[serde(default)]
    pub protocol_version: Option<String>,
}

impl ServerInfo {
    /// Decode an `initialize` result.
    pub fn from_wire(init: &Value) -> Self {
        let info = init.get("serverInfo");
        let field = |key: &str, default: &str| {
            info.and_then(|s| s.get(key))
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let caps = init.get("capabilities");
        let has = |key: &str| caps.and_then(|c| c.get(key)).is_some_and(|v| !v.is_null());

        Self {
            name: field("name", "unknown"),
            version: field("version", "0.0.0"),
            capabilities: ServerCapabilities {
                tools: has("tools"),
                resources: has("resources"),
                prompts: has("prompts"),
                logging: has("logging"),
            },
            protocol_version: init
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            capabilities: ServerCapabilities::default(),
            protocol_version: None,
        }
    }
}

/// Per-server summary printed by `tether mcp servers`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub name: ServerName,
    pub transport: String,
    pub state: ConnectionState,
    pub tool_count: usize,
    pub prompt_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}
