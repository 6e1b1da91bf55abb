// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model Context Protocol (MCP) connection management.
//!
//! The [`McpManager`] keeps one connection per configured server, heals
//! connections that drop, and exposes the union of their tools, prompts and
//! resources as a single catalog.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │         ConnectionManager (anyhow facade, own events)     │
//! └─────────────────────────────┬─────────────────────────────┘
//!                               │
//! ┌─────────────────────────────▼─────────────────────────────┐
//! │                        McpManager                          │
//! │  KeyedLock ─ records ─ ReconnectScheduler ─ HealthMonitor  │
//! │                 │                      EventBus ──► subs    │
//! └─────────────────┼──────────────────────────────────────────┘
//!                   │ Connector / McpSession
//!     ┌─────────────┼──────────────┬───────────────┐
//!     ▼             ▼              ▼               ▼
//!  ┌───────┐   ┌────────┐     ┌────────┐   ┌──────────────────┐
//!  │ stdio │   │  http  │     │  sse   │   │ streamable_http  │
//!  └───────┘   └────────┘     └────────┘   └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::mcp::{ManagerConfig, McpManager, ServerConfig, ServerName, TransportSpec};
//!
//! let manager = McpManager::with_defaults(ManagerConfig::default());
//! let name = ServerName::new("filesystem").unwrap();
//! manager
//!     .add_server(ServerConfig::new(name, TransportSpec::stdio("mcp-server-filesystem")))
//!     .await?;
//!
//! for tool in manager.get_tools().await {
//!     println!("{}", tool.qualified_name());
//! }
//!
//! let result = manager
//!     .call_tool("mcp__filesystem__read_file", serde_json::json!({"path": "README.md"}))
//!     .await?;
//! manager.shutdown().await?;
//! ```

pub mod catalog;
pub mod compat;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod lock;
pub mod manager;
pub mod name;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod types;
pub mod usage;

#[cfg(test)]
pub(crate) mod fake;

pub use compat::ConnectionManager;
pub use config::{
    resolve_servers, validate_transport_config, HealthCheckConfig, ManagerConfig,
    RawServerConfig, ReconnectionConfig, ServerConfig, TokenLimitConfig, TransportSpec,
    TransportValidation,
};
pub use error::McpError;
pub use events::{EventBus, McpEvent};
pub use health::{HealthMonitor, HealthReport, ServerStats};
pub use manager::McpManager;
pub use name::{split_qualified, ServerName};
pub use reconnect::backoff_delay;
pub use session::{Connector, McpSession};
pub use transport::RmcpConnector;
pub use types::*;
