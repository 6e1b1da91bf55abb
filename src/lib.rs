// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tether - a self-healing Model Context Protocol connection manager for AI
//! coding assistants.
//!
//! # Architecture
//!
//! - [`mcp`] - Server connections, reconnection, health checks and the
//!   aggregated tool/prompt/resource catalog
//! - [`config`] - Configuration loading and merging
//! - [`error`] - Error types and result aliases
//! - [`telemetry`] - Logging setup and MCP metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::config::{load_config, CliOptions};
//! use tether::mcp::McpManager;
//!
//! let config = load_config(".".as_ref(), CliOptions::default())?;
//! let manager = McpManager::with_defaults(config.manager.clone());
//! let (servers, _invalid) = config.servers();
//! manager.add_servers(servers).await;
//! ```

pub mod config;
pub mod error;
pub mod mcp;
pub mod telemetry;

pub use error::{ConfigError, Result};
pub use mcp::{ConnectionManager, McpError, McpEvent, McpManager, ServerConfig, ServerName};

/// Tether version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
