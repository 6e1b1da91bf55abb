// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! A [`WorkspaceConfig`] is what a single file contains; every field is
//! optional so files can be layered. [`ResolvedConfig`] is the merged result.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::mcp::{
    resolve_servers, HealthCheckConfig, ManagerConfig, McpError, RawServerConfig,
    ReconnectionConfig, ServerConfig, TokenLimitConfig,
};

/// Configuration as stored in `.tether.json` or `~/.tether/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// MCP servers keyed by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<HashMap<String, RawServerConfig>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnection: Option<ReconnectionConfigPartial>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfigPartial>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_limits: Option<TokenLimitConfigPartial>,

    /// Default log level when neither `--verbose` nor `RUST_LOG` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Reconnection settings where unset fields inherit from lower layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectionConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
}

impl ReconnectionConfigPartial {
    pub fn apply(&self, target: &mut ReconnectionConfig) {
        if let Some(v) = self.enabled {
            target.enabled = v;
        }
        if let Some(v) = self.max_retries {
            target.max_retries = v;
        }
        if let Some(v) = self.initial_delay_ms {
            target.initial_delay_ms = v;
        }
        if let Some(v) = self.max_delay_ms {
            target.max_delay_ms = v;
        }
        if let Some(v) = self.backoff_multiplier {
            target.backoff_multiplier = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,
}

impl HealthCheckConfigPartial {
    pub fn apply(&self, target: &mut HealthCheckConfig) {
        if let Some(v) = self.enabled {
            target.enabled = v;
        }
        if let Some(v) = self.interval_ms {
            target.interval_ms = v;
        }
        if let Some(v) = self.probe_timeout_ms {
            target.probe_timeout_ms = v;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLimitConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_server: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_threshold_percent: Option<u8>,
}

impl TokenLimitConfigPartial {
    pub fn apply(&self, target: &mut TokenLimitConfig) {
        if let Some(v) = self.enabled {
            target.enabled = v;
        }
        if let Some(v) = self.max_tokens_per_server {
            target.max_tokens_per_server = v;
        }
        if let Some(v) = self.warning_threshold_percent {
            target.warning_threshold_percent = v;
        }
    }
}

/// Fully merged configuration.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub mcp_servers: HashMap<String, RawServerConfig>,

    #[serde(flatten)]
    pub manager: ManagerConfig,

    pub log_level: Option<String>,
}

impl ResolvedConfig {
    /// Validated server configs sorted by name, plus the entries that failed.
    pub fn servers(&self) -> (Vec<ServerConfig>, Vec<(String, McpError)>) {
        resolve_servers(&self.mcp_servers)
    }
}
