// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-server token budget for tool output.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::config::TokenLimitConfig;
use super::events::McpEvent;
use super::name::ServerName;

#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    total: u64,
    warned: bool,
    exceeded: bool,
}

/// Accumulates token usage and decides when to warn.
#[derive(Debug)]
pub struct TokenTracker {
    config: TokenLimitConfig,
    usage: RwLock<HashMap<ServerName, Usage>>,
}

impl TokenTracker {
    pub fn new(config: TokenLimitConfig) -> Self {
        Self {
            config,
            usage: RwLock::new(HashMap::new()),
        }
    }

    fn warning_threshold(&self) -> u64 {
        self.config.max_tokens_per_server * u64::from(self.config.warning_threshold_percent) / 100
    }

    /// Add `tokens` to `name`'s total and return the events to publish.
    ///
    /// Each threshold fires at most once until [`TokenTracker::reset`].
    pub async fn record(&self, name: &ServerName, tokens: u64) -> Vec<McpEvent> {
        if !self.config.enabled {
            return Vec::new();
        }

        let limit = self.config.max_tokens_per_server;
        let warn_at = self.warning_threshold();
        let mut usage = self.usage.write().await;
        let entry = usage.entry(name.clone()).or_default();
        entry.total = entry.total.saturating_add(tokens);

        let mut events = Vec::new();
        if !entry.warned && entry.total >= warn_at {
            entry.warned = true;
            tracing::warn!(server = %name, usage = entry.total, limit, "MCP token usage warning");
            events.push(McpEvent::TokenWarning {
                name: name.clone(),
                usage: entry.total,
                limit,
            });
        }
        if !entry.exceeded && entry.total > limit {
            entry.exceeded = true;
            tracing::warn!(server = %name, usage = entry.total, limit, "MCP token limit exceeded");
            events.push(McpEvent::TokenLimitExceeded { name: name.clone() });
        }
        events
    }

    pub async fn usage(&self, name: &ServerName) -> u64 {
        self.usage.read().await.get(name).map_or(0, |u| u.total)
    }

    pub async fn reset(&self, name: &ServerName) {
        self.usage.write().await.remove(name);
    }

    pub async fn clear(&self) {
        self.usage.write().await.clear();
    }
}
