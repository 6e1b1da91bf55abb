// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed lifecycle notifications.
//!
//! Events are fanned out on a bounded [`tokio::sync::broadcast`] channel.
//! Slow subscribers observe `RecvError::Lagged` instead of blocking the
//! manager.

use serde::Serialize;
use tokio::sync::broadcast;

use super::name::ServerName;

/// Default capacity of an [`EventBus`].
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Lifecycle event emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum McpEvent {
    /// Initial connection succeeded.
    ServerAdded { name: ServerName },

    /// A connect or reconnect attempt failed.
    ServerError { name: ServerName, error: String },

    /// Server was removed and its transport closed.
    ServerRemoved { name: ServerName },

    /// A retry was armed.
    ReconnectionScheduled {
        name: ServerName,
        attempt: u32,
        delay_ms: u64,
    },

    /// A scheduled retry reconnected.
    ReconnectionSucceeded { name: ServerName, attempts: u32 },

    /// Retries were exhausted; no further automatic attempts.
    ReconnectionFailed { name: ServerName, attempts: u32 },

    /// A health probe failed for a connected server.
    ServerUnhealthy { name: ServerName },

    /// Token usage crossed the warning threshold.
    TokenWarning {
        name: ServerName,
        usage: u64,
        limit: u64,
    },

    /// Token usage crossed the limit.
    TokenLimitExceeded { name: ServerName },
}

impl McpEvent {
    /// Event name as used by older listeners.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServerAdded { .. } => "serverAdded",
            Self::ServerError { .. } => "serverError",
            Self::ServerRemoved { .. } => "serverRemoved",
            Self::ReconnectionScheduled { .. } => "reconnection-scheduled",
            Self::ReconnectionSucceeded { .. } => "reconnection-succeeded",
            Self::ReconnectionFailed { .. } => "reconnection-failed",
            Self::ServerUnhealthy { .. } => "server-unhealthy",
            Self::TokenWarning { .. } => "token-warning",
            Self::TokenLimitExceeded { .. } => "token-limit-exceeded",
        }
    }

    /// Server the event refers to.
    pub fn server(&self) -> &ServerName {
        match self {
            Self::ServerAdded { name }
            | Self::ServerError { name, .. }
            | Self::ServerRemoved { name }
            | Self::ReconnectionScheduled { name, .. }
            | Self::ReconnectionSucceeded { name, .. }
            | Self::ReconnectionFailed { name, .. }
            | Self::ServerUnhealthy { name }
            | Self::TokenWarning { name, .. }
            | Self::TokenLimitExceeded { name } => name,
        }
    }
}

/// Broadcast bus for [`McpEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<McpEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: McpEvent) {
        tracing::debug!(event = event.kind(), server = %event.server(), "mcp event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
