// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Aggregated view of tools, prompts and resources across servers.
//!
//! Only servers in `connected` status contribute. Entries keep their owning
//! server so calls can be routed back with a qualified name.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tracing::instrument;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::error::McpError;
use super::manager::{McpManager, ServerRecord};
use super::name::{split_qualified, ServerName};
use super::session::McpSession;
use super::types::{CatalogEntry, McpPromptInfo, McpResourceInfo, McpToolInfo, McpToolResult};

fn collect<'a, T: Clone + 'a>(
    records: impl Iterator<Item = (&'a ServerName, &'a ServerRecord)>,
    items: impl Fn(&'a ServerRecord) -> &'a [T],
) -> Vec<CatalogEntry<T>> {
    let mut connected: Vec<_> = records.filter(|(_, r)| r.is_connected()).collect();
    connected.sort_by(|a, b| a.0.cmp(b.0));
    connected
        .into_iter()
        .flat_map(|(name, record)| {
            items(record)
                .iter()
                .map(move |item| CatalogEntry::new(name.clone(), item.clone()))
        })
        .collect()
}

impl McpManager {
    /// Tools from every connected server, grouped by server name.
    pub async fn get_tools(&self) -> Vec<McpToolInfo> {
        let records = self.inner.records.read().await;
        collect(records.iter(), |r| r.tools.as_slice())
    }

    /// Prompts from every connected server, grouped by server name.
    pub async fn get_prompts(&self) -> Vec<McpPromptInfo> {
        let records = self.inner.records.read().await;
        collect(records.iter(), |r| r.prompts.as_slice())
    }

    /// Ask every connected server for its resources concurrently.
    ///
    /// Servers that fail to answer are logged and left out.
    #[instrument(skip(self))]
    pub async fn list_resources(&self) -> Vec<McpResourceInfo> {
        let mut sessions: Vec<(ServerName, Arc<dyn McpSession>)> = {
            let records = self.inner.records.read().await;
            records
                .iter()
                .filter(|(_, r)| r.is_connected())
                .filter_map(|(n, r)| r.session.clone().map(|s| (n.clone(), s)))
                .collect()
        };
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        let listings = join_all(sessions.iter().map(|(_, s)| s.list_resources())).await;

        let mut resources = Vec::new();
        for ((name, _), listing) in sessions.into_iter().zip(listings) {
            match listing {
                Ok(items) => {
                    resources.extend(items.into_iter().map(|r| CatalogEntry::new(name.clone(), r)))
                }
                Err(e) => tracing::warn!(server = %name, error = %e, "failed to list resources"),
            }
        }
        resources
    }

    /// Look up a tool by its qualified `mcp__server__tool` name.
    pub async fn find_tool(&self, qualified: &str) -> Option<McpToolInfo> {
        let (server, tool) = split_qualified(qualified)?;
        let records = self.inner.records.read().await;
        let record = records.get(&server).filter(|r| r.is_connected())?;
        record
            .tools
            .iter()
            .find(|t| t.name == tool)
            .map(|t| CatalogEntry::new(server.clone(), t.clone()))
    }

    /// Route a call to the server that owns `qualified`.
    ///
    /// Output size is charged to the server's token budget.
    #[instrument(skip(self, arguments))]
    pub async fn call_tool(
        &self,
        qualified: &str,
        arguments: Value,
    ) -> Result<McpToolResult, McpError> {
        let (server, tool) = split_qualified(qualified)
            .ok_or_else(|| McpError::validation(format!("invalid tool name '{qualified}'")))?;

        let (session, timeout) = {
            let records = self.inner.records.read().await;
            let record = records
                .get(&server)
                .ok_or_else(|| McpError::NotFound(server.to_string()))?;
            let session = match (&record.session, record.is_connected()) {
                (Some(session), true) => Arc::clone(session),
                _ => return Err(McpError::NotReady(server.to_string())),
            };
            if !record.tools.iter().any(|t| t.name == tool) {
                return Err(McpError::ToolNotFound {
                    server: server.to_string(),
                    tool: tool.to_string(),
                });
            }
            (session, record.config.tool_timeout())
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, session.call_tool(tool, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: server.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        let elapsed = started.elapsed();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_tool(qualified, elapsed, outcome.is_ok());

        match outcome {
            Ok(result) => {
                let health = &self.inner.health;
                health
                    .record_success(&server, elapsed.as_secs_f64() * 1000.0)
                    .await;
                self.record_token_usage(&server, result.estimated_tokens())
                    .await;
                tracing::debug!(
                    server = %server,
                    tool,
                    elapsed_ms = elapsed.as_millis() as u64,
                    is_error = result.is_error,
                    "tool call finished"
                );
                Ok(result)
            }
            Err(e) => {
                self.inner.health.record_failure(&server, e.to_string()).await;
                Err(e)
            }
        }
    }
}
