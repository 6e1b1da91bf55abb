// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scripted connector for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::config::ServerConfig;
use super::error::McpError;
use super::session::{Connector, McpSession};
use super::types::{
    McpToolResult, PromptSpec, ResourceSpec, ServerCapabilities, ServerInfo, ToolSpec,
};

/// What the next `connect` call does.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Ok,
    Fail(&'static str),
    Hang,
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    script: Mutex<VecDeque<Outcome>>,
    connects: AtomicUsize,
    delay: Duration,
    sessions: Mutex<HashMap<String, Arc<FakeSession>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn scripted(outcomes: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..Default::default()
        })
    }

    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Most recent session opened for `server`.
    pub(crate) fn session(&self, server: &str) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock().unwrap()[server])
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Ok);
        match outcome {
            Outcome::Ok => {
                let session = Arc::new(FakeSession::new(config.name.as_str()));
                self.sessions
                    .lock()
                    .unwrap()
                    .insert(config.name.to_string(), Arc::clone(&session));
                Ok(session)
            }
            Outcome::Fail(message) => Err(McpError::connection(config.name.as_str(), message)),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

pub(crate) struct FakeSession {
    server: String,
    pub(crate) healthy: AtomicBool,
    pub(crate) closed: AtomicBool,
    pub(crate) close_fails: AtomicBool,
    pub(crate) resources_fail: AtomicBool,
    pub(crate) calls: AtomicUsize,
    pub(crate) call_delay_secs: AtomicU64,
}

impl FakeSession {
    fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            healthy: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            close_fails: AtomicBool::new(false),
            resources_fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            call_delay_secs: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpSession for FakeSession {
    fn server_info(&self) -> Option<ServerInfo> {
        Some(ServerInfo {
            name: format!("{}-server", self.server),
            capabilities: ServerCapabilities {
                tools: true,
                resources: true,
                prompts: true,
                logging: false,
            },
            ..Default::default()
        })
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(McpError::connection(&self.server, "broken pipe"));
        }
        Ok(vec![
            ToolSpec::new("echo").with_description("Echo the arguments"),
            ToolSpec::new("read"),
        ])
    }

    async fn list_prompts(&self) -> Result<Vec<PromptSpec>, McpError> {
        if self.server.starts_with("noprompt") {
            return Err(McpError::Protocol("method not found".into()));
        }
        Ok(vec![PromptSpec::new("review")])
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSpec>, McpError> {
        if self.resources_fail.load(Ordering::SeqCst) {
            return Err(McpError::Protocol("resources unsupported".into()));
        }
        Ok(vec![ResourceSpec::new(
            format!("file:///{}/README.md", self.server),
            "README.md",
        )])
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.call_delay_secs.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        match name {
            "echo" => Ok(McpToolResult::text(arguments.to_string())),
            "read" => Ok(McpToolResult::text("contents")),
            other => Err(McpError::tool_failed(other, "unknown tool")),
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.close_fails.load(Ordering::SeqCst) {
            return Err(McpError::connection(&self.server, "close failed"));
        }
        Ok(())
    }
}
