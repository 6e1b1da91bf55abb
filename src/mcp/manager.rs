// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection manager: per-server state machine, reconnection and health.
//!
//! Every mutation of a server's record happens while holding that server's
//! [`KeyedLock`] guard, so `add`, `remove`, health probes and reconnect
//! attempts for one name are strictly ordered. The record map itself is only
//! locked for short, non-suspending sections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::config::{validate_transport_config, ManagerConfig, ServerConfig};
use super::error::McpError;
use super::events::{EventBus, McpEvent};
use super::health::{HealthMonitor, HealthReport};
use super::lock::KeyedLock;
use super::name::ServerName;
use super::reconnect::{backoff_delay, ReconnectScheduler};
use super::session::{Connector, McpSession};
use super::transport::RmcpConnector;
use super::types::{
    ConnectionState, ConnectionStatus, PromptSpec, ServerInfo, ServerSummary, ToolSpec,
};
use super::usage::TokenTracker;

/// Everything the manager knows about one server.
pub(super) struct ServerRecord {
    pub(super) config: ServerConfig,
    pub(super) state: ConnectionState,
    pub(super) session: Option<Arc<dyn McpSession>>,
    pub(super) tools: Vec<ToolSpec>,
    pub(super) prompts: Vec<PromptSpec>,
    pub(super) server_info: Option<ServerInfo>,
}

impl ServerRecord {
    fn connecting(config: ServerConfig) -> Self {
        Self {
            config,
            state: ConnectionState::connecting(),
            session: None,
            tools: Vec::new(),
            prompts: Vec::new(),
            server_info: None,
        }
    }

    pub(super) fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

/// Result of a successful connect and discovery.
struct Connection {
    session: Arc<dyn McpSession>,
    tools: Vec<ToolSpec>,
    prompts: Vec<PromptSpec>,
    info: Option<ServerInfo>,
}

/// Why a connected server is being demoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Connect,
    Unhealthy,
}

pub(super) struct ManagerInner {
    pub(super) config: ManagerConfig,
    connector: Arc<dyn Connector>,
    pub(super) records: RwLock<HashMap<ServerName, ServerRecord>>,
    locks: KeyedLock,
    scheduler: ReconnectScheduler,
    pub(super) health: HealthMonitor,
    pub(super) tokens: TokenTracker,
    pub(super) events: EventBus,
    health_loop: Mutex<Option<CancellationToken>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(token) = self
            .health_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

/// Supervises connections to a set of MCP servers.
///
/// Cloning is cheap and yields a handle to the same manager. Dropping the
/// last handle cancels pending reconnection timers and the health loop.
#[derive(Clone)]
pub struct McpManager {
    pub(super) inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl McpManager {
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let tokens = TokenTracker::new(config.token_limits.clone());
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                records: RwLock::new(HashMap::new()),
                locks: KeyedLock::new(),
                scheduler: ReconnectScheduler::new(),
                health: HealthMonitor::new(),
                tokens,
                events: EventBus::default(),
                health_loop: Mutex::new(None),
            }),
        }
    }

    /// Manager that opens real connections through `rmcp`.
    pub fn with_defaults(config: ManagerConfig) -> Self {
        Self::new(config, Arc::new(RmcpConnector::new()))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Connect to a server and discover its tools and prompts.
    ///
    /// A concurrent or repeated call for a name that already has a record
    /// does not open a second transport. It waits for the in-flight attempt
    /// and reports what it observed. On failure the error is returned
    /// immediately while retries continue in the background.
    #[instrument(skip(self, config), fields(server = %config.name))]
    pub async fn add_server(&self, config: ServerConfig) -> Result<(), McpError> {
        let validation = validate_transport_config(Some(&config.transport));
        if !validation.is_valid {
            return Err(McpError::Validation(validation.errors));
        }

        let inner = &self.inner;
        let name = config.name.clone();
        let _guard = inner.locks.lock(&name).await;

        if let Some(state) = inner.state(&name).await {
            tracing::debug!(status = %state.status, "server already tracked");
            return observe(&name, &state);
        }

        inner
            .records
            .write()
            .await
            .insert(name.clone(), ServerRecord::connecting(config.clone()));

        match inner.open(&config).await {
            Ok(connection) => {
                inner.install(&name, connection).await;
                tracing::info!("MCP server connected");
                inner.events.emit(McpEvent::ServerAdded { name });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "MCP server failed to connect");
                inner.handle_failure(&name, &e, Failure::Connect).await;
                Err(as_connection_error(&name, e))
            }
        }
    }

    /// Connect several servers concurrently. Disabled entries are skipped.
    pub async fn add_servers(
        &self,
        configs: impl IntoIterator<Item = ServerConfig>,
    ) -> Vec<(ServerName, Result<(), McpError>)> {
        let pending = configs.into_iter().filter_map(|config| {
            if !config.enabled {
                tracing::debug!(server = %config.name, "skipping disabled MCP server");
                return None;
            }
            let name = config.name.clone();
            Some(async move { (name, self.add_server(config).await) })
        });
        join_all(pending).await
    }

    /// Cancel retries, close the transport and forget the server.
    #[instrument(skip(self), fields(server = %name))]
    pub async fn remove_server(&self, name: &ServerName) -> Result<(), McpError> {
        match self.inner.remove(name).await {
            Err(McpError::NotFound(n)) => Err(McpError::NotFound(n)),
            Err(e) => {
                tracing::warn!(error = %e, "error closing MCP session");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Names of servers that are currently connected, sorted.
    pub async fn get_servers(&self) -> Vec<ServerName> {
        let records = self.inner.records.read().await;
        let mut names: Vec<ServerName> = records
            .iter()
            .filter(|(_, r)| r.is_connected())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of every tracked server regardless of status, sorted.
    pub async fn server_names(&self) -> Vec<ServerName> {
        let mut names: Vec<ServerName> = self.inner.records.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_connection_state(&self, name: &ServerName) -> Option<ConnectionState> {
        self.inner.state(name).await
    }

    /// One row per tracked server, sorted by name.
    pub async fn summaries(&self) -> Vec<ServerSummary> {
        let records = self.inner.records.read().await;
        let mut rows: Vec<ServerSummary> = records
            .iter()
            .map(|(name, r)| ServerSummary {
                name: name.clone(),
                transport: r.config.transport.kind().to_string(),
                state: r.state.clone(),
                tool_count: r.tools.len(),
                prompt_count: r.prompts.len(),
                server_info: r.server_info.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Reconnect now, resetting the retry counter.
    ///
    /// Works for connected servers too, in which case the old session is
    /// closed first.
    #[instrument(skip(self), fields(server = %name))]
    pub async fn reconnect(&self, name: &ServerName) -> Result<(), McpError> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(name).await;
        inner.scheduler.cancel(name);

        let (config, old_session) = {
            let mut records = inner.records.write().await;
            let record = records
                .get_mut(name)
                .ok_or_else(|| McpError::NotFound(name.to_string()))?;
            record.state = ConnectionState::connecting();
            record.tools.clear();
            record.prompts.clear();
            (record.config.clone(), record.session.take())
        };
        if let Some(session) = old_session {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "error closing previous session");
            }
        }
        inner.health.mark_disconnected(name).await;

        match inner.open(&config).await {
            Ok(connection) => {
                inner.install(name, connection).await;
                tracing::info!("MCP server reconnected");
                inner.events.emit(McpEvent::ServerAdded { name: name.clone() });
                Ok(())
            }
            Err(e) => {
                inner.handle_failure(name, &e, Failure::Connect).await;
                Err(as_connection_error(name, e))
            }
        }
    }

    /// Probe one server.
    ///
    /// `Ok(false)` means the server is not connected or the probe failed; in
    /// the latter case it is demoted to `failed` and handed to reconnection.
    #[instrument(skip(self), fields(server = %name))]
    pub async fn health_check(&self, name: &ServerName) -> Result<bool, McpError> {
        self.inner.probe(name).await
    }

    /// Start the periodic health loop. Returns `false` if health checks are
    /// disabled or the loop is already running.
    pub fn start_health_checks(&self) -> bool {
        let settings = &self.inner.config.health_check;
        if !settings.enabled || settings.interval_ms == 0 {
            return false;
        }

        let token = {
            let mut slot = self
                .inner
                .health_loop
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return false;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let period = Duration::from_millis(settings.interval_ms);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(health_loop(weak, period, token));
        tracing::debug!(interval_ms = settings.interval_ms, "health checks started");
        true
    }

    pub fn stop_health_checks(&self) {
        let token = self
            .inner
            .health_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
            tracing::debug!("health checks stopped");
        }
    }

    pub fn health_checks_running(&self) -> bool {
        self.inner
            .health_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Clear health counters and token usage. Connection status is untouched.
    pub async fn reset_stats(&self, name: &ServerName) {
        self.inner.health.reset_stats(name).await;
        self.inner.tokens.reset(name).await;
    }

    pub async fn health_report(&self, name: &ServerName) -> Option<HealthReport> {
        self.inner.health.report(name).await
    }

    pub async fn health_reports(&self) -> Vec<HealthReport> {
        self.inner.health.reports().await
    }

    /// Add to a server's token total and publish any threshold events.
    pub async fn record_token_usage(&self, name: &ServerName, tokens: u64) {
        for event in self.inner.tokens.record(name, tokens).await {
            self.inner.events.emit(event);
        }
    }

    pub async fn token_usage(&self, name: &ServerName) -> u64 {
        self.inner.tokens.usage(name).await
    }

    /// Whether a reconnection timer is armed for `name`.
    pub fn reconnect_pending(&self, name: &ServerName) -> bool {
        self.inner.scheduler.is_pending(name)
    }

    /// Stop health checks, cancel timers and remove every server.
    ///
    /// Close failures are collected into [`McpError::Aggregate`]. Calling it
    /// again once everything is gone returns `Ok(())`.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), McpError> {
        self.stop_health_checks();
        let cancelled = self.inner.scheduler.cancel_all();

        let names: Vec<ServerName> = self.inner.records.read().await.keys().cloned().collect();
        tracing::debug!(servers = names.len(), cancelled, "shutting down MCP manager");

        let results = join_all(names.iter().map(|name| self.inner.remove(name))).await;
        let errors: Vec<McpError> = results
            .into_iter()
            .filter_map(Result::err)
            .filter(|e| !matches!(e, McpError::NotFound(_)))
            .collect();

        self.inner.tokens.clear().await;
        self.inner.health.clear().await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpError::Aggregate(errors))
        }
    }

    /// Alias for [`McpManager::shutdown`].
    pub async fn dispose(&self) -> Result<(), McpError> {
        self.shutdown().await
    }
}

fn observe(name: &ServerName, state: &ConnectionState) -> Result<(), McpError> {
    match state.status {
        ConnectionStatus::Connected | ConnectionStatus::Connecting => Ok(()),
        ConnectionStatus::Failed => Err(McpError::connection(
            name.as_str(),
            state
                .last_error
                .clone()
                .unwrap_or_else(|| "connection failed".to_string()),
        )),
    }
}

fn as_connection_error(name: &ServerName, e: McpError) -> McpError {
    match e {
        McpError::Connection { .. } | McpError::Timeout { .. } => e,
        other => McpError::connection(name.as_str(), other.to_string()),
    }
}

async fn health_loop(inner: Weak<ManagerInner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.probe_all().await;
    }
    tracing::trace!("health loop exited");
}

impl ManagerInner {
    pub(super) async fn state(&self, name: &ServerName) -> Option<ConnectionState> {
        self.records.read().await.get(name).map(|r| r.state.clone())
    }

    /// Open the transport and run discovery within the startup timeout.
    async fn open(&self, config: &ServerConfig) -> Result<Connection, McpError> {
        let started = Instant::now();
        let timeout = config.startup_timeout();

        let result = match tokio::time::timeout(timeout, self.connect_and_discover(config)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: config.name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.connect", started.elapsed());
        tracing::debug!(
            server = %config.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "connect finished"
        );
        result
    }

    async fn connect_and_discover(&self, config: &ServerConfig) -> Result<Connection, McpError> {
        let session = self.connector.connect(config).await?;
        let info = session.server_info();

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = session.close().await;
                return Err(e);
            }
        };
        let tools: Vec<ToolSpec> = tools
            .into_iter()
            .filter(|t| config.is_tool_enabled(&t.name))
            .collect();

        let advertises_prompts = info.as_ref().map_or(true, |i| i.capabilities.prompts);
        let prompts = if advertises_prompts {
            session.list_prompts().await.unwrap_or_else(|e| {
                tracing::debug!(server = %config.name, error = %e, "prompts unavailable");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        tracing::debug!(
            server = %config.name,
            tools = tools.len(),
            prompts = prompts.len(),
            "discovery complete"
        );
        Ok(Connection {
            session,
            tools,
            prompts,
            info,
        })
    }

    /// Mark a server connected with a fresh catalog. Caller holds the lock.
    async fn install(&self, name: &ServerName, connection: Connection) {
        let now = Utc::now();
        {
            let mut records = self.records.write().await;
            if let Some(record) = records.get_mut(name) {
                record.state = ConnectionState {
                    status: ConnectionStatus::Connected,
                    connected_at: Some(now),
                    last_error: None,
                    attempt: 0,
                };
                record.session = Some(connection.session);
                record.tools = connection.tools;
                record.prompts = connection.prompts;
                record.server_info = connection.info;
            }
        }
        self.health.mark_connected(name, now).await;
        self.scheduler.cancel(name);
    }

    /// Demote a server to `failed` and arm a retry if allowed. Caller holds
    /// the lock.
    async fn handle_failure(self: &Arc<Self>, name: &ServerName, error: &McpError, why: Failure) {
        let session = {
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(name) else {
                return;
            };
            record.state.status = ConnectionStatus::Failed;
            record.state.connected_at = None;
            record.state.last_error = Some(error.to_string());
            record.tools.clear();
            record.prompts.clear();
            record.session.take()
        };
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                tracing::debug!(server = %name, error = %e, "error closing failed session");
            }
        }
        self.health.mark_disconnected(name).await;

        self.events.emit(match why {
            Failure::Connect => McpEvent::ServerError {
                name: name.clone(),
                error: error.to_string(),
            },
            Failure::Unhealthy => McpEvent::ServerUnhealthy { name: name.clone() },
        });

        if error.is_retryable() && self.config.reconnection.enabled {
            self.schedule_retry(name).await;
        }
    }

    async fn schedule_retry(self: &Arc<Self>, name: &ServerName) {
        let settings = &self.config.reconnection;
        let attempt = {
            let mut records = self.records.write().await;
            let Some(record) = records.get_mut(name) else {
                return;
            };
            let next = record.state.attempt + 1;
            if next > settings.max_retries {
                None
            } else {
                record.state.attempt = next;
                Some(next)
            }
        };

        let Some(attempt) = attempt else {
            let attempts = settings.max_retries;
            tracing::warn!(server = %name, attempts, "giving up on MCP server");
            self.events.emit(McpEvent::ReconnectionFailed {
                name: name.clone(),
                attempts,
            });
            return;
        };

        let delay = backoff_delay(settings, attempt);
        let weak = Arc::downgrade(self);
        let target = name.clone();
        self.scheduler.schedule(name, attempt, delay, move |token| async move {
            if let Some(inner) = weak.upgrade() {
                inner.retry(target, token).await;
            }
        });

        tracing::info!(server = %name, attempt, delay_ms = delay.as_millis() as u64, "reconnection scheduled");
        self.events.emit(McpEvent::ReconnectionScheduled {
            name: name.clone(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
    }

    /// Body of a fired reconnection timer.
    fn retry(self: Arc<Self>, name: ServerName, token: CancellationToken) -> BoxFuture<'static, ()> {
        async move {
            let _guard = self.locks.lock(&name).await;
            if token.is_cancelled() {
                return;
            }

            let (config, attempts) = {
                let mut records = self.records.write().await;
                match records.get_mut(&name) {
                    Some(record) if record.state.status == ConnectionStatus::Failed => {
                        record.state.status = ConnectionStatus::Connecting;
                        (record.config.clone(), record.state.attempt)
                    }
                    _ => {
                        tracing::trace!(server = %name, "discarding stale reconnection attempt");
                        return;
                    }
                }
            };

            tracing::debug!(server = %name, attempt = attempts, "reconnecting");
            let outcome = self.open(&config).await;
            #[cfg(feature = "telemetry")]
            GLOBAL_METRICS.record_reconnect(outcome.is_ok());
            match outcome {
                Ok(connection) => {
                    self.install(&name, connection).await;
                    tracing::info!(server = %name, attempts, "MCP server reconnected");
                    self.events
                        .emit(McpEvent::ReconnectionSucceeded { name, attempts });
                }
                Err(e) => {
                    tracing::warn!(server = %name, attempt = attempts, error = %e, "reconnection failed");
                    self.handle_failure(&name, &e, Failure::Connect).await;
                }
            }
        }
        .boxed()
    }

    async fn probe(self: &Arc<Self>, name: &ServerName) -> Result<bool, McpError> {
        let _guard = self.locks.lock(name).await;
        let session = {
            let records = self.records.read().await;
            let record = records
                .get(name)
                .ok_or_else(|| McpError::NotFound(name.to_string()))?;
            match (&record.session, record.is_connected()) {
                (Some(session), true) => Arc::clone(session),
                _ => return Ok(false),
            }
        };

        let timeout = Duration::from_millis(self.config.health_check.probe_timeout_ms);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, session.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(as_connection_error(name, e)),
            Err(_) => Err(McpError::Timeout {
                server: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        let elapsed = started.elapsed();

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.health_probe", elapsed);

        match outcome {
            Ok(()) => {
                self.health
                    .record_success(name, elapsed.as_secs_f64() * 1000.0)
                    .await;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "health probe failed");
                self.health.record_failure(name, e.to_string()).await;
                self.handle_failure(name, &e, Failure::Unhealthy).await;
                Ok(false)
            }
        }
    }

    async fn probe_all(self: &Arc<Self>) {
        let names: Vec<ServerName> = {
            let records = self.records.read().await;
            records
                .iter()
                .filter(|(_, r)| r.is_connected())
                .map(|(n, _)| n.clone())
                .collect()
        };
        let results = join_all(names.iter().map(|name| self.probe(name))).await;
        let healthy = results.iter().filter(|r| matches!(r, Ok(true))).count();
        tracing::debug!(probed = names.len(), healthy, "health sweep complete");
    }

    /// Remove a server. Close errors are returned after the removal is done.
    async fn remove(&self, name: &ServerName) -> Result<(), McpError> {
        let _guard = self.locks.lock(name).await;
        let record = self
            .records
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::NotFound(name.to_string()))?;
        self.scheduler.cancel(name);

        let closed = match record.session {
            Some(session) => session.close().await,
            None => Ok(()),
        };
        self.health.remove(name).await;
        self.tokens.reset(name).await;

        tracing::info!(server = %name, "MCP server removed");
        self.events.emit(McpEvent::ServerRemoved { name: name.clone() });
        closed
    }
}
