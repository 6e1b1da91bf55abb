// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rolling health statistics for connected servers.
//!
//! The monitor only keeps numbers; probing and the state transition on a
//! failed probe live in the manager, which owns the connections.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::name::ServerName;

/// Maximum number of latency samples kept per server.
pub const LATENCY_WINDOW: usize = 100;

/// Fixed-capacity buffer of the most recent latency samples, in milliseconds.
#[derive(Debug, Clone, Default)]
pub struct LatencyRing {
    samples: VecDeque<f64>,
}

impl LatencyRing {
    pub fn push(&mut self, latency_ms: f64) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Arithmetic mean, or 0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Nearest-rank percentile (`p` in 0..=100), or 0 when empty.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }
}

/// Rolling health record for one server.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connected_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub latencies: LatencyRing,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl ServerStats {
    /// Percentage of successful calls; 100 when nothing was recorded yet.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            100.0
        } else {
            self.success_count as f64 / total as f64 * 100.0
        }
    }

    pub fn avg_latency(&self) -> f64 {
        self.latencies.average()
    }

    pub fn p95_latency(&self) -> f64 {
        self.latencies.percentile(95.0)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at
            .and_then(|at| (Utc::now() - at).to_std().ok())
    }

    pub fn report(&self, name: &ServerName) -> HealthReport {
        HealthReport {
            name: name.clone(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate(),
            avg_latency_ms: self.avg_latency(),
            p95_latency_ms: self.p95_latency(),
            samples: self.latencies.len(),
            uptime_secs: self.uptime().map(|d| d.as_secs()),
            last_error: self.last_error.clone(),
            last_error_at: self.last_error_at,
        }
    }
}

/// Derived health metrics for display.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub name: ServerName,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Health statistics for all tracked servers.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    stats: RwLock<HashMap<ServerName, ServerStats>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) tracking uptime for a freshly connected server.
    pub async fn mark_connected(&self, name: &ServerName, at: DateTime<Utc>) {
        let mut stats = self.stats.write().await;
        stats.entry(name.clone()).or_default().connected_at = Some(at);
    }

    /// Stop counting uptime without discarding counters.
    pub async fn mark_disconnected(&self, name: &ServerName) {
        if let Some(s) = self.stats.write().await.get_mut(name) {
            s.connected_at = None;
        }
    }

    pub async fn record_success(&self, name: &ServerName, latency_ms: f64) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(name.clone()).or_default();
        entry.success_count += 1;
        entry.latencies.push(latency_ms);
    }

    pub async fn record_failure(&self, name: &ServerName, message: impl Into<String>) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(name.clone()).or_default();
        entry.failure_count += 1;
        entry.last_error = Some(message.into());
        entry.last_error_at = Some(Utc::now());
    }

    /// Clear counters and samples. Uptime tracking is kept.
    pub async fn reset_stats(&self, name: &ServerName) {
        if let Some(s) = self.stats.write().await.get_mut(name) {
            *s = ServerStats {
                connected_at: s.connected_at,
                ..Default::default()
            };
        }
    }

    /// Drop all statistics for a server.
    pub async fn remove(&self, name: &ServerName) {
        self.stats.write().await.remove(name);
    }

    pub async fn clear(&self) {
        self.stats.write().await.clear();
    }

    /// Snapshot of a server's statistics.
    pub async fn stats(&self, name: &ServerName) -> Option<ServerStats> {
        self.stats.read().await.get(name).cloned()
    }

    pub async fn report(&self, name: &ServerName) -> Option<HealthReport> {
        self.stats.read().await.get(name).map(|s| s.report(name))
    }

    /// Reports for every tracked server, sorted by name.
    pub async fn reports(&self) -> Vec<HealthReport> {
        let stats = self.stats.read().await;
        let mut reports: Vec<_> = stats.iter().map(|(n, s)| s.report(n)).collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }
}
