// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide metrics for MCP traffic.
//!
//! Tool calls are keyed by qualified name (`mcp__server__tool`), timed
//! operations by a dotted label such as `mcp.connect`. Everything lives in
//! memory and is reported by `tether mcp health`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

#[derive(Debug)]
pub struct Metrics {
    tools: RwLock<HashMap<String, ToolMetrics>>,
    operations: RwLock<HashMap<String, OperationMetrics>>,
    reconnects: ReconnectCounters,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            reconnects: ReconnectCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record one tool call routed through the manager.
    pub fn record_tool(&self, qualified: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tools
            .entry(qualified.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record a timed operation such as a connect or a health probe.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string()).or_default().record(duration);
    }

    pub fn record_reconnect(&self, success: bool) {
        let counter = if success {
            &self.reconnects.succeeded
        } else {
            &self.reconnects.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_metrics(&self, qualified: &str) -> Option<ToolMetrics> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(qualified)
            .cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// `(succeeded, failed)` reconnection attempts.
    pub fn reconnect_counts(&self) -> (u64, u64) {
        (
            self.reconnects.succeeded.load(Ordering::Relaxed),
            self.reconnects.failed.load(Ordering::Relaxed),
        )
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (reconnects_succeeded, reconnects_failed) = self.reconnect_counts();
        MetricsSnapshot {
            tools: self
                .tools
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            reconnects_succeeded,
            reconnects_failed,
            uptime: self.uptime(),
        }
    }

    pub fn reset(&self) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.reconnects.succeeded.store(0, Ordering::Relaxed);
        self.reconnects.failed.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct ReconnectCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Call counts and latency for one MCP tool.
#[derive(Debug, Clone, Default)]
pub struct ToolMetrics {
    pub calls: u64,
    pub failures: u64,
    pub latency: OperationMetrics,
}

impl ToolMetrics {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.calls += 1;
        if !success {
            self.failures += 1;
        }
        self.latency.record(duration);
    }

    /// Fraction of successful calls, 1.0 when nothing was called.
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            1.0
        } else {
            (self.calls - self.failures) as f64 / self.calls as f64
        }
    }
}

/// Count, extremes and latency histogram for an operation.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            Err(_) => Duration::from_secs_f64(self.total_duration.as_secs_f64() / self.count as f64),
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram. Bucket bounds are in milliseconds.
#[derive(Debug, Clone)]
pub struct Histogram {
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| ms <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Upper bound of the bucket holding the `p`th percentile.
    ///
    /// The overflow bucket reports ten times the last bound.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = ((total as f64 * p / 100.0).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let ms = self
                    .bounds_ms
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.bounds_ms.last().copied().unwrap_or(0) * 10);
                return Duration::from_millis(ms);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p95(&self) -> Duration {
        self.percentile(95.0)
    }
}

impl Default for Histogram {
    /// 10ms, 50ms, 100ms, 500ms, 1s, 5s, 30s: the range between a local
    /// stdio round trip and a slow remote tool.
    fn default() -> Self {
        Self::with_bounds(vec![10, 50, 100, 500, 1_000, 5_000, 30_000])
    }
}

/// Metrics captured at one point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: HashMap<String, ToolMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub reconnects_succeeded: u64,
    pub reconnects_failed: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
            && self.operations.is_empty()
            && self.reconnects_succeeded == 0
            && self.reconnects_failed == 0
    }

    /// Human-readable report with entries sorted by name.
    pub fn format_report(&self) -> String {
        let mut report = format!("Uptime: {:.2?}\n", self.uptime);
        report.push_str(&format!(
            "Reconnects: {} succeeded, {} failed\n",
            self.reconnects_succeeded, self.reconnects_failed
        ));

        let mut operations: Vec<_> = self.operations.iter().collect();
        operations.sort_by(|a, b| a.0.cmp(b.0));
        if !operations.is_empty() {
            report.push_str("\nOperations:\n");
            for (name, m) in operations {
                report.push_str(&format!(
                    "  {name}: {} ops, avg {:.2?}, p95 {:.2?}\n",
                    m.count,
                    m.avg_duration(),
                    m.histogram.p95()
                ));
            }
        }

        let mut tools: Vec<_> = self.tools.iter().collect();
        tools.sort_by(|a, b| a.0.cmp(b.0));
        if !tools.is_empty() {
            report.push_str("\nTools:\n");
            for (name, m) in tools {
                report.push_str(&format!(
                    "  {name}: {} calls, {:.1}% ok, avg {:.2?}\n",
                    m.calls,
                    m.success_rate() * 100.0,
                    m.latency.avg_duration()
                ));
            }
        }

        report
    }
}
