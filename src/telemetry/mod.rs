// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics.
//!
//! - **Tracing**: structured logs with `server` fields on every MCP span
//! - **Metrics**: connect, probe and tool-call latency plus reconnect counts,
//!   collected when the `telemetry` feature is on
//!
//! ```rust,ignore
//! use tether::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::from_flags(verbose, debug))?;
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, LogFormat, TelemetryConfig};
pub use metrics::{
    Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics, GLOBAL_METRICS,
};
