// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup for structured logging.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Line layout for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One line per event.
    Compact,
    /// Multi-line with span timings and source locations.
    Detailed,
}

/// How log output is filtered and formatted.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when neither `directive` nor `RUST_LOG` is set.
    pub level: Level,

    /// Explicit filter such as `tether::mcp=debug`. Overrides `RUST_LOG`.
    pub directive: Option<String>,

    pub format: LogFormat,
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            directive: None,
            format: LogFormat::Compact,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Preset for the CLI's `--verbose` and `--debug` flags.
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        match (verbose, debug) {
            (_, true) => Self {
                level: Level::DEBUG,
                directive: Some("tether=debug,rmcp=info".to_string()),
                format: LogFormat::Detailed,
                ..Self::default()
            },
            (true, false) => Self::default().with_level(Level::INFO),
            (false, false) => Self::default(),
        }
    }

    /// Trace everything from this crate without colors.
    pub fn testing() -> Self {
        Self {
            level: Level::TRACE,
            directive: Some("tether=trace".to_string()),
            format: LogFormat::Detailed,
            ansi: false,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    /// Apply a configured default level such as `info` or `tether=debug`.
    ///
    /// Ignored when a directive is already set or `RUST_LOG` is present. A bare
    /// level name sets `level`; anything else is used as a filter directive.
    pub fn with_config_level(self, configured: Option<&str>) -> Self {
        if self.directive.is_some() || std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return self;
        }
        match configured.map(str::trim).filter(|s| !s.is_empty()) {
            None => self,
            Some(raw) => match raw.parse::<Level>() {
                Ok(level) => self.with_level(level),
                Err(_) => self.with_directive(raw),
            },
        }
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let explicit = match &self.directive {
            Some(directive) => EnvFilter::try_new(directive).ok(),
            None => EnvFilter::try_from_default_env().ok(),
        };
        explicit.unwrap_or_else(|| EnvFilter::new(self.level.to_string()))
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<()> {
    let detailed = config.format == LogFormat::Detailed;
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi)
        .with_file(detailed)
        .with_line_number(detailed)
        .with_span_events(if detailed { FmtSpan::CLOSE } else { FmtSpan::NONE });

    let registry = tracing_subscriber::registry().with(config.env_filter());
    let installed = match config.format {
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Detailed => registry.with(layer).try_init(),
    };

    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}
