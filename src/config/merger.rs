// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    /// Turn automatic reconnection off.
    pub no_reconnect: bool,
    /// Turn periodic health checks off.
    pub no_health_checks: bool,
    pub health_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub log_level: Option<String>,
    /// Keep only these servers. Empty keeps all.
    pub only_servers: Vec<String>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.tether.local.json)
/// 3. Workspace config (.tether.json)
/// 4. Global config (~/.tether/config.json)
/// 5. Default values
///
/// Server maps merge per name: a later layer replaces an earlier layer's
/// entry for the same server and leaves the others alone.
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, &config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref servers) = config.mcp_servers {
        for (name, server) in servers {
            result.mcp_servers.insert(name.clone(), server.clone());
        }
    }

    if let Some(ref reconnection) = config.reconnection {
        reconnection.apply(&mut result.manager.reconnection);
    }

    if let Some(ref health) = config.health_check {
        health.apply(&mut result.manager.health_check);
    }

    if let Some(ref limits) = config.token_limits {
        limits.apply(&mut result.manager.token_limits);
    }

    if config.log_level.is_some() {
        result.log_level = config.log_level.clone();
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if cli.no_reconnect {
        result.manager.reconnection.enabled = false;
    }

    if let Some(retries) = cli.max_retries {
        result.manager.reconnection.max_retries = retries;
    }

    if cli.no_health_checks {
        result.manager.health_check.enabled = false;
    }

    if let Some(interval) = cli.health_interval_ms {
        result.manager.health_check.interval_ms = interval;
    }

    if cli.log_level.is_some() {
        result.log_level = cli.log_level.clone();
    }

    if !cli.only_servers.is_empty() {
        result
            .mcp_servers
            .retain(|name, _| cli.only_servers.iter().any(|keep| keep == name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{HealthCheckConfigPartial, ReconnectionConfigPartial};
    use crate::mcp::{RawServerConfig, TransportSpec};

    fn server(command: &str) -> RawServerConfig {
        RawServerConfig {
            transport: Some(TransportSpec::stdio(command)),
            enabled: true,
            ..Default::default()
        }
    }

    fn with_servers(entries: &[(&str, &str)]) -> WorkspaceConfig {
        WorkspaceConfig {
            mcp_servers: Some(
                entries
                    .iter()
                    .map(|(name, cmd)| (name.to_string(), server(cmd)))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert!(config.mcp_servers.is_empty());
        assert!(config.manager.reconnection.enabled);
        assert!(config.manager.health_check.enabled);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_servers_merge_per_name() {
        let global = with_servers(&[("fs", "global-fs"), ("git", "global-git")]);
        let workspace = with_servers(&[("fs", "workspace-fs")]);

        let result = merge_config(Some(global), Some(workspace), None, CliOptions::default());

        assert_eq!(result.mcp_servers.len(), 2);
        assert_eq!(
            result.mcp_servers["fs"].transport,
            Some(TransportSpec::stdio("workspace-fs"))
        );
        assert_eq!(
            result.mcp_servers["git"].transport,
            Some(TransportSpec::stdio("global-git"))
        );
    }

    #[test]
    fn test_partials_layer() {
        let global = WorkspaceConfig {
            reconnection: Some(ReconnectionConfigPartial {
                max_retries: Some(10),
                initial_delay_ms: Some(250),
                ..Default::default()
            }),
            ..Default::default()
        };
        let local = WorkspaceConfig {
            reconnection: Some(ReconnectionConfigPartial {
                max_retries: Some(2),
                ..Default::default()
            }),
            health_check: Some(HealthCheckConfigPartial {
                interval_ms: Some(5_000),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = merge_config(Some(global), None, Some(local), CliOptions::default());

        assert_eq!(result.manager.reconnection.max_retries, 2);
        assert_eq!(result.manager.reconnection.initial_delay_ms, 250);
        assert_eq!(result.manager.health_check.interval_ms, 5_000);
    }

    #[test]
    fn test_cli_overrides() {
        let workspace = WorkspaceConfig {
            log_level: Some("warn".to_string()),
            ..with_servers(&[("fs", "fs"), ("git", "git")])
        };
        let cli = CliOptions {
            no_reconnect: true,
            no_health_checks: true,
            log_level: Some("debug".to_string()),
            only_servers: vec!["git".to_string()],
            ..Default::default()
        };

        let result = merge_config(None, Some(workspace), None, cli);

        assert!(!result.manager.reconnection.enabled);
        assert!(!result.manager.health_check.enabled);
        assert_eq!(result.log_level.as_deref(), Some("debug"));
        assert_eq!(result.mcp_servers.len(), 1);
        assert!(result.mcp_servers.contains_key("git"));
    }
}
