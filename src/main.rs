// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tether main entry point - inspect and drive configured MCP servers.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use tether::config::{self, CliOptions, ResolvedConfig};
use tether::error::ConfigError;
use tether::mcp::{ConnectionStatus, HealthReport, McpEvent, McpManager};
use tether::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
use tether::VERSION;

/// Tether - keep your MCP servers connected.
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Self-healing MCP connection manager", long_about = None)]
struct Cli {
    /// Workspace directory (defaults to the nearest directory with a config file)
    #[arg(short = 'C', long, env = "TETHER_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Only connect these servers (repeatable)
    #[arg(short, long = "server")]
    servers: Vec<String>,

    /// Disable automatic reconnection
    #[arg(long)]
    no_reconnect: bool,

    /// Disable periodic health checks
    #[arg(long)]
    no_health_checks: bool,

    /// Health check interval in milliseconds
    #[arg(long)]
    health_interval_ms: Option<u64>,

    /// Show info-level logs
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Show debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with MCP servers
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration
    Show,
    /// Check server entries and report invalid ones
    Validate,
}

#[derive(Subcommand)]
enum McpAction {
    /// Connect every server and show its status
    Servers {
        #[arg(long)]
        json: bool,
    },
    /// List tools from all connected servers
    Tools {
        #[arg(long)]
        json: bool,
    },
    /// List prompts from all connected servers
    Prompts {
        #[arg(long)]
        json: bool,
    },
    /// List resources from all connected servers
    Resources {
        #[arg(long)]
        json: bool,
    },
    /// Probe every server and show health statistics
    Health {
        /// Keep running health checks and stream events until Ctrl-C
        #[arg(short, long)]
        watch: bool,
        #[arg(long)]
        json: bool,
    },
    /// Call a tool by qualified name (mcp__server__tool)
    Call {
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let workspace_root = match &cli.workspace {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            config::find_workspace_root(&cwd).unwrap_or(cwd)
        }
    };

    let cli_options = CliOptions {
        no_reconnect: cli.no_reconnect,
        no_health_checks: cli.no_health_checks,
        health_interval_ms: cli.health_interval_ms,
        only_servers: cli.servers,
        ..Default::default()
    };

    // Config is loaded before logging starts so its log_level can apply.
    let loaded = match cli.command {
        Commands::Mcp { .. } | Commands::Config { .. } => {
            Some(config::load_config(&workspace_root, cli_options))
        }
        Commands::Init | Commands::Version => None,
    };
    let configured_level = match &loaded {
        Some(Ok(resolved)) => resolved.log_level.as_deref(),
        _ => None,
    };
    let telemetry = TelemetryConfig::from_flags(cli.verbose, cli.debug);
    let telemetry = if cli.verbose || cli.debug {
        telemetry
    } else {
        telemetry.with_config_level(configured_level)
    };
    init_telemetry(&telemetry)?;

    match cli.command {
        Commands::Mcp { action } => {
            let resolved = require_config(loaded)?;
            handle_mcp_command(&resolved, action).await
        }
        Commands::Config { action } => {
            let resolved = require_config(loaded)?;
            match action {
                Some(ConfigAction::Show) | None => {
                    println!("{}", serde_json::to_string_pretty(&resolved)?);
                }
                Some(ConfigAction::Validate) => {
                    let (valid, invalid) = resolved.servers();
                    for server in &valid {
                        println!("{} {} ({})", "✓".green(), server.name, server.transport.kind());
                    }
                    for (name, error) in &invalid {
                        println!("{} {}: {}", "✗".red(), name, error);
                    }
                    if !invalid.is_empty() {
                        anyhow::bail!("{} invalid server entries", invalid.len());
                    }
                }
            }
            Ok(())
        }
        Commands::Init => {
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
            Ok(())
        }
        Commands::Version => {
            println!("tether {}", VERSION);
            Ok(())
        }
    }
}

fn require_config(
    loaded: Option<Result<ResolvedConfig, ConfigError>>,
) -> anyhow::Result<ResolvedConfig> {
    loaded
        .context("configuration was not loaded")?
        .map_err(anyhow::Error::from)
}

/// Connect every configured server, run the action, then shut down.
async fn handle_mcp_command(resolved: &ResolvedConfig, action: McpAction) -> anyhow::Result<()> {
    let manager = McpManager::with_defaults(resolved.manager.clone());

    let (servers, invalid) = resolved.servers();
    for (name, error) in &invalid {
        eprintln!("{} skipping '{}': {}", "warning:".yellow(), name, error);
    }
    if servers.is_empty() {
        println!("{}", "No MCP servers configured. Run 'tether init' to create a config.".cyan());
        return Ok(());
    }

    for (name, result) in manager.add_servers(servers).await {
        if let Err(e) = result {
            eprintln!("{} {}: {}", "✗".red(), name, e);
        }
    }

    let outcome = run_mcp_action(&manager, action).await;
    manager
        .shutdown()
        .await
        .context("shutting down MCP connections")?;
    outcome
}

async fn run_mcp_action(manager: &McpManager, action: McpAction) -> anyhow::Result<()> {
    match action {
        McpAction::Servers { json } => {
            let summaries = manager.summaries().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
                return Ok(());
            }
            for summary in summaries {
                let status = match summary.state.status {
                    ConnectionStatus::Connected => "connected".green(),
                    ConnectionStatus::Connecting => "connecting".yellow(),
                    ConnectionStatus::Failed => "failed".red(),
                };
                println!(
                    "{} [{}] {} - {} tools, {} prompts",
                    summary.name.to_string().bright_white().bold(),
                    summary.transport,
                    status,
                    summary.tool_count,
                    summary.prompt_count
                );
                if let Some(info) = &summary.server_info {
                    println!("    {} {}", info.name.dimmed(), info.version.dimmed());
                }
                if let Some(error) = &summary.state.last_error {
                    println!("    {}", error.red());
                }
            }
        }
        McpAction::Tools { json } => {
            let tools = manager.get_tools().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&tools)?);
                return Ok(());
            }
            for tool in tools {
                println!(
                    "{} {}",
                    tool.qualified_name().bright_white(),
                    tool.item.description.as_deref().unwrap_or("").dimmed()
                );
            }
        }
        McpAction::Prompts { json } => {
            let prompts = manager.get_prompts().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&prompts)?);
                return Ok(());
            }
            for prompt in prompts {
                println!(
                    "{}/{} {}",
                    prompt.server.to_string().cyan(),
                    prompt.item.name.bright_white(),
                    prompt.item.description.as_deref().unwrap_or("").dimmed()
                );
            }
        }
        McpAction::Resources { json } => {
            let resources = manager.list_resources().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&resources)?);
                return Ok(());
            }
            for resource in resources {
                println!(
                    "{} {} {}",
                    resource.server.to_string().cyan(),
                    resource.item.uri.bright_white(),
                    resource.item.mime_type.as_deref().unwrap_or("").dimmed()
                );
            }
        }
        McpAction::Health { watch, json } => {
            if watch {
                watch_health(manager).await?;
            }
            for name in manager.server_names().await {
                match manager.health_check(&name).await {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(server = %name, "skipping probe, not connected"),
                    Err(e) => eprintln!("{} {}: {}", "✗".red(), name, e),
                }
            }
            let reports = manager.health_reports().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
                return Ok(());
            }
            for report in reports {
                println!(
                    "{} {}",
                    report.name.to_string().bright_white().bold(),
                    health_summary(&report)
                );
                if let Some(error) = &report.last_error {
                    println!("    last error: {}", error.red());
                }
            }
            let snapshot = GLOBAL_METRICS.snapshot();
            if !snapshot.is_empty() {
                println!("\n{}", snapshot.format_report().dimmed());
            }
        }
        McpAction::Call { tool, args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            let result = manager.call_tool(&tool, arguments).await?;
            if result.is_error {
                eprintln!("{}", result.as_text().red());
                anyhow::bail!("tool '{}' reported an error", tool);
            }
            println!("{}", result.as_text());
        }
    }
    Ok(())
}

/// `success_rate` is already a percentage.
fn health_summary(report: &HealthReport) -> String {
    format!(
        "{:.0}% ok ({} probes), avg {:.1}ms, p95 {:.1}ms",
        report.success_rate,
        report.success_count + report.failure_count,
        report.avg_latency_ms,
        report.p95_latency_ms
    )
}

/// Run periodic health checks and print lifecycle events until Ctrl-C.
async fn watch_health(manager: &McpManager) -> anyhow::Result<()> {
    let mut events = manager.subscribe();
    if !manager.start_health_checks() {
        println!("{}", "Health checks are disabled in configuration.".yellow());
        return Ok(());
    }
    println!("{}", "Watching MCP servers (Ctrl-C to stop)...".cyan());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = events.recv() => match received {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.stop_health_checks();
    Ok(())
}

fn print_event(event: &McpEvent) {
    let stamp = chrono::Local::now().format("%H:%M:%S");
    let line = match event {
        McpEvent::ServerAdded { name } => format!("{} connected", name).green(),
        McpEvent::ServerError { name, error } => format!("{} error: {}", name, error).red(),
        McpEvent::ServerRemoved { name } => format!("{} removed", name).normal(),
        McpEvent::ReconnectionScheduled {
            name,
            attempt,
            delay_ms,
        } => format!("{} reconnect #{} in {}ms", name, attempt, delay_ms).yellow(),
        McpEvent::ReconnectionSucceeded { name, attempts } => {
            format!("{} reconnected after {} attempts", name, attempts).green()
        }
        McpEvent::ReconnectionFailed { name, attempts } => {
            format!("{} gave up after {} attempts", name, attempts).red().bold()
        }
        McpEvent::ServerUnhealthy { name } => format!("{} unhealthy", name).red(),
        McpEvent::TokenWarning { name, usage, limit } => {
            format!("{} token usage {}/{}", name, usage, limit).yellow()
        }
        McpEvent::TokenLimitExceeded { name } => format!("{} token limit exceeded", name).red(),
    };
    println!("{} {}", stamp.to_string().dimmed(), line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether::mcp::ServerName;

    #[test]
    fn test_health_summary_prints_rate_as_is() {
        let report = HealthReport {
            name: ServerName::new("search").unwrap(),
            success_count: 3,
            failure_count: 1,
            success_rate: 75.0,
            avg_latency_ms: 12.5,
            p95_latency_ms: 40.0,
            samples: 3,
            uptime_secs: None,
            last_error: None,
            last_error_at: None,
        };

        assert_eq!(
            health_summary(&report),
            "75% ok (4 probes), avg 12.5ms, p95 40.0ms"
        );
    }
}
