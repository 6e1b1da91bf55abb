// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for the MCP module.
//!
//! These benchmarks measure:
//! - Server map parsing and validation
//! - Hot-path helpers (backoff, qualified names, latency percentiles)
//! - Catalog aggregation across many servers

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use tether::mcp::health::LatencyRing;
use tether::mcp::{
    backoff_delay, resolve_servers, split_qualified, Connector, ManagerConfig, McpError,
    McpManager, McpSession, McpToolResult, PromptSpec, RawServerConfig, ReconnectionConfig,
    ResourceSpec, ServerConfig, ServerInfo, ServerName, ToolSpec, TransportSpec,
};

fn bench_config_parsing(c: &mut Criterion) {
    let json = r#"
    {
        "filesystem": {
            "transport": {
                "type": "stdio",
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
            },
            "startup_timeout_sec": 30
        },
        "github": {
            "transport": {
                "type": "streamable_http",
                "url": "https://mcp.github.com/v1",
                "headers": { "Authorization": "Bearer ${GITHUB_TOKEN}" }
            },
            "disabled_tools": ["delete_repo"]
        },
        "docs": {
            "transport": { "type": "sse", "url": "https://docs.dev/sse" }
        }
    }
    "#;

    c.bench_function("mcp_resolve_servers", |b| {
        b.iter(|| {
            let raw: HashMap<String, RawServerConfig> =
                serde_json::from_str(black_box(json)).unwrap();
            resolve_servers(&raw)
        });
    });
}

fn bench_helpers(c: &mut Criterion) {
    let config = ReconnectionConfig::default();
    c.bench_function("mcp_backoff_delay", |b| {
        b.iter(|| {
            for attempt in 1..=10 {
                black_box(backoff_delay(&config, black_box(attempt)));
            }
        });
    });

    c.bench_function("mcp_split_qualified", |b| {
        b.iter(|| split_qualified(black_box("mcp__filesystem__read_file")));
    });

    let mut ring = LatencyRing::default();
    for i in 0..250 {
        ring.push((i % 37) as f64 * 1.5);
    }
    c.bench_function("mcp_latency_p95", |b| {
        b.iter(|| black_box(&ring).percentile(95.0));
    });

    let result = McpToolResult::text("x".repeat(4096));
    c.bench_function("mcp_tool_result_tokens", |b| {
        b.iter(|| black_box(&result).estimated_tokens());
    });
}

struct StaticSession {
    tools: Vec<ToolSpec>,
}

#[async_trait]
impl McpSession for StaticSession {
    fn server_info(&self) -> Option<ServerInfo> {
        None
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        Ok(self.tools.clone())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptSpec>, McpError> {
        Ok(Vec::new())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSpec>, McpError> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        Ok(McpToolResult::text(format!("{name}: {arguments}")))
    }

    async fn close(&self) -> Result<(), McpError> {
        Ok(())
    }
}

struct StaticConnector;

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self, _config: &ServerConfig) -> Result<Arc<dyn McpSession>, McpError> {
        let tools = (0..50)
            .map(|i| ToolSpec::new(format!("tool_{i:02}")).with_description("benchmark tool"))
            .collect();
        Ok(Arc::new(StaticSession { tools }))
    }
}

fn bench_catalog(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = McpManager::new(ManagerConfig::default(), Arc::new(StaticConnector));
    rt.block_on(async {
        let configs = (0..10).map(|i| {
            ServerConfig::new(
                ServerName::new(format!("server{i}")).unwrap(),
                TransportSpec::stdio("bench"),
            )
        });
        manager.add_servers(configs).await;
    });

    c.bench_function("mcp_get_tools_10x50", |b| {
        b.to_async(&rt).iter(|| async { black_box(manager.get_tools().await) });
    });

    c.bench_function("mcp_call_tool", |b| {
        b.to_async(&rt).iter(|| async {
            manager
                .call_tool("mcp__server3__tool_07", json!({"q": 1}))
                .await
                .unwrap()
        });
    });

    rt.block_on(manager.shutdown()).unwrap();
}

criterion_group!(benches, bench_config_parsing, bench_helpers, bench_catalog);
criterion_main!(benches);
