// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Validated MCP server names.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Separator between the server and tool parts of a qualified tool name.
pub const CATALOG_SEPARATOR: &str = "__";

/// Prefix for qualified tool names exposed to the model.
pub const TOOL_PREFIX: &str = "mcp";

/// Longest accepted server name.
pub const MAX_SERVER_NAME_LEN: usize = 64;

/// Underscores are allowed inside a name but not at either end, where they
/// would merge with the separator into `___`.
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9-](?:[A-Za-z0-9_-]*[A-Za-z0-9-])?$")
        .expect("server name pattern is valid")
});

/// A server name that has passed validation.
///
/// The only way to obtain one is [`ServerName::new`], so any `ServerName`
/// can be embedded in a qualified tool name and split back out unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServerName(String);

impl ServerName {
    /// Validate `raw`, returning `None` when it is not an acceptable name.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let raw = raw.as_ref();
        if raw.is_empty()
            || raw.len() > MAX_SERVER_NAME_LEN
            || raw.contains(CATALOG_SEPARATOR)
            || !NAME_PATTERN.is_match(raw)
        {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Qualified name for one of this server's tools (`mcp__server__tool`).
    pub fn qualify(&self, tool: &str) -> String {
        format!(
            "{TOOL_PREFIX}{CATALOG_SEPARATOR}{}{CATALOG_SEPARATOR}{tool}",
            self.0
        )
    }
}

/// Split a qualified tool name into its server and tool parts.
pub fn split_qualified(qualified: &str) -> Option<(ServerName, &str)> {
    let rest = qualified
        .strip_prefix(TOOL_PREFIX)?
        .strip_prefix(CATALOG_SEPARATOR)?;
    let (server, tool) = rest.split_once(CATALOG_SEPARATOR)?;
    if tool.is_empty() {
        return None;
    }
    Some((ServerName::new(server)?, tool))
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ServerName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ServerName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ServerName::new(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid MCP server name '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_names() {
        for raw in ["filesystem", "git-hub", "server_1", "A"] {
            assert_eq!(ServerName::new(raw).unwrap().as_str(), raw);
        }
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(ServerName::new("").is_none());
        assert!(ServerName::new("has__separator").is_none());
        assert!(ServerName::new("has space").is_none());
        assert!(ServerName::new("dots.not.allowed").is_none());
        assert!(ServerName::new("slash/name").is_none());
        assert!(ServerName::new("x".repeat(MAX_SERVER_NAME_LEN + 1)).is_none());
        assert!(ServerName::new("x".repeat(MAX_SERVER_NAME_LEN)).is_some());
    }

    #[test]
    fn test_qualified_names_round_trip_with_underscores() {
        let name = ServerName::new("my_server").unwrap();
        let qualified = name.qualify("read_file");
        assert_eq!(qualified, "mcp__my_server__read_file");

        let (server, tool) = split_qualified(&qualified).unwrap();
        assert_eq!(server, name);
        assert_eq!(tool, "read_file");
    }

    #[test]
    fn test_edge_underscores_are_rejected() {
        for raw in ["a_", "_a", "_", "_a_"] {
            assert!(ServerName::new(raw).is_none(), "{raw}");
        }
        assert!(split_qualified("mcp__a___tool")
            .is_some_and(|(server, tool)| server.as_str() == "a" && tool == "_tool"));

        let name = ServerName::new("a_b").unwrap();
        let qualified = name.qualify("tool");
        let (server, tool) = split_qualified(&qualified).unwrap();
        assert_eq!(server, name);
        assert_eq!(tool, "tool");
    }

    #[test]
    fn test_split_rejects_foreign_names() {
        assert!(split_qualified("read_file").is_none());
        assert!(split_qualified("mcp__fs").is_none());
        assert!(split_qualified("mcp__fs__").is_none());
        assert!(split_qualified("mcp__bad name__tool").is_none());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ServerName = serde_json::from_str("\"fs\"").unwrap();
        assert_eq!(ok.as_str(), "fs");
        assert!(serde_json::from_str::<ServerName>("\"a__b\"").is_err());
    }
}
