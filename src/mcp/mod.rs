// Bridge to external MCP tool servers
//
// The core only knows the contract: list the advertised tools, call one
// by (server, tool, args). Failures surface to the loop as observations
// plus an Error event; they never kill the session.

mod router;

pub use router::McpRouter;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One advertised external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub server: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[async_trait]
pub trait McpBridge: Send + Sync {
    /// Tools advertised by every connected server.
    async fn list(&self) -> Vec<McpToolInfo>;

    /// Invoke one tool; returns its text output.
    async fn call(&self, server: &str, tool: &str, args: serde_json::Value) -> Result<String>;
}

/// Transport for one configured MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    /// Launch a local server process and speak over its stdio.
    Stdio,
    /// Connect to a remote server over streamable HTTP.
    Http,
}

/// MCP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub transport: McpTransport,

    /// Command to execute (stdio transport).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Endpoint URL (http transport).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl McpServerConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        match self.transport {
            McpTransport::Stdio if self.command.is_none() => {
                anyhow::bail!("MCP server '{name}': stdio transport requires 'command'")
            }
            McpTransport::Http if self.url.is_none() => {
                anyhow::bail!("MCP server '{name}': http transport requires 'url'")
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_config_requires_command() {
        let config = McpServerConfig {
            transport: McpTransport::Stdio,
            command: None,
            args: vec![],
            env: HashMap::new(),
            url: None,
            enabled: true,
        };
        assert!(config.validate("test").is_err());

        let config = McpServerConfig {
            command: Some("npx".to_string()),
            ..config
        };
        assert!(config.validate("test").is_ok());
    }

    #[test]
    fn test_http_config_requires_url() {
        let config = McpServerConfig {
            transport: McpTransport::Http,
            command: None,
            args: vec![],
            env: HashMap::new(),
            url: None,
            enabled: true,
        };
        assert!(config.validate("test").is_err());

        let config = McpServerConfig {
            url: Some("http://localhost:3000/mcp".to_string()),
            ..config
        };
        assert!(config.validate("test").is_ok());
    }
}
