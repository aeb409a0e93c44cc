// MCP router - one connection per configured server

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, Content, RawContent};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{McpBridge, McpServerConfig, McpToolInfo, McpTransport};

struct Connection {
    service: RunningService<RoleClient, ()>,
    tools: Vec<McpToolInfo>,
}

/// Connects to every enabled server at startup and routes calls by
/// server name. Servers that fail to come up are skipped with a warning;
/// the rest of the session proceeds without them.
pub struct McpRouter {
    connections: HashMap<String, Connection>,
}

impl McpRouter {
    pub async fn from_config(servers: &HashMap<String, McpServerConfig>) -> Result<Self> {
        let mut connections = HashMap::new();

        for (name, config) in servers {
            if !config.enabled {
                continue;
            }
            if let Err(e) = config.validate(name) {
                warn!("skipping MCP server '{name}': {e:#}");
                continue;
            }
            match Self::connect(name, config).await {
                Ok(conn) => {
                    info!(
                        "connected to MCP server '{name}' with {} tools",
                        conn.tools.len()
                    );
                    connections.insert(name.clone(), conn);
                }
                Err(e) => {
                    warn!("failed to connect to MCP server '{name}': {e:#}");
                }
            }
        }

        Ok(Self { connections })
    }

    async fn connect(name: &str, config: &McpServerConfig) -> Result<Connection> {
        let service = match config.transport {
            McpTransport::Stdio => {
                let command = config.command.as_ref().expect("validated");
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(&config.args);
                for (k, v) in &config.env {
                    cmd.env(k, v);
                }
                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("spawn MCP server '{name}'"))?;
                ()
                    .serve(transport)
                    .await
                    .with_context(|| format!("MCP handshake with '{name}'"))?
            }
            McpTransport::Http => {
                let url = config.url.as_ref().expect("validated");
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                ()
                    .serve(transport)
                    .await
                    .with_context(|| format!("MCP handshake with '{name}'"))?
            }
        };

        let tools = service
            .list_all_tools()
            .await
            .with_context(|| format!("list tools on '{name}'"))?
            .into_iter()
            .map(|t| McpToolInfo {
                server: name.to_string(),
                name: t.name.to_string(),
                description: t.description.as_deref().unwrap_or("").to_string(),
                input_schema: serde_json::to_value(&*t.input_schema)
                    .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
            })
            .collect();

        Ok(Connection { service, tools })
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Shut down every connection.
    pub async fn close(self) {
        for (name, conn) in self.connections {
            if let Err(e) = conn.service.cancel().await {
                warn!("shutdown of MCP server '{name}' failed: {e}");
            }
        }
    }
}

#[async_trait]
impl McpBridge for McpRouter {
    async fn list(&self) -> Vec<McpToolInfo> {
        let mut tools: Vec<McpToolInfo> = self
            .connections
            .values()
            .flat_map(|c| c.tools.iter().cloned())
            .collect();
        tools.sort_by(|a, b| (&a.server, &a.name).cmp(&(&b.server, &b.name)));
        tools
    }

    async fn call(&self, server: &str, tool: &str, args: serde_json::Value) -> Result<String> {
        let conn = self
            .connections
            .get(server)
            .ok_or_else(|| anyhow!("unknown MCP server '{server}'"))?;

        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(tool.to_string()),
            arguments: args.as_object().cloned(),
            task: None,
        };

        let result: CallToolResult = conn
            .service
            .peer()
            .call_tool(params)
            .await
            .with_context(|| format!("call {server}/{tool}"))?;

        let text = extract_text(&result.content);
        if result.is_error == Some(true) {
            return Err(anyhow!("{server}/{tool} reported an error: {text}"));
        }
        if let Some(structured) = result.structured_content {
            return Ok(structured.to_string());
        }
        Ok(text)
    }
}

fn extract_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_config_yields_no_connections() {
        let router = McpRouter::from_config(&HashMap::new()).await.unwrap();
        assert!(router.server_names().is_empty());
        assert!(router.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_call_unknown_server_errors() {
        let router = McpRouter::from_config(&HashMap::new()).await.unwrap();
        let err = router
            .call("nope", "tool", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown MCP server"));
    }

    #[tokio::test]
    async fn test_disabled_server_is_skipped() {
        let mut servers = HashMap::new();
        servers.insert(
            "off".to_string(),
            McpServerConfig {
                transport: McpTransport::Stdio,
                command: Some("definitely-not-a-binary".to_string()),
                args: vec![],
                env: HashMap::new(),
                url: None,
                enabled: false,
            },
        );
        let router = McpRouter::from_config(&servers).await.unwrap();
        assert!(router.server_names().is_empty());
    }
}
