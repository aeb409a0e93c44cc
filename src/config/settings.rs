// Runtime configuration
//
// Loaded from ~/.pentecter/config.toml, overridden by environment
// variables and CLI flags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::constants::{
    DEFAULT_ANTHROPIC_MODEL, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_HEAD_LINES, DEFAULT_MAX_SUBTASKS,
    DEFAULT_OPENAI_MODEL, DEFAULT_TAIL_LINES, RECON_MAX_PARALLEL,
};

/// Which LLM vendor backs the Brain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
}

/// One configured LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub kind: ProviderKind,
    pub model: String,
    /// Loaded from env (ANTHROPIC_API_KEY / OPENAI_API_KEY) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override for OpenAI-compatible gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderEntry {
    pub fn anthropic() -> Self {
        Self {
            kind: ProviderKind::Anthropic,
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
            api_key: None,
            base_url: None,
        }
    }

    pub fn openai() -> Self {
        Self {
            kind: ProviderKind::Openai,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Per-tool execution policy: timeout, truncation, approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_head")]
    pub head_lines: usize,
    #[serde(default = "default_tail")]
    pub tail_lines: usize,
    /// Safe tools execute without operator approval.
    #[serde(default)]
    pub safe: bool,
}

fn default_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}
fn default_head() -> usize {
    DEFAULT_HEAD_LINES
}
fn default_tail() -> usize {
    DEFAULT_TAIL_LINES
}

impl ToolSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            head_lines: DEFAULT_HEAD_LINES,
            tail_lines: DEFAULT_TAIL_LINES,
            safe: false,
        }
    }

    pub fn safe(mut self) -> Self {
        self.safe = true;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "ProviderEntry::anthropic")]
    pub provider: ProviderEntry,

    /// Execute every `run` without asking the operator.
    #[serde(default)]
    pub auto_approve: bool,

    /// Concurrently running sub-tasks per target loop.
    #[serde(default = "default_max_subtasks")]
    pub max_subtasks: usize,

    /// Concurrently in-progress recon tasks per tree.
    #[serde(default = "default_recon_parallel")]
    pub recon_max_parallel: usize,

    /// Directory of technique notes served to the Brain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_dir: Option<std::path::PathBuf>,

    /// Directory for the session event log and memory persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_dir: Option<std::path::PathBuf>,

    /// MCP servers available through `call_mcp`, by server name.
    #[serde(default)]
    pub mcp_servers: HashMap<String, crate::mcp::McpServerConfig>,

    /// Per-tool policy table; unlisted tools get defaults with `safe = false`.
    /// Listing any `[[tools]]` in the config file replaces the built-in table.
    #[serde(default = "builtin_tools")]
    pub tools: Vec<ToolSpec>,
}

fn default_max_subtasks() -> usize {
    DEFAULT_MAX_SUBTASKS
}
fn default_recon_parallel() -> usize {
    RECON_MAX_PARALLEL
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderEntry::anthropic(),
            auto_approve: false,
            max_subtasks: DEFAULT_MAX_SUBTASKS,
            recon_max_parallel: RECON_MAX_PARALLEL,
            knowledge_dir: None,
            session_dir: None,
            mcp_servers: HashMap::new(),
            tools: builtin_tools(),
        }
    }
}

impl Config {
    /// Look up the policy for a tool by executable name.
    ///
    /// Unknown tools fall back to defaults and require approval.
    pub fn tool_spec(&self, name: &str) -> ToolSpec {
        self.tools
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .unwrap_or_else(|| ToolSpec::named(name))
    }
}

/// The built-in tool table: read-only recon tools are safe, anything that
/// authenticates, brute-forces or exploits is gated.
fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::named("nmap").safe().with_timeout(300),
        ToolSpec::named("ffuf").safe().with_timeout(300),
        ToolSpec::named("gobuster").safe().with_timeout(300),
        ToolSpec::named("curl").safe(),
        ToolSpec::named("whatweb").safe(),
        ToolSpec::named("dig").safe(),
        ToolSpec::named("host").safe(),
        ToolSpec::named("whois").safe(),
        ToolSpec::named("ping").safe().with_timeout(15),
        ToolSpec::named("nikto").with_timeout(600),
        ToolSpec::named("sqlmap").with_timeout(600),
        ToolSpec::named("hydra").with_timeout(600),
        ToolSpec::named("medusa").with_timeout(600),
        ToolSpec::named("msfconsole").with_timeout(600),
        ToolSpec::named("nc"),
        ToolSpec::named("ssh"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_gates_exploit_tools() {
        let cfg = Config::default();
        assert!(cfg.tool_spec("nmap").safe);
        assert!(cfg.tool_spec("curl").safe);
        assert!(!cfg.tool_spec("hydra").safe);
        assert!(!cfg.tool_spec("sqlmap").safe);
    }

    #[test]
    fn test_unknown_tool_requires_approval() {
        let cfg = Config::default();
        let spec = cfg.tool_spec("some-novel-tool");
        assert!(!spec.safe);
        assert_eq!(spec.timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
    }

    #[test]
    fn test_tool_spec_builder() {
        let spec = ToolSpec::named("nmap").safe().with_timeout(120);
        assert_eq!(spec.name, "nmap");
        assert!(spec.safe);
        assert_eq!(spec.timeout_secs, 120);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let cfg = Config::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.max_subtasks, cfg.max_subtasks);
        assert_eq!(back.tools.len(), cfg.tools.len());
    }
}
