// Configuration loader
// Reads ~/.pentecter/config.toml, then fills API keys from the environment

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use super::settings::{Config, ProviderKind};

/// Load configuration from disk and environment.
///
/// Order: `~/.pentecter/config.toml` if present, else defaults; then the
/// provider API key from the environment when the file carries none.
pub fn load_config() -> Result<Config> {
    let mut config = match config_path() {
        Some(path) if path.exists() => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        _ => Config::default(),
    };

    if config.provider.api_key.is_none() {
        config.provider.api_key = key_from_env(config.provider.kind);
    }

    if config.provider.api_key.is_none() {
        let var = match config.provider.kind {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Openai => "OPENAI_API_KEY",
        };
        bail!(
            "No API key for the configured provider\n\n\
             Checked locations:\n\
             1. ~/.pentecter/config.toml (provider.api_key)\n\
             2. Environment variable: ${var}\n\n\
             Quick setup:\n\
             export {var}=\"...\""
        );
    }

    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".pentecter/config.toml"))
}

fn key_from_env(kind: ProviderKind) -> Option<String> {
    let var = match kind {
        ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        ProviderKind::Openai => "OPENAI_API_KEY",
    };
    std::env::var(var).ok().filter(|k| !k.is_empty())
}
