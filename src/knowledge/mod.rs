// Local technique notes
//
// A directory of markdown notes with a YAML index; serves the Brain's
// search_knowledge / read_knowledge actions. Reads never escape the
// knowledge root.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeEntry {
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeIndex {
    #[serde(default)]
    entries: Vec<KnowledgeEntry>,
}

pub struct Knowledge {
    root: PathBuf,
    entries: Vec<KnowledgeEntry>,
}

impl Knowledge {
    /// Load from `index.yaml` under the root; fall back to walking the
    /// directory for `.md` files when no index is present.
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("knowledge root {} is not a directory", root.display());
        }

        let index_path = root.join("index.yaml");
        let entries = if index_path.exists() {
            let text = std::fs::read_to_string(&index_path)
                .with_context(|| format!("Failed to read {}", index_path.display()))?;
            let index: KnowledgeIndex = serde_yaml::from_str(&text)
                .with_context(|| format!("Failed to parse {}", index_path.display()))?;
            index.entries
        } else {
            debug!("no index.yaml under {}, walking for notes", root.display());
            WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
                .filter_map(|e| {
                    let rel = e.path().strip_prefix(root).ok()?;
                    let path = rel.to_string_lossy().to_string();
                    let title = e.path().file_stem()?.to_string_lossy().replace('-', " ");
                    Some(KnowledgeEntry {
                        path,
                        title,
                        tags: Vec::new(),
                    })
                })
                .collect()
        };

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    /// Rank notes by token overlap against title, tags and path.
    /// Returns a short formatted list for the Brain's observation.
    pub fn search(&self, query: &str) -> String {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return "empty query".to_string();
        }

        let mut scored: Vec<(usize, &KnowledgeEntry)> = self
            .entries
            .iter()
            .map(|e| {
                let haystack = format!(
                    "{} {} {}",
                    e.title.to_lowercase(),
                    e.tags.join(" ").to_lowercase(),
                    e.path.to_lowercase()
                );
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score, e)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(5);

        if scored.is_empty() {
            return format!("no notes match '{query}'");
        }
        scored
            .iter()
            .map(|(_, e)| format!("- {} ({})", e.title, e.path))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Read one note, confined to the knowledge root.
    pub fn read(&self, rel: &str) -> Result<String> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("knowledge root {} vanished", self.root.display()))?;
        let candidate = root
            .join(rel)
            .canonicalize()
            .with_context(|| format!("no such note: {rel}"))?;
        if !candidate.starts_with(&root) {
            bail!("note path escapes the knowledge root: {rel}");
        }
        std::fs::read_to_string(&candidate)
            .with_context(|| format!("Failed to read {}", candidate.display()))
    }
}
