// Per-host finding store
//
// Findings accumulate per host and are rendered into a deduplicated
// digest that is injected into every Brain prompt. Appends are idempotent
// on exact duplicates. Reads are lock-free snapshots; writes serialize on
// the host's entry. Records are also appended to a JSONL file under the
// session directory when one is configured.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// One finding about a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Free-form category: "service", "vulnerability", "credential",
    /// "note" and whatever else the Brain decides to file.
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize)]
struct PersistedRecord<'a> {
    ts: String,
    host: &'a str,
    #[serde(flatten)]
    record: &'a MemoryRecord,
}

/// Append/read store of per-host findings.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hosts: DashMap<String, Vec<MemoryRecord>>,
    sink: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also appends every accepted record to
    /// `<dir>/memory.jsonl`.
    pub fn with_sink(dir: PathBuf) -> Self {
        Self {
            hosts: DashMap::new(),
            sink: Some(dir.join("memory.jsonl")),
        }
    }

    /// Append a finding. Returns false (and stores nothing) when an
    /// identical record already exists for the host.
    pub fn record(&self, host: &str, record: MemoryRecord) -> bool {
        let mut entry = self.hosts.entry(host.to_string()).or_default();
        if entry.contains(&record) {
            return false;
        }

        if let Some(path) = &self.sink {
            if let Err(e) = append_jsonl(path, host, &record) {
                warn!("memory persistence failed: {e:#}");
            }
        }
        entry.push(record);
        true
    }

    /// Digest of a host's findings for prompt injection, grouped by kind.
    pub fn digest(&self, host: &str) -> String {
        let Some(records) = self.hosts.get(host) else {
            return String::new();
        };
        if records.is_empty() {
            return String::new();
        }

        let mut kinds: Vec<&str> = Vec::new();
        for r in records.iter() {
            if !kinds.contains(&r.kind.as_str()) {
                kinds.push(&r.kind);
            }
        }

        let mut out = String::new();
        for kind in kinds {
            out.push_str(&format!("## {kind}\n"));
            for r in records.iter().filter(|r| r.kind == kind) {
                out.push_str(&format!("- [{}] {}", r.severity, r.title));
                if !r.description.is_empty() {
                    out.push_str(&format!(": {}", r.description));
                }
                out.push('\n');
            }
        }
        out
    }

    pub fn count(&self, host: &str) -> usize {
        self.hosts.get(host).map(|r| r.len()).unwrap_or(0)
    }
}

fn append_jsonl(path: &PathBuf, host: &str, record: &MemoryRecord) -> anyhow::Result<()> {
    use anyhow::Context;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create session directory")?;
    }
    let entry = PersistedRecord {
        ts: Utc::now().to_rfc3339(),
        host,
        record,
    };
    let json = serde_json::to_string(&entry).context("serialize memory record")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    writeln!(file, "{json}").context("write memory record")?;
    Ok(())
}
