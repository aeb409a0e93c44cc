// Session event log - every bus frame as one JSON line
//
// Audit trail of the engagement; replayable by tooling.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::events::EventKind;

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    ts: String,
    session: &'a Uuid,
    target_id: u64,
    #[serde(flatten)]
    kind: &'a EventKind,
}

/// Appends session events to `<dir>/session_YYYY-MM-DD.jsonl`. Lines
/// from different runs on the same day are told apart by the session id.
pub struct SessionLog {
    path: PathBuf,
    session: Uuid,
    guard: Mutex<()>,
}

impl SessionLog {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create session directory {}", dir.display()))?;
        let date = Local::now().format("%Y-%m-%d").to_string();
        Ok(Self {
            path: dir.join(format!("session_{date}.jsonl")),
            session: Uuid::new_v4(),
            guard: Mutex::new(()),
        })
    }

    /// Append one event; failures are logged and swallowed so the bus
    /// never stalls on disk trouble.
    pub fn append(&self, target_id: u64, kind: &EventKind) {
        if let Err(e) = self.try_append(target_id, kind) {
            warn!("session log write failed: {e:#}");
        }
    }

    fn try_append(&self, target_id: u64, kind: &EventKind) -> Result<()> {
        let entry = LogEntry {
            ts: Utc::now().to_rfc3339(),
            session: &self.session,
            target_id,
            kind,
        };
        let json = serde_json::to_string(&entry).context("serialize session event")?;
        let _lock = self.guard.lock().expect("session log mutex");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        writeln!(file, "{json}").context("write session event")?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
