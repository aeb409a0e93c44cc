// Target state - the unit of assessment
//
// A Target is mutated exclusively by its owning loop; the Team only
// creates it. Display blocks are an append-only history: past blocks are
// touched only to append output to the latest command block or to mark a
// block complete with its duration.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::constants::{COMMAND_HISTORY_KEEP, COMMAND_HISTORY_TAIL};
use crate::recon::ReconTree;
use crate::runner::Entity;

/// Lifecycle of one target, driven by its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Idle,
    Scanning,
    Running,
    Paused,
    Pwned,
    Failed,
}

/// A high-impact command withheld pending operator decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub description: String,
    pub tool: String,
    pub args: Vec<String>,
}

/// One append-only log entry in a target's display history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum DisplayBlock {
    Command {
        command: String,
        lines: Vec<String>,
        completed: bool,
        exit_code: Option<i32>,
        duration_ms: Option<u64>,
    },
    Thinking {
        completed: bool,
        duration_ms: Option<u64>,
    },
    AiMessage {
        text: String,
    },
    Memory {
        title: String,
        severity: String,
    },
    SubTask {
        task_id: u64,
        goal: String,
        completed: bool,
        duration_ms: Option<u64>,
    },
    UserInput {
        text: String,
    },
    System {
        text: String,
    },
}

/// Record of one finished command, fed back into the Brain's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHistoryEntry {
    pub command: String,
    pub exit_code: i32,
    pub observation: String,
    pub duration_ms: u64,
}

/// One host under assessment.
#[derive(Debug)]
pub struct Target {
    pub id: u64,
    pub host: String,
    pub status: TargetStatus,
    pub blocks: Vec<DisplayBlock>,
    pub proposal: Option<Proposal>,
    pub recon: Option<ReconTree>,
    history: VecDeque<CommandHistoryEntry>,
    entities: Vec<Entity>,
}

impl Target {
    pub fn new(id: u64, host: String) -> Self {
        Self {
            id,
            host,
            status: TargetStatus::Idle,
            blocks: Vec::new(),
            proposal: None,
            recon: None,
            history: VecDeque::new(),
            entities: Vec::new(),
        }
    }

    pub fn push_block(&mut self, block: DisplayBlock) {
        self.blocks.push(block);
    }

    /// Append one output line to the most recent command block.
    pub fn append_command_line(&mut self, line: &str) {
        if let Some(DisplayBlock::Command {
            lines, completed, ..
        }) = self.blocks.iter_mut().rev().find(|b| matches!(b, DisplayBlock::Command { .. }))
        {
            if !*completed {
                lines.push(line.to_string());
            }
        }
    }

    /// Mark the most recent command block complete.
    pub fn complete_last_command(&mut self, exit: i32, duration_ms: u64) {
        if let Some(DisplayBlock::Command {
            completed,
            exit_code,
            duration_ms: d,
            ..
        }) = self.blocks.iter_mut().rev().find(|b| matches!(b, DisplayBlock::Command { .. }))
        {
            *completed = true;
            *exit_code = Some(exit);
            *d = Some(duration_ms);
        }
    }

    /// Mark a sub-task block complete once its result is observed.
    pub fn complete_subtask_block(&mut self, task_id: u64, duration_ms: Option<u64>) {
        if let Some(DisplayBlock::SubTask {
            completed,
            duration_ms: d,
            ..
        }) = self.blocks.iter_mut().rev().find(
            |b| matches!(b, DisplayBlock::SubTask { task_id: t, .. } if *t == task_id),
        ) {
            *completed = true;
            *d = duration_ms;
        }
    }

    /// Mark the most recent thinking block complete.
    pub fn complete_last_thinking(&mut self, duration_ms: u64) {
        if let Some(DisplayBlock::Thinking {
            completed,
            duration_ms: d,
        }) = self.blocks.iter_mut().rev().find(|b| matches!(b, DisplayBlock::Thinking { .. }))
        {
            *completed = true;
            *d = Some(duration_ms);
        }
    }

    pub fn record_history(&mut self, entry: CommandHistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > COMMAND_HISTORY_KEEP {
            self.history.pop_front();
        }
    }

    pub fn last_history(&self) -> Option<&CommandHistoryEntry> {
        self.history.back()
    }

    /// The recent tail rendered into each prompt.
    pub fn history_tail(&self) -> Vec<&CommandHistoryEntry> {
        let skip = self.history.len().saturating_sub(COMMAND_HISTORY_TAIL);
        self.history.iter().skip(skip).collect()
    }

    /// Merge newly extracted entities, suppressing duplicates.
    pub fn absorb_entities(&mut self, found: &[Entity]) {
        for e in found {
            if !self.entities.contains(e) {
                self.entities.push(e.clone());
            }
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// JSON snapshot injected into the Brain's prompt.
    pub fn snapshot_json(&self) -> serde_json::Value {
        let ports: Vec<serde_json::Value> = self
            .recon
            .as_ref()
            .map(|t| {
                t.ports()
                    .into_iter()
                    .map(|p| {
                        serde_json::json!({
                            "port": p.port,
                            "service": p.service,
                            "banner": p.banner,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        serde_json::json!({
            "id": self.id,
            "host": self.host,
            "status": self.status,
            "ports": ports,
            "entities": self.entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::new(1, "10.0.0.5".to_string())
    }

    #[test]
    fn test_new_target_is_idle_with_no_proposal() {
        let t = target();
        assert_eq!(t.status, TargetStatus::Idle);
        assert!(t.proposal.is_none());
        assert!(t.recon.is_none());
        assert!(t.blocks.is_empty());
    }

    #[test]
    fn test_append_line_goes_to_latest_command_block() {
        let mut t = target();
        t.push_block(DisplayBlock::Command {
            command: "nmap -Pn 10.0.0.5".into(),
            lines: Vec::new(),
            completed: false,
            exit_code: None,
            duration_ms: None,
        });
        t.append_command_line("22/tcp open ssh");
        t.append_command_line("80/tcp open http");
        match &t.blocks[0] {
            DisplayBlock::Command { lines, .. } => assert_eq!(lines.len(), 2),
            _ => panic!("wrong block"),
        }
    }

    #[test]
    fn test_completed_command_block_rejects_lines() {
        let mut t = target();
        t.push_block(DisplayBlock::Command {
            command: "true".into(),
            lines: Vec::new(),
            completed: false,
            exit_code: None,
            duration_ms: None,
        });
        t.complete_last_command(0, 12);
        t.append_command_line("late line");
        match &t.blocks[0] {
            DisplayBlock::Command {
                lines,
                completed,
                exit_code,
                ..
            } => {
                assert!(lines.is_empty());
                assert!(*completed);
                assert_eq!(*exit_code, Some(0));
            }
            _ => panic!("wrong block"),
        }
    }

    #[test]
    fn test_history_is_capped() {
        let mut t = target();
        for i in 0..40 {
            t.record_history(CommandHistoryEntry {
                command: format!("cmd-{i}"),
                exit_code: 0,
                observation: String::new(),
                duration_ms: 1,
            });
        }
        assert_eq!(t.history_tail().len(), COMMAND_HISTORY_TAIL);
        assert_eq!(t.last_history().unwrap().command, "cmd-39");
    }

    #[test]
    fn test_absorb_entities_deduplicates() {
        let mut t = target();
        let e = vec![Entity::Ip {
            address: "10.0.0.9".into(),
        }];
        t.absorb_entities(&e);
        t.absorb_entities(&e);
        assert_eq!(t.entities().len(), 1);
    }

    #[test]
    fn test_snapshot_json_carries_host_and_status() {
        let t = target();
        let snap = t.snapshot_json();
        assert_eq!(snap["host"], "10.0.0.5");
        assert_eq!(snap["status"], "idle");
    }
}
