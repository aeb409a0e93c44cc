// The Brain's single structured reply per turn
//
// A tagged sum type discriminated by the `action` string. Unknown kinds
// are rejected at parse time. The Brain frequently wraps its JSON in
// prose or fenced blocks, so extraction peels a fence first and then
// slices from the first `{` to the last `}`.

use serde::{Deserialize, Serialize};

use crate::errors::BrainError;
use crate::memory::MemoryRecord;
use crate::subtask::{SubTaskKind, TaskMetadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Execute a command; gated unless the tool is safe or auto-approve
    /// is on.
    Run { command: String },

    /// Explicitly request operator approval for a high-impact command.
    Propose {
        command: String,
        #[serde(default)]
        reason: String,
    },

    /// Record reasoning without side effects.
    Think { thought: String },

    /// Declare the target done.
    Complete {
        #[serde(default)]
        summary: String,
    },

    /// File a finding into the per-host store.
    Memory {
        #[serde(flatten)]
        record: MemoryRecord,
    },

    /// Ask the team to open a new target.
    AddTarget { host: String },

    /// Invoke an external MCP tool.
    CallMcp {
        server: String,
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
    },

    /// Start a background sub-task.
    SpawnTask {
        kind: SubTaskKind,
        goal: String,
        #[serde(default)]
        metadata: Option<TaskMetadata>,
    },

    /// Block until a sub-task finishes.
    Wait { task_id: u64 },

    /// Snapshot a sub-task's partial output.
    CheckTask { task_id: u64 },

    /// Cancel a sub-task.
    KillTask { task_id: u64 },

    /// Query the local technique notes.
    SearchKnowledge { query: String },

    /// Read one technique note.
    ReadKnowledge { path: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Run { .. } => "run",
            Action::Propose { .. } => "propose",
            Action::Think { .. } => "think",
            Action::Complete { .. } => "complete",
            Action::Memory { .. } => "memory",
            Action::AddTarget { .. } => "add_target",
            Action::CallMcp { .. } => "call_mcp",
            Action::SpawnTask { .. } => "spawn_task",
            Action::Wait { .. } => "wait",
            Action::CheckTask { .. } => "check_task",
            Action::KillTask { .. } => "kill_task",
            Action::SearchKnowledge { .. } => "search_knowledge",
            Action::ReadKnowledge { .. } => "read_knowledge",
        }
    }
}

/// Parse an Action out of a raw Brain reply.
pub fn parse_action(raw: &str) -> Result<Action, BrainError> {
    let candidate = peel_fence(raw).unwrap_or(raw);
    let sliced = slice_braces(candidate)
        .ok_or_else(|| BrainError::MalformedAction("no JSON object in reply".to_string()))?;
    serde_json::from_str(sliced).map_err(|e| BrainError::MalformedAction(e.to_string()))
}

/// Return the body of the first fenced block, if any.
fn peel_fence(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_ticks = &raw[open + 3..];
    // skip an optional language tag up to the first newline
    let body_start = after_ticks.find('\n')? + 1;
    let body = &after_ticks[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Slice from the first `{` to the last `}` inclusive.
fn slice_braces(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end >= start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_kinds() -> Vec<Action> {
        vec![
            Action::Run {
                command: "nmap -p 22,80 --open -Pn 10.0.0.5".into(),
            },
            Action::Propose {
                command: "hydra -l admin -P list ssh://10.0.0.5".into(),
                reason: "brute force".into(),
            },
            Action::Think {
                thought: "port 80 looks promising".into(),
            },
            Action::Complete {
                summary: "root obtained".into(),
            },
            Action::Memory {
                record: MemoryRecord {
                    kind: "vulnerability".into(),
                    title: "CVE-2021-41773".into(),
                    description: "path traversal".into(),
                    severity: "critical".into(),
                },
            },
            Action::AddTarget {
                host: "10.0.0.6".into(),
            },
            Action::CallMcp {
                server: "burp".into(),
                tool: "scan".into(),
                args: serde_json::json!({"url": "http://10.0.0.5/"}),
            },
            Action::SpawnTask {
                kind: SubTaskKind::Runner,
                goal: "nikto -h http://10.0.0.5/".into(),
                metadata: Some(TaskMetadata {
                    port: Some(80),
                    service: Some("http".into()),
                    phase: Some("recon".into()),
                }),
            },
            Action::Wait { task_id: 3 },
            Action::CheckTask { task_id: 3 },
            Action::KillTask { task_id: 3 },
            Action::SearchKnowledge {
                query: "apache path traversal".into(),
            },
            Action::ReadKnowledge {
                path: "web/apache.md".into(),
            },
        ]
    }

    #[test]
    fn test_action_json_round_trips_for_every_kind() {
        for action in all_kinds() {
            let json = serde_json::to_string(&action).unwrap();
            let back: Action = serde_json::from_str(&json).unwrap();
            assert_eq!(back, action, "round trip failed for {}", action.kind());
        }
    }

    #[test]
    fn test_parse_bare_json() {
        let a = parse_action(r#"{"action":"run","command":"nmap -Pn 10.0.0.5"}"#).unwrap();
        assert_eq!(
            a,
            Action::Run {
                command: "nmap -Pn 10.0.0.5".into()
            }
        );
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "Here is my plan.\n```json\n{\"action\":\"think\",\"thought\":\"enumerate\"}\n```\nDone.";
        let a = parse_action(raw).unwrap();
        assert_eq!(
            a,
            Action::Think {
                thought: "enumerate".into()
            }
        );
    }

    #[test]
    fn test_parse_prose_wrapped_json() {
        let raw = "I will scan now. {\"action\":\"run\",\"command\":\"nmap 10.0.0.5\"} Let me know.";
        let a = parse_action(raw).unwrap();
        assert_eq!(a.kind(), "run");
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let err = parse_action(r#"{"action":"fire_missiles"}"#).unwrap_err();
        assert!(matches!(err, BrainError::MalformedAction(_)));
    }

    #[test]
    fn test_missing_action_field_is_malformed() {
        let err = parse_action(r#"{"command":"nmap"}"#).unwrap_err();
        assert!(matches!(err, BrainError::MalformedAction(_)));
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let err = parse_action(r#"{"action":"run"}"#).unwrap_err();
        assert!(matches!(err, BrainError::MalformedAction(_)));
    }

    #[test]
    fn test_no_json_at_all_is_malformed() {
        let err = parse_action("I have no idea what to do next.").unwrap_err();
        assert!(matches!(err, BrainError::MalformedAction(_)));
    }

    #[test]
    fn test_memory_action_defaults_severity() {
        let a = parse_action(
            r#"{"action":"memory","kind":"note","title":"robots.txt lists /backup"}"#,
        )
        .unwrap();
        match a {
            Action::Memory { record } => {
                assert_eq!(record.severity, "info");
                assert_eq!(record.description, "");
            }
            _ => panic!("wrong kind"),
        }
    }
}
