// Brain - the reasoning seam
//
// One `think` call per turn: the loop hands over a snapshot of everything
// it knows, the Brain answers with exactly one Action. The transport
// behind the trait is an LLM vendor; tests substitute scripted brains.

mod action;
mod llm;
pub mod prompt;

pub use action::{parse_action, Action};
pub use llm::LlmBrain;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::BrainError;
use crate::target::CommandHistoryEntry;

/// Snapshot composed by the loop for one `think` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BrainInput {
    pub turn: u32,
    /// Target JSON: host, status, ports, entities.
    pub target: serde_json::Value,
    pub memory_digest: String,
    pub last_command: Option<String>,
    pub last_exit_code: Option<i32>,
    /// Recent command tail, oldest first.
    pub history: Vec<CommandHistoryEntry>,
    /// Out-of-band result of the previous action (sub-task status,
    /// knowledge lookup, capacity rejection, ...).
    pub observation: Option<String>,
    /// At most one queued operator message.
    pub user_message: Option<String>,
    /// Rendered recon queue, present while the tree is locked with
    /// pending work (and on the first turn).
    pub recon_queue: Option<String>,
}

/// Host extracted from free-form operator text. Advisory: the team still
/// validates the host before creating a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostExtraction {
    pub host: String,
    pub instruction: String,
}

#[async_trait]
pub trait Brain: Send + Sync {
    /// One turn of reasoning over the snapshot.
    async fn think(&self, input: &BrainInput) -> Result<Action, BrainError>;

    /// Convert natural-language operator input ("scan eighteen.htb
    /// please") into a host plus the remaining instruction.
    async fn extract_target(&self, text: &str) -> Result<HostExtraction, BrainError>;
}

/// Delegating wrapper that lets the operator switch provider/model
/// mid-session (`/model`) without rebuilding the loops.
pub struct SwitchableBrain {
    inner: std::sync::RwLock<std::sync::Arc<dyn Brain>>,
}

impl SwitchableBrain {
    pub fn new(initial: std::sync::Arc<dyn Brain>) -> Self {
        Self {
            inner: std::sync::RwLock::new(initial),
        }
    }

    pub fn swap(&self, replacement: std::sync::Arc<dyn Brain>) {
        *self.inner.write().expect("brain lock") = replacement;
    }

    fn current(&self) -> std::sync::Arc<dyn Brain> {
        std::sync::Arc::clone(&*self.inner.read().expect("brain lock"))
    }
}

#[async_trait]
impl Brain for SwitchableBrain {
    async fn think(&self, input: &BrainInput) -> Result<Action, BrainError> {
        self.current().think(input).await
    }

    async fn extract_target(&self, text: &str) -> Result<HostExtraction, BrainError> {
        self.current().extract_target(text).await
    }
}
