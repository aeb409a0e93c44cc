// Bounded background sub-tasks
//
// A loop fans out work without becoming a sub-agent itself: `runner`
// tasks wrap one command, `smart` tasks run a bounded inner
// Brain-Action-Observation loop with a restricted action set. A capped
// number of tasks run concurrently per loop; spawning past the cap fails
// fast so the Brain waits instead of piling up work.
//
// A task is destroyed only once it is terminal AND the parent has
// observed the result at least once, so results are never silently lost.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::brain::{Brain, BrainInput};
use crate::config::constants::{SMART_SUBTASK_MAX_TURNS, SUBTASK_OUTPUT_CAP};
use crate::config::Config;
use crate::errors::{RunErrorKind, SchedulerError};
use crate::memory::MemoryStore;
use crate::runner::{split_command, CommandRunner};
use crate::team::events::{BusHandle, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskKind {
    /// One command, streamed to completion.
    Runner,
    /// A bounded inner reasoning loop working toward a goal.
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Running,
    Done,
    Cancelled,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(self) -> bool {
        self != SubTaskStatus::Running
    }
}

/// Optional context the Brain attaches to a spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Point-in-time view of one task.
#[derive(Debug, Clone)]
pub struct SubTaskSnapshot {
    pub id: u64,
    pub kind: SubTaskKind,
    pub goal: String,
    pub metadata: Option<TaskMetadata>,
    pub status: SubTaskStatus,
    pub output: Vec<String>,
    pub exit_code: Option<i32>,
}

struct TaskState {
    status: Mutex<SubTaskStatus>,
    output: Mutex<VecDeque<String>>,
    exit_code: Mutex<Option<i32>>,
    done: Notify,
}

impl TaskState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(SubTaskStatus::Running),
            output: Mutex::new(VecDeque::new()),
            exit_code: Mutex::new(None),
            done: Notify::new(),
        })
    }

    fn status(&self) -> SubTaskStatus {
        *self.status.lock().expect("status mutex")
    }

    fn push_line(&self, line: String) {
        let mut output = self.output.lock().expect("output mutex");
        output.push_back(line);
        while output.len() > SUBTASK_OUTPUT_CAP {
            output.pop_front();
        }
    }

    fn lines(&self) -> Vec<String> {
        self.output.lock().expect("output mutex").iter().cloned().collect()
    }

    fn finish(&self, status: SubTaskStatus) {
        *self.status.lock().expect("status mutex") = status;
        self.done.notify_waiters();
    }
}

struct TaskEntry {
    kind: SubTaskKind,
    goal: String,
    metadata: Option<TaskMetadata>,
    cancel: CancellationToken,
    state: Arc<TaskState>,
    observed: bool,
}

/// Shared context every worker needs.
pub struct SchedulerDeps {
    pub config: Arc<Config>,
    pub brain: Arc<dyn Brain>,
    pub memory: Arc<MemoryStore>,
    pub bus: BusHandle,
    pub host: String,
}

/// Per-loop sub-task scheduler.
pub struct Scheduler {
    max_parallel: usize,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, TaskEntry>>,
    deps: Arc<SchedulerDeps>,
    parent_cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps, parent_cancel: CancellationToken) -> Self {
        let max_parallel = deps.config.max_subtasks;
        Self {
            max_parallel,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
            deps: Arc::new(deps),
            parent_cancel,
        }
    }

    /// Create and start a task; returns immediately with its id.
    pub fn spawn(
        &self,
        kind: SubTaskKind,
        goal: String,
        metadata: Option<TaskMetadata>,
    ) -> Result<u64, SchedulerError> {
        let mut tasks = self.tasks.lock().expect("tasks mutex");
        let running = tasks
            .values()
            .filter(|t| t.state.status() == SubTaskStatus::Running)
            .count();
        if running >= self.max_parallel {
            return Err(SchedulerError::CapacityExceeded {
                running,
                max: self.max_parallel,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = self.parent_cancel.child_token();
        let state = TaskState::new();

        tasks.insert(
            id,
            TaskEntry {
                kind,
                goal: goal.clone(),
                metadata,
                cancel: cancel.clone(),
                state: Arc::clone(&state),
                observed: false,
            },
        );
        drop(tasks);

        let deps = Arc::clone(&self.deps);
        tokio::spawn(async move {
            deps.bus
                .emit(EventKind::SubTaskStart {
                    task_id: id,
                    goal: goal.clone(),
                })
                .await;

            let status = match kind {
                SubTaskKind::Runner => run_runner_task(&deps, id, &goal, &state, &cancel).await,
                SubTaskKind::Smart => run_smart_task(&deps, id, &goal, &state, &cancel).await,
            };

            // Terminal frame goes on the bus before waiters wake, so a
            // parent returning from Wait never races its own event.
            deps.bus
                .emit(EventKind::SubTaskComplete {
                    task_id: id,
                    status,
                })
                .await;
            state.finish(status);
            debug!("sub-task {id} finished: {status:?}");
        });

        Ok(id)
    }

    /// Block until the task is terminal; returns status and collected
    /// output, and releases the task slot.
    pub async fn wait(&self, id: u64) -> Result<(SubTaskStatus, String), SchedulerError> {
        let state = {
            let tasks = self.tasks.lock().expect("tasks mutex");
            let entry = tasks.get(&id).ok_or(SchedulerError::UnknownTask(id))?;
            Arc::clone(&entry.state)
        };

        loop {
            let notified = state.done.notified();
            if state.status().is_terminal() {
                break;
            }
            notified.await;
        }

        let status = state.status();
        let output = state.lines().join("\n");
        self.mark_observed(id);
        Ok((status, output))
    }

    /// Non-blocking snapshot of partial output and status.
    pub fn check(&self, id: u64) -> Result<SubTaskSnapshot, SchedulerError> {
        let snapshot = {
            let tasks = self.tasks.lock().expect("tasks mutex");
            let entry = tasks.get(&id).ok_or(SchedulerError::UnknownTask(id))?;
            let snap = SubTaskSnapshot {
                id,
                kind: entry.kind,
                goal: entry.goal.clone(),
                metadata: entry.metadata.clone(),
                status: entry.state.status(),
                output: entry.state.lines(),
                exit_code: *entry.state.exit_code.lock().expect("exit mutex"),
            };
            snap
        };
        if snapshot.status.is_terminal() {
            self.mark_observed(id);
        }
        Ok(snapshot)
    }

    /// Request cooperative cancellation of the task's subtree.
    /// Idempotent; the task settles as Cancelled.
    pub fn kill(&self, id: u64) -> Result<(), SchedulerError> {
        let tasks = self.tasks.lock().expect("tasks mutex");
        let entry = tasks.get(&id).ok_or(SchedulerError::UnknownTask(id))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Ids of tasks still tracked (terminal-but-unobserved included).
    pub fn live_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.tasks.lock().expect("tasks mutex").keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn mark_observed(&self, id: u64) {
        let mut tasks = self.tasks.lock().expect("tasks mutex");
        if let Some(entry) = tasks.get_mut(&id) {
            entry.observed = true;
            if entry.state.status().is_terminal() {
                tasks.remove(&id);
            }
        }
    }
}

/// Execute one command on behalf of a runner task.
async fn run_runner_task(
    deps: &SchedulerDeps,
    id: u64,
    goal: &str,
    state: &Arc<TaskState>,
    cancel: &CancellationToken,
) -> SubTaskStatus {
    let argv = split_command(goal);
    let Some((program, args)) = argv.split_first() else {
        state.push_line("empty command".to_string());
        return SubTaskStatus::Failed;
    };

    let runner = CommandRunner::new();
    let spec = deps.config.tool_spec(program);
    let (mut lines, outcome) = runner.run(cancel.clone(), spec, args.to_vec());

    while let Some(line) = lines.recv().await {
        state.push_line(line.text.clone());
        deps.bus
            .emit(EventKind::SubTaskLog {
                task_id: id,
                line: line.text,
            })
            .await;
    }

    let Ok(outcome) = outcome.await else {
        return SubTaskStatus::Failed;
    };
    *state.exit_code.lock().expect("exit mutex") = Some(outcome.exit_code);

    match outcome.error {
        None => SubTaskStatus::Done,
        Some(RunErrorKind::Cancelled) => SubTaskStatus::Cancelled,
        Some(_) => SubTaskStatus::Failed,
    }
}

/// Bounded inner reasoning loop for a smart task.
///
/// Restricted action set: no spawn_task, no propose, no add_target, no
/// call_mcp. Disallowed actions come back to the inner Brain as an
/// observation instead of executing.
async fn run_smart_task(
    deps: &SchedulerDeps,
    id: u64,
    goal: &str,
    state: &Arc<TaskState>,
    cancel: &CancellationToken,
) -> SubTaskStatus {
    use crate::brain::Action;
    use crate::target::CommandHistoryEntry;

    let runner = CommandRunner::new();
    let mut history: Vec<CommandHistoryEntry> = Vec::new();
    let mut observation: Option<String> = None;

    for turn in 1..=SMART_SUBTASK_MAX_TURNS {
        if cancel.is_cancelled() {
            return SubTaskStatus::Cancelled;
        }

        let input = BrainInput {
            turn,
            target: serde_json::json!({
                "host": deps.host,
                "goal": goal,
                "context": "background sub-task",
            }),
            memory_digest: deps.memory.digest(&deps.host),
            last_command: history.last().map(|h| h.command.clone()),
            last_exit_code: history.last().map(|h| h.exit_code),
            history: history.clone(),
            observation: observation.take(),
            user_message: None,
            recon_queue: None,
        };

        let action = tokio::select! {
            _ = cancel.cancelled() => return SubTaskStatus::Cancelled,
            result = deps.brain.think(&input) => match result {
                Ok(a) => a,
                Err(e) => {
                    state.push_line(format!("brain failure: {e}"));
                    return SubTaskStatus::Failed;
                }
            },
        };

        match action {
            Action::Run { command } => {
                let argv = split_command(&command);
                let Some((program, args)) = argv.split_first() else {
                    observation = Some("empty command".to_string());
                    continue;
                };
                let spec = deps.config.tool_spec(program);
                let started = std::time::Instant::now();
                let (mut lines, outcome) = runner.run(cancel.clone(), spec, args.to_vec());
                while let Some(line) = lines.recv().await {
                    state.push_line(line.text.clone());
                    deps.bus
                        .emit(EventKind::SubTaskLog {
                            task_id: id,
                            line: line.text,
                        })
                        .await;
                }
                let Ok(outcome) = outcome.await else {
                    return SubTaskStatus::Failed;
                };
                *state.exit_code.lock().expect("exit mutex") = Some(outcome.exit_code);
                if outcome.error == Some(RunErrorKind::Cancelled) {
                    return SubTaskStatus::Cancelled;
                }
                history.push(CommandHistoryEntry {
                    command,
                    exit_code: outcome.exit_code,
                    observation: outcome.observation,
                    duration_ms: outcome.duration.as_millis() as u64,
                });
            }
            Action::Think { thought } => {
                state.push_line(format!("[think] {thought}"));
            }
            Action::Memory { record } => {
                deps.memory.record(&deps.host, record);
            }
            Action::Complete { summary } => {
                if !summary.is_empty() {
                    state.push_line(summary);
                }
                return SubTaskStatus::Done;
            }
            other => {
                observation = Some(format!(
                    "action '{}' is not permitted in a sub-task",
                    other.kind()
                ));
            }
        }
    }

    state.push_line("[turn budget exhausted]".to_string());
    SubTaskStatus::Done
}
