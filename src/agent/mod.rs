// Per-target reasoning loop
//
// Drives one target through the Brain-Action-Observation cycle and owns
// every piece of its observable state. The Team creates the loop and
// routes operator input to it; nothing else touches the target.

mod stall;

pub use stall::StallDetector;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::brain::{prompt, Action, Brain, BrainInput};
use crate::config::constants::RECON_BATCH_SIZE;
use crate::config::Config;
use crate::errors::{BrainError, RunErrorKind};
use crate::knowledge::Knowledge;
use crate::mcp::McpBridge;
use crate::memory::{MemoryRecord, MemoryStore};
use crate::recon::parsers::{parse_curl, parse_ffuf, parse_nmap};
use crate::recon::{ReconTask, ReconTree};
use crate::runner::{split_command, CommandRunner, RunOutcome};
use crate::subtask::{Scheduler, SchedulerDeps};
use crate::target::{
    CommandHistoryEntry, DisplayBlock, Proposal, Target, TargetStatus,
};
use crate::team::events::{BusHandle, EventKind};
use crate::team::TeamCommand;

/// Out-of-band operator input routed by the Team.
#[derive(Debug)]
pub enum LoopMessage {
    /// Free-text instruction; queued until the next turn, and the wake
    /// signal while the loop is stalled.
    User(String),
    /// Drop the recon lock (`/skip-recon`).
    SkipRecon,
}

/// How a dispatched action leaves the turn.
#[derive(Debug, PartialEq)]
enum TurnFlow {
    /// Turn over; start the next one.
    Continue,
    /// Side effect only (memory): call the Brain again within this turn.
    Rethink,
    /// The loop is done.
    Finished,
}

/// Everything a loop needs besides its channels.
pub struct LoopContext {
    pub config: Arc<Config>,
    pub brain: Arc<dyn Brain>,
    pub memory: Arc<MemoryStore>,
    pub knowledge: Option<Arc<Knowledge>>,
    pub mcp: Option<Arc<dyn McpBridge>>,
    pub bus: BusHandle,
    pub team_tx: mpsc::Sender<TeamCommand>,
    pub auto_approve: Arc<AtomicBool>,
}

pub struct TargetLoop {
    target: Target,
    ctx: LoopContext,
    scheduler: Scheduler,
    runner: CommandRunner,
    msg_rx: mpsc::Receiver<LoopMessage>,
    approve_rx: mpsc::Receiver<bool>,
    cancel: CancellationToken,
    stall: StallDetector,
    turn: u32,
    malformed_strikes: u32,
    queued_user: std::collections::VecDeque<String>,
    pending_observation: Option<String>,
    recon_outstanding: Vec<ReconTask>,
}

impl TargetLoop {
    pub fn new(
        target: Target,
        ctx: LoopContext,
        msg_rx: mpsc::Receiver<LoopMessage>,
        approve_rx: mpsc::Receiver<bool>,
        cancel: CancellationToken,
    ) -> Self {
        let scheduler = Scheduler::new(
            SchedulerDeps {
                config: Arc::clone(&ctx.config),
                brain: Arc::clone(&ctx.brain),
                memory: Arc::clone(&ctx.memory),
                bus: ctx.bus.clone(),
                host: target.host.clone(),
            },
            cancel.clone(),
        );
        Self {
            target,
            ctx,
            scheduler,
            runner: CommandRunner::new(),
            msg_rx,
            approve_rx,
            cancel,
            stall: StallDetector::new(),
            turn: 0,
            malformed_strikes: 0,
            queued_user: std::collections::VecDeque::new(),
            pending_observation: None,
            recon_outstanding: Vec::new(),
        }
    }

    /// Run until cancelled or the Brain completes the target.
    pub async fn run(mut self) {
        info!("loop started for target {} ({})", self.target.id, self.target.host);
        self.target.status = TargetStatus::Scanning;

        loop {
            if self.cancel.is_cancelled() {
                self.finish(false, "session cancelled").await;
                return;
            }

            self.turn += 1;
            self.pump_messages();
            self.ctx.bus.emit(EventKind::TurnStart { turn: self.turn }).await;

            let mut rethinks = 0;
            let flow = loop {
                let input = self.compose_input();
                let action = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.finish(false, "session cancelled").await;
                        return;
                    }
                    result = Self::think(
                        &*self.ctx.brain,
                        &self.ctx.bus,
                        &mut self.target,
                        &mut self.malformed_strikes,
                        &input,
                    ) => match result {
                        Ok(action) => action,
                        Err(e) => {
                            self.ctx.bus
                                .emit(EventKind::Error { message: e.to_string() })
                                .await;
                            self.finish(false, &format!("brain failed: {e}")).await;
                            return;
                        }
                    }
                };

                debug!("target {} turn {}: {}", self.target.id, self.turn, action.kind());
                match self.dispatch(action).await {
                    TurnFlow::Rethink if rethinks < 3 => {
                        rethinks += 1;
                        continue;
                    }
                    TurnFlow::Rethink => break TurnFlow::Continue,
                    flow => break flow,
                }
            };

            if flow == TurnFlow::Finished {
                return;
            }
        }
    }

    // Turn 1 of the cycle: emit the thinking frames around the Brain call.
    // An associated fn (not a method) so the select! above can hold the
    // rest of `self` apart from it.
    async fn think(
        brain: &dyn Brain,
        bus: &BusHandle,
        target: &mut Target,
        malformed_strikes: &mut u32,
        input: &BrainInput,
    ) -> Result<Action, BrainError> {
        bus.emit(EventKind::ThinkStart).await;
        target.push_block(DisplayBlock::Thinking {
            completed: false,
            duration_ms: None,
        });
        let started = Instant::now();

        let result = loop {
            match brain.think(input).await {
                Ok(action) => {
                    *malformed_strikes = 0;
                    break Ok(action);
                }
                Err(BrainError::MalformedAction(msg)) => {
                    *malformed_strikes += 1;
                    if *malformed_strikes >= 2 {
                        break Err(BrainError::Fatal(format!(
                            "malformed action twice in a row: {msg}"
                        )));
                    }
                    warn!("malformed action, asking again: {msg}");
                    continue;
                }
                Err(e) => break Err(e),
            }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        target.complete_last_thinking(elapsed);
        bus.emit(EventKind::ThinkDone { duration_ms: elapsed }).await;
        result
    }

    /// Drain routed operator messages without blocking.
    fn pump_messages(&mut self) {
        while let Ok(msg) = self.msg_rx.try_recv() {
            match msg {
                LoopMessage::User(text) => {
                    self.target.push_block(DisplayBlock::UserInput { text: text.clone() });
                    self.queued_user.push_back(text);
                }
                LoopMessage::SkipRecon => {
                    if let Some(tree) = &self.target.recon {
                        tree.unlock();
                    }
                    self.target.push_block(DisplayBlock::System {
                        text: "recon queue unlocked by operator".to_string(),
                    });
                }
            }
        }
    }

    fn compose_input(&mut self) -> BrainInput {
        // Prune recon tasks completed since the last turn, then top the
        // queue back up while the tree is locked (or on the first look).
        let recon_queue = self.target.recon.as_ref().and_then(|tree| {
            let inject = self.turn == 1 || (tree.is_locked() && tree.has_pending());
            if !inject {
                return None;
            }
            let batch = tree.next_batch(RECON_BATCH_SIZE);
            self.recon_outstanding.extend(batch);
            if self.recon_outstanding.is_empty() {
                return None;
            }
            Some(prompt::render_recon_queue(&self.recon_outstanding))
        });

        let last = self.target.last_history();
        BrainInput {
            turn: self.turn,
            target: self.target.snapshot_json(),
            memory_digest: self.ctx.memory.digest(&self.target.host),
            last_command: last.map(|h| h.command.clone()),
            last_exit_code: last.map(|h| h.exit_code),
            history: self.target.history_tail().into_iter().cloned().collect(),
            observation: self.pending_observation.take(),
            user_message: self.queued_user.pop_front(),
            recon_queue,
        }
    }

    async fn dispatch(&mut self, action: Action) -> TurnFlow {
        match action {
            Action::Run { command } => {
                let argv = split_command(&command);
                let Some(program) = argv.first() else {
                    self.pending_observation = Some("empty command".to_string());
                    return TurnFlow::Continue;
                };
                let spec = self.ctx.config.tool_spec(program);
                if self.ctx.auto_approve.load(Ordering::Relaxed) || spec.safe {
                    self.execute(&command).await
                } else {
                    self.gate(command, String::from("tool requires approval")).await
                }
            }

            Action::Propose { command, reason } => {
                // Hard invariant: no proposals while the recon queue is
                // locked; the Brain hears about it as an observation.
                let locked = self
                    .target
                    .recon
                    .as_ref()
                    .map(|t| t.is_locked() && t.has_pending())
                    .unwrap_or(false);
                if locked {
                    self.target.push_block(DisplayBlock::System {
                        text: "proposal rejected: reconnaissance queue is not drained".into(),
                    });
                    self.pending_observation = Some(
                        "proposal rejected: finish the recon queue (or the operator must /skip-recon) first"
                            .to_string(),
                    );
                    return TurnFlow::Continue;
                }
                self.gate(command, reason).await
            }

            Action::Think { thought } => {
                self.target.push_block(DisplayBlock::AiMessage { text: thought.clone() });
                self.ctx.bus.emit(EventKind::Log { message: thought }).await;
                TurnFlow::Continue
            }

            Action::Complete { summary } => {
                self.finish(true, &summary).await;
                TurnFlow::Finished
            }

            Action::Memory { record } => {
                self.target.push_block(DisplayBlock::Memory {
                    title: record.title.clone(),
                    severity: record.severity.clone(),
                });
                let fresh = self.ctx.memory.record(&self.target.host, record);
                self.pending_observation = Some(if fresh {
                    "finding recorded".to_string()
                } else {
                    "finding already recorded".to_string()
                });
                TurnFlow::Rethink
            }

            Action::AddTarget { host } => {
                let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
                let sent = self
                    .ctx
                    .team_tx
                    .send(TeamCommand::AddTarget { host: host.clone(), reply: reply_tx })
                    .await;
                self.pending_observation = Some(match sent {
                    Ok(()) => match reply_rx.await {
                        Ok(Ok(id)) => format!("target {host} added with id {id}"),
                        Ok(Err(e)) => e.to_string(),
                        Err(_) => "team did not answer".to_string(),
                    },
                    Err(_) => "team is shutting down".to_string(),
                });
                TurnFlow::Continue
            }

            Action::CallMcp { server, tool, args } => {
                let Some(bridge) = self.ctx.mcp.clone() else {
                    self.pending_observation = Some("no MCP servers configured".to_string());
                    return TurnFlow::Continue;
                };
                match bridge.call(&server, &tool, args).await {
                    Ok(output) => {
                        self.pending_observation = Some(output);
                    }
                    Err(e) => {
                        let message = format!("MCP call {server}/{tool} failed: {e:#}");
                        self.ctx.bus.emit(EventKind::Error { message: message.clone() }).await;
                        self.pending_observation = Some(message);
                    }
                }
                TurnFlow::Continue
            }

            Action::SpawnTask { kind, goal, metadata } => {
                match self.scheduler.spawn(kind, goal.clone(), metadata) {
                    Ok(id) => {
                        self.target.push_block(DisplayBlock::SubTask {
                            task_id: id,
                            goal,
                            completed: false,
                            duration_ms: None,
                        });
                        self.pending_observation = Some(format!("sub-task {id} started"));
                    }
                    Err(e) => {
                        // Capacity rejection is an observation, not an event.
                        self.pending_observation = Some(e.to_string());
                    }
                }
                TurnFlow::Continue
            }

            Action::Wait { task_id } => {
                let result = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.finish(false, "session cancelled").await;
                        return TurnFlow::Finished;
                    }
                    r = self.scheduler.wait(task_id) => r,
                };
                self.pending_observation = Some(match result {
                    Ok((status, output)) => {
                        self.target.complete_subtask_block(task_id, None);
                        format!("sub-task {task_id} finished ({status:?}):\n{output}")
                    }
                    Err(e) => e.to_string(),
                });
                TurnFlow::Continue
            }

            Action::CheckTask { task_id } => {
                self.pending_observation = Some(match self.scheduler.check(task_id) {
                    Ok(snap) => {
                        if snap.status.is_terminal() {
                            self.target.complete_subtask_block(task_id, None);
                        }
                        format!(
                            "sub-task {task_id} is {:?}; recent output:\n{}",
                            snap.status,
                            snap.output.join("\n")
                        )
                    }
                    Err(e) => e.to_string(),
                });
                TurnFlow::Continue
            }

            Action::KillTask { task_id } => {
                self.pending_observation = Some(match self.scheduler.kill(task_id) {
                    Ok(()) => format!("sub-task {task_id} cancellation requested"),
                    Err(e) => e.to_string(),
                });
                TurnFlow::Continue
            }

            Action::SearchKnowledge { query } => {
                self.pending_observation = Some(match &self.ctx.knowledge {
                    Some(kb) => kb.search(&query),
                    None => "no knowledge base configured".to_string(),
                });
                TurnFlow::Continue
            }

            Action::ReadKnowledge { path } => {
                self.pending_observation = Some(match &self.ctx.knowledge {
                    Some(kb) => match kb.read(&path) {
                        Ok(text) => text,
                        Err(e) => format!("cannot read note: {e:#}"),
                    },
                    None => "no knowledge base configured".to_string(),
                });
                TurnFlow::Continue
            }
        }
    }

    /// Publish a proposal, pause, and block for the operator's decision.
    async fn gate(&mut self, command: String, reason: String) -> TurnFlow {
        let argv = split_command(&command);
        let (tool, args) = match argv.split_first() {
            Some((t, a)) => (t.clone(), a.to_vec()),
            None => {
                self.pending_observation = Some("empty command".to_string());
                return TurnFlow::Continue;
            }
        };

        let proposal = Proposal {
            description: if reason.is_empty() { command.clone() } else { reason },
            tool,
            args,
        };
        self.target.proposal = Some(proposal.clone());
        self.target.status = TargetStatus::Paused;
        self.ctx.bus.emit(EventKind::Proposal { proposal }).await;

        let decision = tokio::select! {
            _ = self.cancel.cancelled() => None,
            d = self.approve_rx.recv() => d,
        };
        self.target.proposal = None;

        match decision {
            Some(true) => {
                self.target.push_block(DisplayBlock::System {
                    text: format!("operator approved: {command}"),
                });
                self.execute(&command).await
            }
            Some(false) => {
                self.target.status = TargetStatus::Idle;
                self.target.push_block(DisplayBlock::System {
                    text: format!("operator rejected: {command}"),
                });
                self.target.record_history(CommandHistoryEntry {
                    command,
                    exit_code: -1,
                    observation: "rejected by operator".to_string(),
                    duration_ms: 0,
                });
                TurnFlow::Continue
            }
            None => {
                self.finish(false, "session cancelled").await;
                TurnFlow::Finished
            }
        }
    }

    /// Run one command to completion, streaming its output.
    async fn execute(&mut self, command: &str) -> TurnFlow {
        let argv = split_command(command);
        let Some((program, args)) = argv.split_first() else {
            self.pending_observation = Some("empty command".to_string());
            return TurnFlow::Continue;
        };
        let spec = self.ctx.config.tool_spec(program);

        self.target.status = TargetStatus::Running;
        self.target.push_block(DisplayBlock::Command {
            command: command.to_string(),
            lines: Vec::new(),
            completed: false,
            exit_code: None,
            duration_ms: None,
        });
        self.ctx.bus
            .emit(EventKind::CmdStart { command: command.to_string() })
            .await;

        let (mut lines, outcome_rx) =
            self.runner
                .run(self.cancel.child_token(), spec, args.to_vec());

        while let Some(line) = lines.recv().await {
            self.target.append_command_line(&line.text);
            self.ctx.bus.emit(EventKind::CmdOutput { line: line.text }).await;
        }

        let outcome = match outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => RunOutcome {
                exit_code: -1,
                observation: "runner vanished".to_string(),
                duration: std::time::Duration::ZERO,
                entities: Vec::new(),
                error: Some(RunErrorKind::Io),
            },
        };

        let duration_ms = outcome.duration.as_millis() as u64;
        self.target.complete_last_command(outcome.exit_code, duration_ms);
        self.ctx.bus
            .emit(EventKind::CmdDone {
                exit_code: outcome.exit_code,
                duration_ms,
            })
            .await;

        self.target.absorb_entities(&outcome.entities);
        self.target.record_history(CommandHistoryEntry {
            command: command.to_string(),
            exit_code: outcome.exit_code,
            observation: outcome.observation.clone(),
            duration_ms,
        });

        match outcome.error {
            Some(RunErrorKind::NotFound)
            | Some(RunErrorKind::SpawnFailed)
            | Some(RunErrorKind::Io) => {
                // Local failure: report, go Idle, let the Brain adjust.
                self.target.push_block(DisplayBlock::System {
                    text: outcome.observation.clone(),
                });
                self.target.status = TargetStatus::Idle;
                return TurnFlow::Continue;
            }
            Some(RunErrorKind::Cancelled) => {
                // The cancel is ours or above us; the top of the loop
                // settles the target.
                return TurnFlow::Continue;
            }
            Some(RunErrorKind::Timeout) | None => {}
        }

        self.observe(command, &outcome);

        if let Some(reason) = self.stall.record(command, &outcome.observation) {
            self.ctx.bus.emit(EventKind::Stalled { reason: reason.clone() }).await;
            self.target.push_block(DisplayBlock::System {
                text: format!("stalled: {reason}"),
            });
            return self.wait_for_operator().await;
        }

        TurnFlow::Continue
    }

    /// Feed a finished command into the recon tree and the memory store.
    fn observe(&mut self, command: &str, outcome: &RunOutcome) {
        let tool = command.split_whitespace().next().unwrap_or("");

        match tool {
            "nmap" | "masscan" => {
                let findings = parse_nmap(&outcome.observation);
                if findings.is_empty() {
                    return;
                }
                if self.target.recon.is_none()
                    && findings.iter().any(|f| crate::recon::is_http_service(&f.service))
                {
                    self.target.recon = Some(ReconTree::new(
                        &self.target.host,
                        self.ctx.config.recon_max_parallel,
                    ));
                }
                for f in &findings {
                    if let Some(tree) = &self.target.recon {
                        tree.add_port(f.port, &f.service, &f.banner);
                    }
                    self.ctx.memory.record(
                        &self.target.host,
                        MemoryRecord {
                            kind: "service".to_string(),
                            title: format!("{}/{} {}", f.port, f.proto, f.service),
                            description: f.banner.clone(),
                            severity: "info".to_string(),
                        },
                    );
                }
            }
            "ffuf" | "gobuster" => {
                let findings = parse_ffuf(&outcome.observation);
                let port = port_in_command(command);
                if let Some(tree) = &self.target.recon {
                    for (_status, path) in &findings.endpoints {
                        tree.add_endpoint(port, path);
                    }
                    for vhost in &findings.vhosts {
                        tree.add_vhost(vhost);
                    }
                }
                for param in &findings.params {
                    self.ctx.memory.record(
                        &self.target.host,
                        MemoryRecord {
                            kind: "note".to_string(),
                            title: format!("parameter '{param}' accepted"),
                            description: format!("found via {command}"),
                            severity: "info".to_string(),
                        },
                    );
                }
            }
            "curl" => {
                if let Some(profile) = parse_curl(&outcome.observation) {
                    self.ctx.memory.record(
                        &self.target.host,
                        MemoryRecord {
                            kind: "http-profile".to_string(),
                            title: format!("HTTP {} from {}", profile.status, command),
                            description: profile.headers.join("; "),
                            severity: "info".to_string(),
                        },
                    );
                }
            }
            _ => {}
        }

        if let Some(tree) = &self.target.recon {
            let completed = tree.complete_matching(command);
            if completed > 0 {
                self.recon_outstanding
                    .retain(|t| tree.task_status(t.node, t.kind) != crate::recon::ReconTaskStatus::Complete);
            }
        }
    }

    /// Stalled: suspend until the operator says something.
    async fn wait_for_operator(&mut self) -> TurnFlow {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => None,
                m = self.msg_rx.recv() => m,
            };
            match msg {
                Some(LoopMessage::User(text)) => {
                    self.target.push_block(DisplayBlock::UserInput { text: text.clone() });
                    self.queued_user.push_back(text);
                    return TurnFlow::Continue;
                }
                Some(LoopMessage::SkipRecon) => {
                    if let Some(tree) = &self.target.recon {
                        tree.unlock();
                    }
                    // still waiting for guidance
                }
                None => {
                    self.finish(false, "session cancelled").await;
                    return TurnFlow::Finished;
                }
            }
        }
    }

    /// Settle the target. A Brain-completed target is Pwned; a cancelled
    /// or failed one is Failed. The distinction rides on the event, not
    /// on UI guesswork.
    async fn finish(&mut self, success: bool, summary: &str) {
        // Let cancelled sub-tasks settle so their terminal events land
        // before the final Complete.
        for id in self.scheduler.live_ids() {
            let _ = tokio::time::timeout(
                std::time::Duration::from_secs(3),
                self.scheduler.wait(id),
            )
            .await;
        }

        self.target.status = if success {
            TargetStatus::Pwned
        } else {
            TargetStatus::Failed
        };
        self.ctx.bus
            .emit(EventKind::Complete {
                success,
                summary: summary.to_string(),
            })
            .await;
        info!(
            "loop for target {} settled: {:?}",
            self.target.id, self.target.status
        );
    }
}

/// Pull the port out of a fuzzing command's URL ("http://host:8080/...").
fn port_in_command(command: &str) -> u16 {
    let Some(scheme) = command.find("://") else {
        return 80;
    };
    let authority: String = command[scheme + 3..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '/')
        .collect();
    authority
        .rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_in_command() {
        assert_eq!(port_in_command("ffuf -u http://10.0.0.5:8080/FUZZ -w w"), 8080);
        assert_eq!(port_in_command("ffuf -u http://10.0.0.5/FUZZ -w w"), 80);
        assert_eq!(port_in_command("gobuster dir -u 10.0.0.5"), 80);
    }
}
