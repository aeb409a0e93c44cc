// Team - the target table and the event multiplexer
//
// Owns every loop: spawns one per target, routes operator input and
// approval decisions per target, and multiplexes all loop events onto a
// single bounded stream for the UI. The Team never mutates a target's
// state and never interprets errors; both belong to the owning loop.

pub mod events;
pub mod session_log;

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{LoopContext, LoopMessage, TargetLoop};
use crate::brain::{Brain, LlmBrain, SwitchableBrain};
use crate::config::constants::EVENT_BUS_CAPACITY;
use crate::config::{Config, ProviderEntry, ProviderKind};
use crate::errors::TeamError;
use crate::knowledge::Knowledge;
use crate::mcp::McpBridge;
use crate::memory::MemoryStore;
use crate::target::Target;
use events::{Event, EventBus, EventKind};
use session_log::SessionLog;

static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,62})?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,62})?)*$").unwrap()
});

/// Is this a plausible IPv4/IPv6 address or domain name?
pub fn validate_host(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    if host.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    HOST_RE.is_match(host)
}

/// Requests a loop sends back to its team.
#[derive(Debug)]
pub enum TeamCommand {
    AddTarget {
        host: String,
        reply: oneshot::Sender<Result<u64, TeamError>>,
    },
}

struct TargetHandle {
    id: u64,
    host: String,
    msg_tx: mpsc::Sender<LoopMessage>,
    approve_tx: mpsc::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

struct TeamInner {
    config: Arc<Config>,
    brain: Arc<SwitchableBrain>,
    memory: Arc<MemoryStore>,
    knowledge: Option<Arc<Knowledge>>,
    mcp: Option<Arc<dyn McpBridge>>,
    bus: EventBus,
    targets: Mutex<Vec<TargetHandle>>,
    focused: AtomicU64,
    next_id: AtomicU64,
    cancel: CancellationToken,
    auto_approve: Arc<AtomicBool>,
    team_tx: mpsc::Sender<TeamCommand>,
}

#[derive(Clone)]
pub struct Team {
    inner: Arc<TeamInner>,
}

impl Team {
    /// Build the team and return it with the UI's event stream.
    pub fn new(
        config: Arc<Config>,
        brain: Arc<SwitchableBrain>,
        memory: Arc<MemoryStore>,
        knowledge: Option<Arc<Knowledge>>,
        mcp: Option<Arc<dyn McpBridge>>,
    ) -> anyhow::Result<(Self, mpsc::Receiver<Event>)> {
        let log = match &config.session_dir {
            Some(dir) => Some(Arc::new(SessionLog::new(dir.clone())?)),
            None => None,
        };
        let (bus, events_rx) = EventBus::new(EVENT_BUS_CAPACITY, log);
        let (team_tx, team_rx) = mpsc::channel(16);

        let auto_approve = Arc::new(AtomicBool::new(config.auto_approve));
        let team = Self {
            inner: Arc::new(TeamInner {
                config,
                brain,
                memory,
                knowledge,
                mcp,
                bus,
                targets: Mutex::new(Vec::new()),
                focused: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                auto_approve,
                team_tx,
            }),
        };

        team.spawn_command_pump(team_rx);
        Ok((team, events_rx))
    }

    /// Serve loop-originated requests (the Brain's `add_target`).
    fn spawn_command_pump(&self, mut rx: mpsc::Receiver<TeamCommand>) {
        let team = self.clone();
        tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    _ = team.inner.cancel.cancelled() => break,
                    c = rx.recv() => match c {
                        Some(c) => c,
                        None => break,
                    },
                };
                match command {
                    TeamCommand::AddTarget { host, reply } => {
                        let _ = reply.send(team.add_target(&host).await);
                    }
                }
            }
        });
    }

    /// Create a target and start its loop.
    ///
    /// Hosts are validated and duplicate-suppressed case-insensitively;
    /// the table is untouched on rejection.
    pub async fn add_target(&self, host: &str) -> Result<u64, TeamError> {
        let host = host.trim();
        if !validate_host(host) {
            return Err(TeamError::InvalidHost(host.to_string()));
        }

        let mut targets = self.inner.targets.lock().await;
        if targets.iter().any(|t| t.host.eq_ignore_ascii_case(host)) {
            return Err(TeamError::DuplicateTarget(host.to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (approve_tx, approve_rx) = mpsc::channel(4);
        let cancel = self.inner.cancel.child_token();

        let ctx = LoopContext {
            config: Arc::clone(&self.inner.config),
            brain: self.inner.brain.clone() as Arc<dyn Brain>,
            memory: Arc::clone(&self.inner.memory),
            knowledge: self.inner.knowledge.clone(),
            mcp: self.inner.mcp.clone(),
            bus: self.inner.bus.handle(id),
            team_tx: self.inner.team_tx.clone(),
            auto_approve: Arc::clone(&self.inner.auto_approve),
        };

        let target = Target::new(id, host.to_string());
        let target_loop = TargetLoop::new(target, ctx, msg_rx, approve_rx, cancel);
        let join = tokio::spawn(target_loop.run());

        targets.push(TargetHandle {
            id,
            host: host.to_string(),
            msg_tx,
            approve_tx,
            join: Some(join),
        });
        if targets.len() == 1 {
            self.inner.focused.store(id, Ordering::SeqCst);
        }
        drop(targets);

        self.inner.bus
            .publish(id, EventKind::AddTarget { host: host.to_string() })
            .await;
        info!("target {id} added: {host}");
        Ok(id)
    }

    /// Answer a pending proposal. Unknown ids fall back to the focused
    /// target (legacy UI path).
    pub async fn approve(&self, target_id: u64, decision: bool) -> Result<(), TeamError> {
        let tx = self.route(target_id, |t| t.approve_tx.clone()).await?;
        tx.send(decision)
            .await
            .map_err(|_| TeamError::UnknownTarget(target_id))
    }

    /// Deliver an out-of-band operator instruction to a target.
    pub async fn send_user_message(&self, target_id: u64, text: String) -> Result<(), TeamError> {
        let tx = self.route(target_id, |t| t.msg_tx.clone()).await?;
        tx.send(LoopMessage::User(text))
            .await
            .map_err(|_| TeamError::UnknownTarget(target_id))
    }

    /// Drop a target's recon lock (`/skip-recon`).
    pub async fn skip_recon(&self, target_id: u64) -> Result<(), TeamError> {
        let tx = self.route(target_id, |t| t.msg_tx.clone()).await?;
        tx.send(LoopMessage::SkipRecon)
            .await
            .map_err(|_| TeamError::UnknownTarget(target_id))
    }

    async fn route<T>(
        &self,
        target_id: u64,
        pick: impl Fn(&TargetHandle) -> T,
    ) -> Result<T, TeamError> {
        let targets = self.inner.targets.lock().await;
        if let Some(handle) = targets.iter().find(|t| t.id == target_id) {
            return Ok(pick(handle));
        }
        let focused = self.inner.focused.load(Ordering::SeqCst);
        if focused != target_id {
            if let Some(handle) = targets.iter().find(|t| t.id == focused) {
                warn!("unknown target {target_id}, routing to focused {focused}");
                return Ok(pick(handle));
            }
        }
        Err(TeamError::UnknownTarget(target_id))
    }

    pub fn set_focus(&self, target_id: u64) {
        self.inner.focused.store(target_id, Ordering::SeqCst);
    }

    pub fn focused(&self) -> u64 {
        self.inner.focused.load(Ordering::SeqCst)
    }

    pub fn set_auto_approve(&self, enabled: bool) {
        self.inner.auto_approve.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_approve(&self) -> bool {
        self.inner.auto_approve.load(Ordering::SeqCst)
    }

    /// The Brain seam, for host extraction from free text.
    pub fn brain(&self) -> Arc<dyn Brain> {
        self.inner.brain.clone() as Arc<dyn Brain>
    }

    /// Switch the Brain's provider/model mid-session. API keys come from
    /// the environment for the new provider.
    pub fn switch_model(&self, kind: ProviderKind, model: String) -> anyhow::Result<()> {
        let var = match kind {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Openai => "OPENAI_API_KEY",
        };
        let entry = ProviderEntry {
            kind,
            model: model.clone(),
            api_key: std::env::var(var).ok().filter(|k| !k.is_empty()),
            base_url: None,
        };
        let provider = crate::providers::create_provider(&entry)?;
        self.inner
            .brain
            .swap(Arc::new(LlmBrain::new(provider, model)));
        Ok(())
    }

    /// Cancel every loop and wait for them to settle, bounded by the
    /// deadline. After return the loops have stopped producing events
    /// (stragglers past the deadline are abandoned).
    pub async fn shutdown(&self, deadline: Duration) {
        self.inner.cancel.cancel();

        let handles: Vec<(u64, JoinHandle<()>)> = {
            let mut targets = self.inner.targets.lock().await;
            targets
                .iter_mut()
                .filter_map(|t| t.join.take().map(|j| (t.id, j)))
                .collect()
        };

        let drain = async {
            for (id, join) in handles {
                if let Err(e) = join.await {
                    warn!("loop for target {id} panicked: {e}");
                }
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("shutdown deadline passed with loops still settling");
        }
        info!("team shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_host_accepts_ips_and_domains() {
        assert!(validate_host("10.0.0.5"));
        assert!(validate_host("::1"));
        assert!(validate_host("eighteen.htb"));
        assert!(validate_host("sub.domain.example.com"));
        assert!(validate_host("localhost"));
    }

    #[test]
    fn test_validate_host_rejects_junk() {
        assert!(!validate_host(""));
        assert!(!validate_host("not a host"));
        assert!(!validate_host("-leading.dash"));
        assert!(!validate_host("http://10.0.0.5"));
        assert!(!validate_host(&"a".repeat(300)));
    }
}
