// Shared harness for the end-to-end scenarios
//
// A scripted Brain replays a fixed action sequence and records every
// snapshot it was shown, so tests can assert on both the emitted events
// and the observations fed back into the next turn.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio::time::timeout;

use pentecter::brain::{Action, Brain, BrainInput, HostExtraction, SwitchableBrain};
use pentecter::config::Config;
use pentecter::errors::BrainError;
use pentecter::memory::MemoryStore;
use pentecter::team::events::{Event, EventKind};
use pentecter::team::Team;

/// Brain that replays a fixed script and falls back to `complete`.
pub struct ScriptedBrain {
    actions: Mutex<VecDeque<Action>>,
    inputs: Mutex<Vec<BrainInput>>,
}

impl ScriptedBrain {
    pub fn new(actions: Vec<Action>) -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(actions.into()),
            inputs: Mutex::new(Vec::new()),
        })
    }

    /// Every snapshot the loop composed, in order.
    pub fn seen_inputs(&self) -> Vec<BrainInput> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Brain for ScriptedBrain {
    async fn think(&self, input: &BrainInput) -> Result<Action, BrainError> {
        self.inputs.lock().unwrap().push(input.clone());
        Ok(self
            .actions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Action::Complete {
                summary: "script exhausted".to_string(),
            }))
    }

    async fn extract_target(&self, _text: &str) -> Result<HostExtraction, BrainError> {
        Err(BrainError::Fatal("not scripted".to_string()))
    }
}

/// Fake tool binaries on PATH, created once per test binary.
///
/// `nmap` prints two open service lines; everything else the tests run
/// (`printf`, `true`, `sleep`) is real.
static FAKE_BIN: Lazy<tempfile::TempDir> = Lazy::new(|| {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("fake bin dir");
    let nmap = dir.path().join("nmap");
    std::fs::write(
        &nmap,
        "#!/bin/sh\nprintf '22/tcp open ssh\\n80/tcp open http\\n'\n",
    )
    .expect("write fake nmap");
    std::fs::set_permissions(&nmap, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake nmap");

    let old = std::env::var("PATH").unwrap_or_default();
    std::env::set_var("PATH", format!("{}:{old}", dir.path().display()));
    dir
});

/// Build a team around a scripted brain. Auto-approve defaults on so
/// `run` actions execute without an operator in the loop.
pub fn build_team(
    mut config: Config,
    actions: Vec<Action>,
) -> (Team, mpsc::Receiver<Event>, Arc<MemoryStore>, Arc<ScriptedBrain>) {
    Lazy::force(&FAKE_BIN);
    config.auto_approve = true;

    let scripted = ScriptedBrain::new(actions);
    let brain = Arc::new(SwitchableBrain::new(scripted.clone() as Arc<dyn Brain>));
    let memory = Arc::new(MemoryStore::new());
    let (team, events) = Team::new(Arc::new(config), brain, Arc::clone(&memory), None, None)
        .expect("team");
    (team, events, memory, scripted)
}

/// Collect events until one matches (inclusive) or the deadline passes.
pub async fn events_until(
    rx: &mut mpsc::Receiver<Event>,
    deadline: Duration,
    mut stop: impl FnMut(&EventKind) -> bool,
) -> Vec<Event> {
    let mut collected = Vec::new();
    let _ = timeout(deadline, async {
        while let Some(event) = rx.recv().await {
            let done = stop(&event.kind);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}

/// Count events of one shape.
pub fn count(events: &[Event], pred: impl Fn(&EventKind) -> bool) -> usize {
    events.iter().filter(|e| pred(&e.kind)).count()
}
