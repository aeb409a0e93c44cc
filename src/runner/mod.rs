// Streaming subprocess runner
//
// Executes exactly one subprocess per call: output is delivered as a
// bounded line stream, the terminal outcome as a oneshot record. The line
// stream always closes before the outcome is sent, so consumers may drain
// lines first and then read the result.
//
// Tools are invoked by argv, never through a shell, and stdin is closed.

mod extract;
mod truncate;

pub use extract::{extract_entities, Entity};
pub use truncate::head_tail;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::constants::{KILL_GRACE_MS, LINE_STREAM_CAPACITY};
use crate::config::ToolSpec;
use crate::errors::{RunErrorKind, EXIT_CODE_CANCELLED, EXIT_CODE_TIMEOUT};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One tagged output line with a monotonically increasing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamSource,
    pub index: u64,
    pub text: String,
}

/// Terminal record of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    /// Head/tail-truncated combined output, per the tool's policy.
    pub observation: String,
    pub duration: Duration,
    pub entities: Vec<Entity>,
    pub error: Option<RunErrorKind>,
}

/// Split an operator- or Brain-supplied command line into argv.
///
/// Understands single and double quotes; performs no other shell
/// interpretation (no globs, no variables, no redirection).
pub fn split_command(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut seen_any = false;

    for c in command.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    seen_any = true;
                }
                c if c.is_whitespace() => {
                    if seen_any || !current.is_empty() {
                        args.push(std::mem::take(&mut current));
                        seen_any = false;
                    }
                }
                _ => {
                    current.push(c);
                    seen_any = true;
                }
            },
        }
    }
    if seen_any || !current.is_empty() {
        args.push(current);
    }
    args
}

/// Resolve an executable name against PATH (or verify an explicit path).
fn resolve_binary(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let p = Path::new(name);
        return p.is_file().then(|| p.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Executes one subprocess per `run` call and streams its output.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    grace: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            grace: Duration::from_millis(KILL_GRACE_MS),
        }
    }

    #[cfg(test)]
    pub fn with_grace(grace: Duration) -> Self {
        Self { grace }
    }

    /// Start `spec.name args...` and return the line stream plus the
    /// outcome channel. Returns immediately; the subprocess runs in a
    /// spawned task bounded by the tool's timeout and by `cancel`.
    pub fn run(
        &self,
        cancel: CancellationToken,
        spec: ToolSpec,
        args: Vec<String>,
    ) -> (mpsc::Receiver<OutputLine>, oneshot::Receiver<RunOutcome>) {
        let (line_tx, line_rx) = mpsc::channel(LINE_STREAM_CAPACITY);
        let (out_tx, out_rx) = oneshot::channel();
        let grace = self.grace;

        tokio::spawn(async move {
            let outcome = run_inner(cancel, spec, args, line_tx, grace).await;
            let _ = out_tx.send(outcome);
        });

        (line_rx, out_rx)
    }
}

async fn run_inner(
    cancel: CancellationToken,
    spec: ToolSpec,
    args: Vec<String>,
    line_tx: mpsc::Sender<OutputLine>,
    grace: Duration,
) -> RunOutcome {
    let started = Instant::now();

    let failure = |kind: RunErrorKind, message: String, started: Instant| RunOutcome {
        exit_code: -1,
        observation: message,
        duration: started.elapsed(),
        entities: Vec::new(),
        error: Some(kind),
    };

    let Some(program) = resolve_binary(&spec.name) else {
        drop(line_tx);
        return failure(
            RunErrorKind::NotFound,
            format!("{}: command not found on PATH", spec.name),
            started,
        );
    };

    let mut child = match Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            drop(line_tx);
            return failure(
                RunErrorKind::SpawnFailed,
                format!("failed to spawn {}: {e}", spec.name),
                started,
            );
        }
    };

    let pid = child.id();
    let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let index = Arc::new(AtomicU64::new(0));

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    let stdout_pump = tokio::spawn(pump(
        stdout,
        StreamSource::Stdout,
        line_tx.clone(),
        Arc::clone(&captured),
        Arc::clone(&index),
    ));
    let stderr_pump = tokio::spawn(pump(
        stderr,
        StreamSource::Stderr,
        line_tx.clone(),
        Arc::clone(&captured),
        Arc::clone(&index),
    ));
    drop(line_tx);

    let timeout = tokio::time::sleep(Duration::from_secs(spec.timeout_secs));
    tokio::pin!(timeout);

    let (exit_code, error) = tokio::select! {
        status = child.wait() => match status {
            Ok(s) => (s.code().unwrap_or(-1), None),
            Err(e) => {
                debug!("wait on {} failed: {e}", spec.name);
                (-1, Some(RunErrorKind::Io))
            }
        },
        _ = cancel.cancelled() => {
            terminate(&mut child, pid, grace).await;
            (EXIT_CODE_CANCELLED, Some(RunErrorKind::Cancelled))
        }
        _ = &mut timeout => {
            terminate(&mut child, pid, grace).await;
            (EXIT_CODE_TIMEOUT, Some(RunErrorKind::Timeout))
        }
    };

    // The pumps end at pipe EOF. Bound the wait so a consumer that stopped
    // draining after a kill cannot wedge the outcome; aborting the pumps
    // drops their stream senders, which closes the line stream.
    let mut stdout_pump = stdout_pump;
    let mut stderr_pump = stderr_pump;
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = (&mut stdout_pump).await;
        let _ = (&mut stderr_pump).await;
    })
    .await;
    if drained.is_err() {
        debug!("{}: output pumps aborted after kill", spec.name);
        stdout_pump.abort();
        stderr_pump.abort();
    }

    let lines = captured.lock().expect("capture mutex").clone();
    RunOutcome {
        exit_code,
        observation: head_tail(&lines, spec.head_lines, spec.tail_lines),
        duration: started.elapsed(),
        entities: extract_entities(&lines),
        error,
    }
}

/// Read one pipe to EOF, capturing every line and forwarding it to the
/// consumer stream while the receiver is still attached.
async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    stream: StreamSource,
    tx: mpsc::Sender<OutputLine>,
    captured: Arc<Mutex<Vec<String>>>,
    index: Arc<AtomicU64>,
) {
    let mut lines = BufReader::new(reader).lines();
    let mut forwarding = true;
    while let Ok(Some(text)) = lines.next_line().await {
        let idx = index.fetch_add(1, Ordering::SeqCst);
        captured.lock().expect("capture mutex").push(text.clone());
        if forwarding
            && tx
                .send(OutputLine {
                    stream,
                    index: idx,
                    text,
                })
                .await
                .is_err()
        {
            forwarding = false;
        }
    }
}

/// Interrupt, wait out the grace window, then kill.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
    }
    #[cfg(not(unix))]
    let _ = pid;

    let graceful = tokio::time::timeout(grace, child.wait()).await;
    if graceful.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}
