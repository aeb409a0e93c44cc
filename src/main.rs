// Pentecter - interactive LLM-driven assistant for authorized
// penetration testing.
//
// This binary is the headless operator front end: it prints the event
// stream and forwards operator commands to the core. A richer terminal
// renderer can replace it by consuming the same Team contract.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use pentecter::brain::{Brain, LlmBrain, SwitchableBrain};
use pentecter::config::{load_config, ProviderKind};
use pentecter::knowledge::Knowledge;
use pentecter::logging;
use pentecter::mcp::{McpBridge, McpRouter};
use pentecter::memory::MemoryStore;
use pentecter::providers::create_provider;
use pentecter::team::events::{Event, EventKind};
use pentecter::team::Team;

#[derive(Parser)]
#[command(name = "pentecter", version, about = "LLM-driven assistant for authorized penetration testing")]
struct Cli {
    /// Hosts to assess immediately
    targets: Vec<String>,

    /// Execute every command without asking for approval
    #[arg(long)]
    auto_approve: bool,

    /// Model override for the configured provider
    #[arg(long)]
    model: Option<String>,

    /// Directory of technique notes
    #[arg(long)]
    knowledge_dir: Option<PathBuf>,

    /// Directory for session logs and memory persistence
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = load_config()?;
    if cli.auto_approve {
        config.auto_approve = true;
    }
    if let Some(model) = cli.model {
        config.provider.model = model;
    }
    if cli.knowledge_dir.is_some() {
        config.knowledge_dir = cli.knowledge_dir;
    }
    if cli.session_dir.is_some() {
        config.session_dir = cli.session_dir;
    }
    let config = Arc::new(config);

    let provider = create_provider(&config.provider)?;
    let brain = Arc::new(SwitchableBrain::new(Arc::new(LlmBrain::new(
        provider,
        config.provider.model.clone(),
    ))));
    let memory = Arc::new(match &config.session_dir {
        Some(dir) => MemoryStore::with_sink(dir.clone()),
        None => MemoryStore::new(),
    });
    let knowledge = match &config.knowledge_dir {
        Some(dir) => Some(Arc::new(Knowledge::load(dir)?)),
        None => None,
    };
    let mcp: Option<Arc<dyn McpBridge>> = if config.mcp_servers.is_empty() {
        None
    } else {
        Some(Arc::new(McpRouter::from_config(&config.mcp_servers).await?))
    };

    let (team, mut events) = Team::new(config, brain, memory, knowledge, mcp)?;

    for host in &cli.targets {
        if let Err(e) = team.add_target(host).await {
            eprintln!("cannot add {host}: {e}");
        }
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let stdin_team = team.clone();
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if handle_operator_line(&stdin_team, line.trim()).await {
                break;
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = stdin_task => {}
    }

    println!("shutting down...");
    team.shutdown(Duration::from_secs(10)).await;
    printer.abort();
    Ok(())
}

/// Route one operator line; returns true on /quit.
async fn handle_operator_line(team: &Team, line: &str) -> bool {
    if line.is_empty() {
        return false;
    }

    let mut parts = line.split_whitespace();
    match parts.next().unwrap_or("") {
        "/quit" | "/exit" => return true,
        "/add-target" | "/add" => {
            if let Some(host) = parts.next() {
                match team.add_target(host).await {
                    Ok(id) => println!("target {id}: {host}"),
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
        "/approve" | "/yes" => {
            let id = parts.next().and_then(|p| p.parse().ok()).unwrap_or(team.focused());
            if let Err(e) = team.approve(id, true).await {
                eprintln!("{e}");
            }
        }
        "/deny" | "/no" => {
            let id = parts.next().and_then(|p| p.parse().ok()).unwrap_or(team.focused());
            if let Err(e) = team.approve(id, false).await {
                eprintln!("{e}");
            }
        }
        "/skip-recon" => {
            let id = parts.next().and_then(|p| p.parse().ok()).unwrap_or(team.focused());
            if let Err(e) = team.skip_recon(id).await {
                eprintln!("{e}");
            }
        }
        "/auto-approve" => {
            let on = parts.next() != Some("off");
            team.set_auto_approve(on);
            println!("auto-approve: {on}");
        }
        "/focus" => {
            if let Some(id) = parts.next().and_then(|p| p.parse().ok()) {
                team.set_focus(id);
            }
        }
        "/model" => {
            let kind = match parts.next() {
                Some("anthropic") => ProviderKind::Anthropic,
                Some("openai") => ProviderKind::Openai,
                _ => {
                    eprintln!("usage: /model <anthropic|openai> <model>");
                    return false;
                }
            };
            let Some(model) = parts.next() else {
                eprintln!("usage: /model <anthropic|openai> <model>");
                return false;
            };
            match team.switch_model(kind, model.to_string()) {
                Ok(()) => println!("model switched"),
                Err(e) => eprintln!("{e:#}"),
            }
        }
        _ => {
            // Free text: let the Brain pull a host out of it; otherwise
            // it goes to the focused target as an instruction.
            match team.brain().extract_target(line).await {
                Ok(extraction)
                    if !extraction.host.is_empty()
                        && pentecter::team::validate_host(&extraction.host) =>
                {
                    match team.add_target(&extraction.host).await {
                        Ok(id) => {
                            if !extraction.instruction.is_empty() {
                                let _ = team.send_user_message(id, extraction.instruction).await;
                            }
                        }
                        Err(_) => {
                            let _ = team.send_user_message(team.focused(), line.to_string()).await;
                        }
                    }
                }
                _ => {
                    if let Err(e) = team.send_user_message(team.focused(), line.to_string()).await {
                        eprintln!("{e}");
                    }
                }
            }
        }
    }
    false
}

fn print_event(event: &Event) {
    let id = event.target_id;
    match &event.kind {
        EventKind::Log { message } => println!("[t{id}] {message}"),
        EventKind::TurnStart { turn } => println!("[t{id}] --- turn {turn} ---"),
        EventKind::ThinkStart => println!("[t{id}] thinking..."),
        EventKind::ThinkDone { duration_ms } => println!("[t{id}] thought for {duration_ms} ms"),
        EventKind::CmdStart { command } => println!("[t{id}] $ {command}"),
        EventKind::CmdOutput { line } => println!("[t{id}] | {line}"),
        EventKind::CmdDone { exit_code, duration_ms } => {
            println!("[t{id}] exit {exit_code} ({duration_ms} ms)")
        }
        EventKind::SubTaskStart { task_id, goal } => {
            println!("[t{id}] sub-task {task_id} started: {goal}")
        }
        EventKind::SubTaskLog { task_id, line } => println!("[t{id}] [{task_id}] {line}"),
        EventKind::SubTaskComplete { task_id, status } => {
            println!("[t{id}] sub-task {task_id}: {status:?}")
        }
        EventKind::Proposal { proposal } => {
            println!(
                "[t{id}] PROPOSAL: {} {} -- {} (/approve or /deny)",
                proposal.tool,
                proposal.args.join(" "),
                proposal.description
            )
        }
        EventKind::AddTarget { host } => println!("[t{id}] target added: {host}"),
        EventKind::Stalled { reason } => {
            println!("[t{id}] STALLED: {reason} (send guidance to resume)")
        }
        EventKind::Complete { success, summary } => {
            println!("[t{id}] {} {summary}", if *success { "COMPLETE:" } else { "FAILED:" })
        }
        EventKind::Error { message } => eprintln!("[t{id}] error: {message}"),
    }
}
