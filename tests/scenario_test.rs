// End-to-end scenarios over the real Team/Loop/Runner with a scripted
// Brain.

mod common;

use std::time::Duration;

use common::{build_team, count, events_until};
use pentecter::brain::Action;
use pentecter::config::Config;
use pentecter::errors::EXIT_CODE_CANCELLED;
use pentecter::memory::MemoryRecord;
use pentecter::subtask::SubTaskKind;
use pentecter::team::events::EventKind;

const DEADLINE: Duration = Duration::from_secs(20);

#[tokio::test]
async fn simple_scan_streams_output_and_feeds_the_digest() {
    let (team, mut events, memory, scripted) = build_team(
        Config::default(),
        vec![
            Action::Run {
                command: "nmap -p 21,22,80 --open -Pn 10.0.0.5".to_string(),
            },
            Action::Complete {
                summary: "scan done".to_string(),
            },
        ],
    );
    team.add_target("10.0.0.5").await.unwrap();

    let seen = events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::Complete { .. })
    })
    .await;

    assert_eq!(count(&seen, |k| matches!(k, EventKind::CmdStart { .. })), 1);
    assert_eq!(count(&seen, |k| matches!(k, EventKind::CmdOutput { .. })), 2);
    let done = seen
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::CmdDone { exit_code, .. } => Some(*exit_code),
            _ => None,
        })
        .expect("CmdDone");
    assert_eq!(done, 0);

    // Turn 2 started after the command was observed.
    assert!(seen
        .iter()
        .any(|e| matches!(e.kind, EventKind::TurnStart { turn: 2 })));

    // The discovered services landed in the per-host digest.
    let digest = memory.digest("10.0.0.5");
    assert!(digest.contains("ssh"), "digest: {digest}");
    assert!(digest.contains("http"), "digest: {digest}");

    // And the second snapshot the Brain saw carried the recon queue for
    // the freshly created tree.
    let inputs = scripted.seen_inputs();
    assert!(inputs.len() >= 2);
    assert!(inputs[1].recon_queue.is_some(), "locked tree must inject its queue");
}

#[tokio::test]
async fn proposal_pauses_without_a_subprocess_until_rejected() {
    let (team, mut events, _memory, scripted) = build_team(
        Config::default(),
        vec![
            Action::Propose {
                command: "hydra -l admin -P list ssh://10.0.0.5".to_string(),
                reason: "brute force ssh".to_string(),
            },
            Action::Complete {
                summary: String::new(),
            },
        ],
    );
    let id = team.add_target("10.0.0.5").await.unwrap();

    let before = events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::Proposal { .. })
    })
    .await;
    assert_eq!(count(&before, |k| matches!(k, EventKind::Proposal { .. })), 1);
    assert_eq!(
        count(&before, |k| matches!(k, EventKind::CmdStart { .. })),
        0,
        "no subprocess may start while a proposal is pending"
    );

    team.approve(id, false).await.unwrap();

    let after = events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::Complete { .. })
    })
    .await;
    assert_eq!(count(&after, |k| matches!(k, EventKind::CmdStart { .. })), 0);

    // The next turn's prompt carries the rejection in history.
    let inputs = scripted.seen_inputs();
    let last = inputs.last().unwrap();
    assert!(last
        .history
        .iter()
        .any(|h| h.observation.contains("rejected by operator")));
}

#[tokio::test]
async fn repeated_commands_stall_and_one_message_resumes() {
    let (team, mut events, _memory, _scripted) = build_team(
        Config::default(),
        vec![
            Action::Run { command: "true".to_string() },
            Action::Run { command: "true".to_string() },
            Action::Run { command: "true".to_string() },
            Action::Complete { summary: "resumed".to_string() },
        ],
    );
    let id = team.add_target("10.0.0.99").await.unwrap();

    let until_stall = events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::Stalled { .. })
    })
    .await;
    assert_eq!(count(&until_stall, |k| matches!(k, EventKind::Stalled { .. })), 1);
    assert_eq!(count(&until_stall, |k| matches!(k, EventKind::CmdDone { .. })), 3);

    // Suspended: no new turn while waiting for the operator.
    let while_stalled = events_until(&mut events, Duration::from_millis(400), |k| {
        matches!(k, EventKind::TurnStart { .. })
    })
    .await;
    assert_eq!(
        count(&while_stalled, |k| matches!(k, EventKind::TurnStart { .. })),
        0,
        "loop must not think again while stalled"
    );

    team.send_user_message(id, "try the web port".to_string())
        .await
        .unwrap();
    let resumed = events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::Complete { .. })
    })
    .await;
    assert!(resumed
        .iter()
        .any(|e| matches!(e.kind, EventKind::Complete { success: true, .. })));
}

#[tokio::test]
async fn subtask_cap_rejects_the_third_spawn_until_one_finishes() {
    let (team, mut events, _memory, scripted) = build_team(
        Config::default(),
        vec![
            Action::SpawnTask {
                kind: SubTaskKind::Runner,
                goal: "sleep 1".to_string(),
                metadata: None,
            },
            Action::SpawnTask {
                kind: SubTaskKind::Runner,
                goal: "sleep 1".to_string(),
                metadata: None,
            },
            Action::SpawnTask {
                kind: SubTaskKind::Runner,
                goal: "sleep 1".to_string(),
                metadata: None,
            },
            Action::Wait { task_id: 1 },
            Action::SpawnTask {
                kind: SubTaskKind::Runner,
                goal: "true".to_string(),
                metadata: None,
            },
            Action::Wait { task_id: 2 },
            Action::Wait { task_id: 3 },
            Action::Complete {
                summary: String::new(),
            },
        ],
    );
    team.add_target("10.0.0.5").await.unwrap();

    let seen = events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::Complete { .. })
    })
    .await;

    // Two spawns landed immediately; the third was refused, so only
    // after a slot freed did the fourth start.
    assert_eq!(
        count(&seen, |k| matches!(k, EventKind::SubTaskStart { .. })),
        3
    );
    assert!(count(&seen, |k| matches!(k, EventKind::SubTaskComplete { .. })) >= 3);

    // The rejection reached the Brain as an observation, not an event.
    let inputs = scripted.seen_inputs();
    assert!(
        inputs.iter().any(|i| i
            .observation
            .as_deref()
            .is_some_and(|o| o.contains("capacity exceeded"))),
        "capacity rejection must come back as an observation"
    );
}

#[tokio::test]
async fn cancelling_the_team_ends_an_inflight_command_with_the_reserved_code() {
    let (team, mut events, _memory, _scripted) = build_team(
        Config::default(),
        vec![Action::Run {
            command: "sleep 30".to_string(),
        }],
    );
    team.add_target("10.0.0.5").await.unwrap();

    let started = events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::CmdStart { .. })
    })
    .await;
    assert_eq!(count(&started, |k| matches!(k, EventKind::CmdStart { .. })), 1);

    team.shutdown(Duration::from_secs(10)).await;

    let rest = events_until(&mut events, Duration::from_secs(2), |k| {
        matches!(k, EventKind::Complete { .. })
    })
    .await;
    let exit = rest
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::CmdDone { exit_code, .. } => Some(*exit_code),
            _ => None,
        })
        .expect("CmdDone must still flank the cancelled command");
    assert_eq!(exit, EXIT_CODE_CANCELLED);
    assert!(rest
        .iter()
        .any(|e| matches!(e.kind, EventKind::Complete { success: false, .. })));
}

#[tokio::test]
async fn memory_round_trips_into_the_next_snapshot() {
    let (team, mut events, memory, scripted) = build_team(
        Config::default(),
        vec![
            Action::Memory {
                record: MemoryRecord {
                    kind: "vulnerability".to_string(),
                    title: "CVE-2021-41773".to_string(),
                    description: "Apache path traversal".to_string(),
                    severity: "critical".to_string(),
                },
            },
            Action::Complete {
                summary: String::new(),
            },
        ],
    );
    team.add_target("10.0.0.5").await.unwrap();

    events_until(&mut events, DEADLINE, |k| {
        matches!(k, EventKind::Complete { .. })
    })
    .await;

    assert!(memory.digest("10.0.0.5").contains("CVE-2021-41773"));

    // The very next snapshot already carried the finding verbatim.
    let inputs = scripted.seen_inputs();
    let next = &inputs[1];
    assert!(next.memory_digest.contains("CVE-2021-41773"));
    assert!(next.memory_digest.contains("critical"));
}
