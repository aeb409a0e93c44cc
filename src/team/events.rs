// Event bus shared by every loop
//
// A single bounded stream multiplexes all targets for the UI. Producers
// tolerate a full bus by dropping only line-level frames (CmdOutput,
// SubTaskLog, Log); every other kind awaits capacity, which preserves the
// invariant that a command is always flanked by matching Start and Done
// events.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use super::session_log::SessionLog;
use crate::subtask::SubTaskStatus;
use crate::target::Proposal;

/// One frame on the multiplexed stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub target_id: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Log { message: String },
    TurnStart { turn: u32 },
    ThinkStart,
    ThinkDone { duration_ms: u64 },
    CmdStart { command: String },
    CmdOutput { line: String },
    CmdDone { exit_code: i32, duration_ms: u64 },
    SubTaskStart { task_id: u64, goal: String },
    SubTaskLog { task_id: u64, line: String },
    SubTaskComplete { task_id: u64, status: SubTaskStatus },
    Proposal { proposal: Proposal },
    AddTarget { host: String },
    Stalled { reason: String },
    Complete { success: bool, summary: String },
    Error { message: String },
}

impl EventKind {
    /// Line-level frames may be shed under backpressure.
    pub fn droppable(&self) -> bool {
        matches!(
            self,
            EventKind::CmdOutput { .. } | EventKind::SubTaskLog { .. } | EventKind::Log { .. }
        )
    }
}

/// Producer side of the bus. Cheap to clone; every loop and scheduler
/// holds one.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
    log: Option<Arc<SessionLog>>,
}

impl EventBus {
    pub fn new(capacity: usize, log: Option<Arc<SessionLog>>) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
                log,
            },
            rx,
        )
    }

    /// Publish one frame, applying the drop policy.
    pub async fn publish(&self, target_id: u64, kind: EventKind) {
        if let Some(log) = &self.log {
            log.append(target_id, &kind);
        }

        let event = Event { target_id, kind };
        if event.kind.droppable() {
            if let Err(mpsc::error::TrySendError::Full(e)) = self.tx.try_send(event) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("bus full, dropped {:?} frame", e.kind);
            }
        } else {
            // Consumer gone means shutdown; nothing left to notify.
            let _ = self.tx.send(event).await;
        }
    }

    /// Frames shed so far (observability only).
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Bind a producer handle to one target.
    pub fn handle(&self, target_id: u64) -> BusHandle {
        BusHandle {
            bus: self.clone(),
            target_id,
        }
    }
}

/// Per-target producer handle.
#[derive(Clone)]
pub struct BusHandle {
    bus: EventBus,
    target_id: u64,
}

impl BusHandle {
    pub async fn emit(&self, kind: EventKind) {
        self.bus.publish(self.target_id, kind).await;
    }

    pub fn target_id(&self) -> u64 {
        self.target_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_flow_in_order_per_target() {
        let (bus, mut rx) = EventBus::new(16, None);
        let h = bus.handle(1);
        h.emit(EventKind::CmdStart {
            command: "nmap".into(),
        })
        .await;
        h.emit(EventKind::CmdOutput {
            line: "22/tcp open".into(),
        })
        .await;
        h.emit(EventKind::CmdDone {
            exit_code: 0,
            duration_ms: 5,
        })
        .await;

        let kinds: Vec<EventKind> = vec![
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
        ];
        assert!(matches!(kinds[0], EventKind::CmdStart { .. }));
        assert!(matches!(kinds[1], EventKind::CmdOutput { .. }));
        assert!(matches!(kinds[2], EventKind::CmdDone { .. }));
    }

    #[tokio::test]
    async fn test_full_bus_sheds_only_line_frames() {
        let (bus, mut rx) = EventBus::new(1, None);
        // Fill the single slot.
        bus.publish(1, EventKind::ThinkStart).await;
        // Droppable frame on a full bus is shed, not queued.
        bus.publish(
            1,
            EventKind::CmdOutput {
                line: "noise".into(),
            },
        )
        .await;
        assert_eq!(bus.dropped(), 1);

        // The essential frame is still the only queued one.
        let first = rx.recv().await.unwrap();
        assert!(matches!(first.kind, EventKind::ThinkStart));
    }

    #[tokio::test]
    async fn test_essential_frames_wait_for_capacity() {
        let (bus, mut rx) = EventBus::new(1, None);
        bus.publish(1, EventKind::ThinkStart).await;

        let bus2 = bus.clone();
        let sender = tokio::spawn(async move {
            bus2.publish(
                1,
                EventKind::CmdDone {
                    exit_code: 0,
                    duration_ms: 1,
                },
            )
            .await;
        });

        // Draining frees the slot and the CmdDone goes through.
        assert!(matches!(rx.recv().await.unwrap().kind, EventKind::ThinkStart));
        sender.await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            EventKind::CmdDone { .. }
        ));
        assert_eq!(bus.dropped(), 0);
    }

    #[test]
    fn test_event_serializes_with_flattened_kind() {
        let event = Event {
            target_id: 2,
            kind: EventKind::CmdStart {
                command: "nmap".into(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["target_id"], 2);
        assert_eq!(json["kind"], "cmd_start");
        assert_eq!(json["command"], "nmap");
    }
}
