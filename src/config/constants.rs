// Core defaults
//
// Anything here can be overridden per install in ~/.pentecter/config.toml.

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 45;

/// Grace window between the interrupt and kill signals on cancellation.
pub const KILL_GRACE_MS: u64 = 1500;

/// Default head/tail truncation for command observations.
pub const DEFAULT_HEAD_LINES: usize = 60;
pub const DEFAULT_TAIL_LINES: usize = 40;

/// Bound of the per-command output line stream.
pub const LINE_STREAM_CAPACITY: usize = 256;

/// Bound of the shared event bus.
pub const EVENT_BUS_CAPACITY: usize = 128;

/// Per-Brain-call timeout.
pub const BRAIN_TIMEOUT_SECS: u64 = 180;

/// Retry cap for transient Brain failures before they turn fatal.
pub const BRAIN_MAX_RETRIES: u32 = 3;

/// Concurrently running sub-tasks allowed per target loop.
pub const DEFAULT_MAX_SUBTASKS: usize = 2;

/// Line cap of a sub-task's partial-output ring buffer.
pub const SUBTASK_OUTPUT_CAP: usize = 200;

/// Turn budget of a smart sub-task's inner loop.
pub const SMART_SUBTASK_MAX_TURNS: u32 = 10;

/// Recon tasks handed out per prompt injection.
pub const RECON_BATCH_SIZE: usize = 4;

/// Concurrently in-progress recon tasks allowed per tree.
pub const RECON_MAX_PARALLEL: usize = 3;

/// Command history entries kept for the Brain's prompt.
pub const COMMAND_HISTORY_KEEP: usize = 20;

/// History tail rendered into each prompt.
pub const COMMAND_HISTORY_TAIL: usize = 10;

/// Window of recent commands inspected by the stall detector.
pub const STALL_WINDOW: usize = 5;

/// Identical commands (or dead scans) in a row that trigger a stall.
pub const STALL_REPEATS: usize = 3;

/// Default model per provider.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Max tokens requested per Brain call.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
