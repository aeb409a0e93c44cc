// Stall detection
//
// Two signals over a rolling window of recent commands: the same
// normalized command line repeated three times in a row, or three
// consecutive scans of the same host coming back dead. Either one
// suspends the loop until the operator weighs in.

use std::collections::VecDeque;

use crate::config::constants::{STALL_REPEATS, STALL_WINDOW};

#[derive(Debug, Default)]
pub struct StallDetector {
    window: VecDeque<String>,
    dead_scans: usize,
}

impl StallDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished command; returns the stall reason when one of
    /// the rules trips. The window resets after a report so a single
    /// stall is not re-announced every turn.
    pub fn record(&mut self, command: &str, observation: &str) -> Option<String> {
        let normalized = normalize(command);
        self.window.push_back(normalized.clone());
        while self.window.len() > STALL_WINDOW {
            self.window.pop_front();
        }

        if self.window.len() >= STALL_REPEATS
            && self
                .window
                .iter()
                .rev()
                .take(STALL_REPEATS)
                .all(|c| *c == normalized)
        {
            self.reset();
            return Some(format!(
                "same command repeated {STALL_REPEATS} times: {command}"
            ));
        }

        if is_scan(&normalized) {
            if scan_is_dead(observation) {
                self.dead_scans += 1;
                if self.dead_scans >= STALL_REPEATS {
                    self.reset();
                    return Some(format!(
                        "{STALL_REPEATS} consecutive scans found no reachable services"
                    ));
                }
            } else {
                self.dead_scans = 0;
            }
        }

        None
    }

    fn reset(&mut self) {
        self.window.clear();
        self.dead_scans = 0;
    }
}

fn normalize(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn is_scan(normalized: &str) -> bool {
    normalized.starts_with("nmap") || normalized.starts_with("masscan")
}

fn scan_is_dead(observation: &str) -> bool {
    let obs = observation.to_lowercase();
    if obs.contains("0 hosts up") || obs.contains("no hosts up") {
        return true;
    }
    // every reported port filtered or closed, none open
    let mentions_ports = obs.contains("filtered") || obs.contains("closed");
    mentions_ports && !obs.contains("open")
}
