// Prompt composition for the LLM-backed Brain

use super::BrainInput;

/// Engagement rules and the action schema, sent as the system prompt on
/// every turn.
pub const SYSTEM_PROMPT: &str = r#"You are the planning engine of an authorized penetration test. A human operator supervises every session; scope and authorization were established before you were invoked.

Rules:
- Reply with exactly ONE JSON object and nothing else. The object has an "action" field and the fields that action requires.
- Commands are executed verbatim as argv (no shell, no pipes, no redirection, no stdin). One tool invocation per command.
- Read-only reconnaissance tools run immediately. Anything intrusive (brute forcing, exploitation, credential use) must be sent as "propose" so the operator can approve it.
- While a recon queue is shown, work through it before anything intrusive. Prefer the suggested commands verbatim.
- File every durable discovery with a "memory" action so it survives into later prompts.
- Use "think" to record reasoning, "complete" only when the goal is achieved or nothing remains to try.

Actions:
  {"action":"run","command":"<tool and args>"}
  {"action":"propose","command":"<tool and args>","reason":"<one line>"}
  {"action":"think","thought":"<reasoning>"}
  {"action":"memory","kind":"service|vulnerability|credential|note","title":"<short>","description":"<detail>","severity":"info|low|medium|high|critical"}
  {"action":"spawn_task","kind":"runner|smart","goal":"<command or goal>"}
  {"action":"wait","task_id":<id>}
  {"action":"check_task","task_id":<id>}
  {"action":"kill_task","task_id":<id>}
  {"action":"add_target","host":"<host>"}
  {"action":"call_mcp","server":"<server>","tool":"<tool>","args":{}}
  {"action":"search_knowledge","query":"<terms>"}
  {"action":"read_knowledge","path":"<note path>"}
  {"action":"complete","summary":"<what was achieved>"}
"#;

/// Render the snapshot as the user message for one turn.
pub fn render_input(input: &BrainInput) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Turn {}\n\n", input.turn));
    out.push_str("## Target\n");
    out.push_str(&serde_json::to_string_pretty(&input.target).unwrap_or_default());
    out.push('\n');

    if !input.memory_digest.is_empty() {
        out.push_str("\n## Findings so far\n");
        out.push_str(&input.memory_digest);
    }

    if let Some(queue) = &input.recon_queue {
        out.push_str("\n## Recon queue (work through this first)\n");
        out.push_str(queue);
    }

    if !input.history.is_empty() {
        out.push_str("\n## Recent commands\n");
        for entry in &input.history {
            out.push_str(&format!(
                "$ {}  (exit {}, {} ms)\n",
                entry.command, entry.exit_code, entry.duration_ms
            ));
        }
    }

    if let (Some(cmd), Some(code)) = (&input.last_command, input.last_exit_code) {
        out.push_str(&format!("\n## Last command\n$ {cmd}\nexit code: {code}\n"));
        if let Some(entry) = input.history.last() {
            if !entry.observation.is_empty() {
                out.push_str("output:\n");
                out.push_str(&entry.observation);
                out.push('\n');
            }
        }
    }

    if let Some(obs) = &input.observation {
        out.push_str("\n## Observation\n");
        out.push_str(obs);
        out.push('\n');
    }

    if let Some(msg) = &input.user_message {
        out.push_str("\n## Operator message\n");
        out.push_str(msg);
        out.push('\n');
    }

    out.push_str("\nReply with one action JSON object.\n");
    out
}

/// Render a recon batch for prompt injection.
pub fn render_recon_queue(batch: &[crate::recon::ReconTask]) -> String {
    let mut out = String::new();
    for task in batch {
        let subject = if !task.path.is_empty() {
            format!("{}:{}{}", task.host, task.port, task.path)
        } else {
            format!("{}:{}", task.host, task.port)
        };
        out.push_str(&format!(
            "- {:?} on {subject}\n  suggested: {}\n",
            task.kind, task.suggested
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::CommandHistoryEntry;

    #[test]
    fn test_render_includes_turn_and_target() {
        let input = BrainInput {
            turn: 3,
            target: serde_json::json!({"host": "10.0.0.5"}),
            ..Default::default()
        };
        let text = render_input(&input);
        assert!(text.contains("# Turn 3"));
        assert!(text.contains("10.0.0.5"));
        assert!(!text.contains("Recon queue"));
    }

    #[test]
    fn test_render_includes_recon_queue_when_present() {
        let input = BrainInput {
            recon_queue: Some("- EndpointEnum on 10.0.0.5:80\n".to_string()),
            ..Default::default()
        };
        let text = render_input(&input);
        assert!(text.contains("Recon queue"));
        assert!(text.contains("EndpointEnum"));
    }

    #[test]
    fn test_render_last_command_with_observation() {
        let input = BrainInput {
            last_command: Some("nmap -Pn 10.0.0.5".into()),
            last_exit_code: Some(0),
            history: vec![CommandHistoryEntry {
                command: "nmap -Pn 10.0.0.5".into(),
                exit_code: 0,
                observation: "22/tcp open ssh".into(),
                duration_ms: 900,
            }],
            ..Default::default()
        };
        let text = render_input(&input);
        assert!(text.contains("exit code: 0"));
        assert!(text.contains("22/tcp open ssh"));
    }

    #[test]
    fn test_render_operator_message() {
        let input = BrainInput {
            user_message: Some("focus on the web port".into()),
            ..Default::default()
        };
        assert!(render_input(&input).contains("focus on the web port"));
    }

    #[test]
    fn test_system_prompt_forbids_stdin_and_shell() {
        assert!(SYSTEM_PROMPT.contains("no stdin"));
        assert!(SYSTEM_PROMPT.contains("no shell"));
    }
}
