// Structured reconnaissance queue
//
// A rooted tree per HTTP-enabled target: the root is the host, ports hang
// off the root, endpoints hang off their port, vhosts hang off the root.
// Every node carries four task slots; a node counts as settled only when
// its own tasks and every descendant's tasks are complete.
//
// The tree starts locked: the loop injects the pending queue into the
// Brain's prompt until the queue drains or the operator skips recon.

pub mod parsers;

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// The four reconnaissance task slots, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconTaskKind {
    EndpointEnum,
    ParamFuzz,
    Profiling,
    VhostDiscovery,
}

impl ReconTaskKind {
    pub const ALL: [ReconTaskKind; 4] = [
        ReconTaskKind::EndpointEnum,
        ReconTaskKind::ParamFuzz,
        ReconTaskKind::Profiling,
        ReconTaskKind::VhostDiscovery,
    ];

    fn priority(self) -> usize {
        match self {
            ReconTaskKind::EndpointEnum => 0,
            ReconTaskKind::ParamFuzz => 1,
            ReconTaskKind::Profiling => 2,
            ReconTaskKind::VhostDiscovery => 3,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ReconTaskKind::EndpointEnum => "endpoint-enum",
            ReconTaskKind::ParamFuzz => "param-fuzz",
            ReconTaskKind::Profiling => "profiling",
            ReconTaskKind::VhostDiscovery => "vhost-discovery",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconTaskStatus {
    Pending,
    InProgress,
    Complete,
}

/// One node: the root host, a port, an endpoint (port 0, path set) or a
/// vhost (port 0, distinct host).
#[derive(Debug, Clone)]
struct ReconNode {
    host: String,
    port: u16,
    service: String,
    banner: String,
    path: String,
    tasks: [ReconTaskStatus; 4],
    parent: Option<usize>,
    children: Vec<usize>,
}

impl ReconNode {
    fn settled_locally(&self) -> bool {
        self.tasks.iter().all(|t| *t == ReconTaskStatus::Complete)
    }

    fn task(&self, kind: ReconTaskKind) -> ReconTaskStatus {
        self.tasks[kind.priority()]
    }

    /// Statuses never regress from Complete.
    fn set_task(&mut self, kind: ReconTaskKind, status: ReconTaskStatus) {
        let slot = &mut self.tasks[kind.priority()];
        if *slot != ReconTaskStatus::Complete {
            *slot = status;
        }
    }
}

const ALL_COMPLETE: [ReconTaskStatus; 4] = [ReconTaskStatus::Complete; 4];

/// An open port summary for the target snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    pub port: u16,
    pub service: String,
    pub banner: String,
}

/// One pending unit of work handed out by `next_batch`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconTask {
    pub node: usize,
    pub kind: ReconTaskKind,
    pub host: String,
    /// Effective port (an endpoint inherits its parent's).
    pub port: u16,
    pub path: String,
    /// A concrete command the Brain may run verbatim.
    pub suggested: String,
}

struct TreeInner {
    nodes: Vec<ReconNode>,
    active: usize,
    max_parallel: usize,
    locked: bool,
}

/// Per-target reconnaissance queue. Mutators serialize on an internal
/// mutex; the owning loop is the only caller.
#[derive(Debug)]
pub struct ReconTree {
    inner: Mutex<TreeInner>,
}

impl std::fmt::Debug for TreeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeInner")
            .field("nodes", &self.nodes.len())
            .field("active", &self.active)
            .field("locked", &self.locked)
            .finish()
    }
}

impl ReconTree {
    pub fn new(host: &str, max_parallel: usize) -> Self {
        let root = ReconNode {
            host: host.to_string(),
            port: 0,
            service: String::new(),
            banner: String::new(),
            path: String::new(),
            tasks: ALL_COMPLETE,
            parent: None,
            children: Vec::new(),
        };
        Self {
            inner: Mutex::new(TreeInner {
                nodes: vec![root],
                active: 0,
                max_parallel,
                locked: true,
            }),
        }
    }

    /// Record an open port. HTTP-ish services get the full task set;
    /// other services are informational only.
    pub fn add_port(&self, port: u16, service: &str, banner: &str) {
        let mut inner = self.inner.lock().expect("recon mutex");
        let exists = inner.nodes[0]
            .children
            .iter()
            .any(|&c| inner.nodes[c].port == port);
        if exists || port == 0 {
            return;
        }

        let http = is_http_service(service);
        let mut tasks = ALL_COMPLETE;
        if http {
            tasks[ReconTaskKind::EndpointEnum.priority()] = ReconTaskStatus::Pending;
            tasks[ReconTaskKind::Profiling.priority()] = ReconTaskStatus::Pending;
            tasks[ReconTaskKind::VhostDiscovery.priority()] = ReconTaskStatus::Pending;
        }

        let host = inner.nodes[0].host.clone();
        let id = inner.nodes.len();
        inner.nodes.push(ReconNode {
            host,
            port,
            service: service.to_string(),
            banner: banner.to_string(),
            path: String::new(),
            tasks,
            parent: Some(0),
            children: Vec::new(),
        });
        inner.nodes[0].children.push(id);
    }

    /// Record a discovered endpoint under an already-known port.
    pub fn add_endpoint(&self, port: u16, path: &str) {
        let mut inner = self.inner.lock().expect("recon mutex");
        let Some(parent) = inner.nodes[0]
            .children
            .iter()
            .copied()
            .find(|&c| inner.nodes[c].port == port)
        else {
            return;
        };
        let exists = inner.nodes[parent]
            .children
            .iter()
            .any(|&c| inner.nodes[c].path == path);
        if exists || path.is_empty() {
            return;
        }

        let mut tasks = ALL_COMPLETE;
        tasks[ReconTaskKind::ParamFuzz.priority()] = ReconTaskStatus::Pending;
        tasks[ReconTaskKind::Profiling.priority()] = ReconTaskStatus::Pending;

        let host = inner.nodes[parent].host.clone();
        let id = inner.nodes.len();
        inner.nodes.push(ReconNode {
            host,
            port: 0,
            service: String::new(),
            banner: String::new(),
            path: path.to_string(),
            tasks,
            parent: Some(parent),
            children: Vec::new(),
        });
        inner.nodes[parent].children.push(id);
    }

    /// Record a discovered virtual host as a new web surface off the root.
    pub fn add_vhost(&self, host: &str) {
        let mut inner = self.inner.lock().expect("recon mutex");
        let exists = inner
            .nodes
            .iter()
            .any(|n| n.port == 0 && n.path.is_empty() && n.host.eq_ignore_ascii_case(host));
        if exists {
            return;
        }

        let mut tasks = ALL_COMPLETE;
        tasks[ReconTaskKind::EndpointEnum.priority()] = ReconTaskStatus::Pending;
        tasks[ReconTaskKind::Profiling.priority()] = ReconTaskStatus::Pending;

        let id = inner.nodes.len();
        inner.nodes.push(ReconNode {
            host: host.to_string(),
            port: 0,
            service: "http".to_string(),
            banner: String::new(),
            path: String::new(),
            tasks,
            parent: Some(0),
            children: Vec::new(),
        });
        inner.nodes[0].children.push(id);
    }

    /// Any task not yet complete anywhere in the tree?
    pub fn has_pending(&self) -> bool {
        let inner = self.inner.lock().expect("recon mutex");
        inner.nodes.iter().any(|n| !n.settled_locally())
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().expect("recon mutex").locked
    }

    /// Operator override (`/skip-recon`). The queue keeps reporting
    /// pending work advisorily afterwards.
    pub fn unlock(&self) {
        self.inner.lock().expect("recon mutex").locked = false;
    }

    /// Hand out up to `k` pending tasks, bounded by the parallel cap.
    ///
    /// Tasks are collected depth-first so deeper endpoints are not starved
    /// by new siblings, then stably ordered by kind priority. Handed-out
    /// tasks move to InProgress and count against the cap.
    pub fn next_batch(&self, k: usize) -> Vec<ReconTask> {
        let mut inner = self.inner.lock().expect("recon mutex");
        let budget = k.min(inner.max_parallel.saturating_sub(inner.active));
        if budget == 0 {
            return Vec::new();
        }

        let mut pending = Vec::new();
        collect_pending(&inner.nodes, 0, &mut pending);
        pending.sort_by_key(|t: &ReconTask| t.kind.priority());
        pending.truncate(budget);

        for task in &pending {
            inner.nodes[task.node].set_task(task.kind, ReconTaskStatus::InProgress);
            inner.active += 1;
        }
        pending
    }

    /// Mark one task complete. The active counter is decremented only
    /// here, never by cancellation.
    pub fn complete(&self, node: usize, kind: ReconTaskKind) {
        let mut inner = self.inner.lock().expect("recon mutex");
        if node >= inner.nodes.len() {
            return;
        }
        let was = inner.nodes[node].task(kind);
        if was == ReconTaskStatus::Complete {
            return;
        }
        inner.nodes[node].tasks[kind.priority()] = ReconTaskStatus::Complete;
        if was == ReconTaskStatus::InProgress {
            inner.active = inner.active.saturating_sub(1);
        }
        if inner.nodes.iter().all(|n| n.settled_locally()) {
            inner.locked = false;
        }
    }

    /// Complete every in-progress task whose subject matches the executed
    /// command line (same tool, same host, same port/path selector).
    pub fn complete_matching(&self, command: &str) -> usize {
        let tool = command.split_whitespace().next().unwrap_or("").to_string();
        let matches: Vec<(usize, ReconTaskKind)> = {
            let inner = self.inner.lock().expect("recon mutex");
            let mut hits = Vec::new();
            for (id, node) in inner.nodes.iter().enumerate() {
                for kind in ReconTaskKind::ALL {
                    if node.task(kind) != ReconTaskStatus::InProgress {
                        continue;
                    }
                    let suggested = suggest(&inner.nodes, id, kind);
                    let suggested_tool = suggested.split_whitespace().next().unwrap_or("");
                    if suggested_tool != tool {
                        continue;
                    }
                    if !command.contains(&node.host) {
                        continue;
                    }
                    if !node.path.is_empty() && !command.contains(&node.path) {
                        continue;
                    }
                    // The same tool serves several task kinds; the command
                    // shape tells them apart.
                    let shape_matches = match kind {
                        ReconTaskKind::EndpointEnum => {
                            command.contains("FUZZ") && !command.contains("Host:") && !command.contains('?')
                        }
                        ReconTaskKind::ParamFuzz => {
                            command.contains('?') && command.contains("FUZZ")
                        }
                        ReconTaskKind::Profiling => true,
                        ReconTaskKind::VhostDiscovery => command.contains("Host:"),
                    };
                    if !shape_matches {
                        continue;
                    }
                    hits.push((id, kind));
                }
            }
            hits
        };
        let n = matches.len();
        for (node, kind) in matches {
            self.complete(node, kind);
        }
        n
    }

    pub fn active(&self) -> usize {
        self.inner.lock().expect("recon mutex").active
    }

    /// Status of one task slot (Complete for out-of-range nodes).
    pub fn task_status(&self, node: usize, kind: ReconTaskKind) -> ReconTaskStatus {
        let inner = self.inner.lock().expect("recon mutex");
        inner
            .nodes
            .get(node)
            .map(|n| n.task(kind))
            .unwrap_or(ReconTaskStatus::Complete)
    }

    /// Open ports for the target snapshot.
    pub fn ports(&self) -> Vec<PortInfo> {
        let inner = self.inner.lock().expect("recon mutex");
        inner.nodes[0]
            .children
            .iter()
            .filter_map(|&c| {
                let n = &inner.nodes[c];
                (n.port != 0).then(|| PortInfo {
                    port: n.port,
                    service: n.service.clone(),
                    banner: n.banner.clone(),
                })
            })
            .collect()
    }

    /// Indented tree for operator inspection.
    pub fn render(&self) -> String {
        let inner = self.inner.lock().expect("recon mutex");
        let mut out = String::new();
        render_node(&inner.nodes, 0, 0, &mut out);
        if inner.locked {
            out.push_str("(recon locked: queue must drain or /skip-recon)\n");
        }
        out
    }
}

/// Does this nmap service name describe a web surface?
pub fn is_http_service(service: &str) -> bool {
    let s = service.to_ascii_lowercase();
    s.contains("http") || s == "www"
}

fn collect_pending(nodes: &[ReconNode], id: usize, out: &mut Vec<ReconTask>) {
    let node = &nodes[id];
    for kind in ReconTaskKind::ALL {
        if node.task(kind) == ReconTaskStatus::Pending {
            out.push(ReconTask {
                node: id,
                kind,
                host: node.host.clone(),
                port: effective_port(nodes, id),
                path: node.path.clone(),
                suggested: suggest(nodes, id, kind),
            });
        }
    }
    for &child in &node.children {
        collect_pending(nodes, child, out);
    }
}

fn effective_port(nodes: &[ReconNode], id: usize) -> u16 {
    let node = &nodes[id];
    if node.port != 0 {
        return node.port;
    }
    match node.parent {
        Some(p) if nodes[p].port != 0 => nodes[p].port,
        _ => 80,
    }
}

/// Concrete command text offered to the Brain for one task.
fn suggest(nodes: &[ReconNode], id: usize, kind: ReconTaskKind) -> String {
    let node = &nodes[id];
    let host = &node.host;
    let port = effective_port(nodes, id);
    let path = if node.path.is_empty() { "/" } else { &node.path };
    match kind {
        ReconTaskKind::EndpointEnum => format!(
            "ffuf -u http://{host}:{port}/FUZZ -w /usr/share/seclists/Discovery/Web-Content/common.txt -json"
        ),
        ReconTaskKind::ParamFuzz => format!(
            "ffuf -u http://{host}:{port}{path}?FUZZ=1 -w /usr/share/seclists/Discovery/Web-Content/burp-parameter-names.txt -fs 0 -json"
        ),
        ReconTaskKind::Profiling => format!("curl -i -sS -m 10 http://{host}:{port}{path}"),
        ReconTaskKind::VhostDiscovery => format!(
            "ffuf -u http://{host}:{port}/ -H 'Host: FUZZ.{host}' -w /usr/share/seclists/Discovery/DNS/subdomains-top1million-5000.txt -json"
        ),
    }
}

fn render_node(nodes: &[ReconNode], id: usize, depth: usize, out: &mut String) {
    let node = &nodes[id];
    let indent = "  ".repeat(depth);
    let label = if id == 0 {
        node.host.clone()
    } else if node.port != 0 {
        format!("{}/tcp {} {}", node.port, node.service, node.banner)
    } else if !node.path.is_empty() {
        node.path.clone()
    } else {
        format!("vhost {}", node.host)
    };
    out.push_str(&indent);
    out.push_str(label.trim_end());
    out.push('\n');

    let marks: Vec<String> = if id == 0 {
        Vec::new()
    } else {
        ReconTaskKind::ALL
            .iter()
            .filter(|k| node.task(**k) != ReconTaskStatus::Complete)
            .map(|k| {
                let mark = match node.task(*k) {
                    ReconTaskStatus::Pending => " ",
                    ReconTaskStatus::InProgress => "~",
                    ReconTaskStatus::Complete => "x",
                };
                format!("{}[{}]", k.label(), mark)
            })
            .collect()
    };
    if !marks.is_empty() {
        out.push_str(&indent);
        out.push_str("  ");
        out.push_str(&marks.join(" "));
        out.push('\n');
    }

    for &child in &node.children {
        render_node(nodes, child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ReconTree {
        ReconTree::new("10.0.0.5", 3)
    }

    #[test]
    fn test_new_tree_is_locked_and_empty() {
        let t = tree();
        assert!(t.is_locked());
        assert!(!t.has_pending());
        assert!(t.ports().is_empty());
    }

    #[test]
    fn test_http_port_gets_recon_tasks() {
        let t = tree();
        t.add_port(80, "http", "Apache httpd 2.4.41");
        assert!(t.has_pending());
        assert_eq!(t.ports().len(), 1);
    }

    #[test]
    fn test_non_http_port_is_informational() {
        let t = tree();
        t.add_port(22, "ssh", "OpenSSH 8.2");
        assert!(!t.has_pending());
        assert_eq!(t.ports().len(), 1);
    }

    #[test]
    fn test_duplicate_port_ignored() {
        let t = tree();
        t.add_port(80, "http", "");
        t.add_port(80, "http", "");
        assert_eq!(t.ports().len(), 1);
    }

    #[test]
    fn test_batch_respects_priority_and_cap() {
        let t = tree();
        t.add_port(80, "http", "");
        let batch = t.next_batch(10);
        // cap is 3: endpoint-enum first, then profiling, then vhost-discovery
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].kind, ReconTaskKind::EndpointEnum);
        assert_eq!(batch[1].kind, ReconTaskKind::Profiling);
        assert_eq!(batch[2].kind, ReconTaskKind::VhostDiscovery);
        assert_eq!(t.active(), 3);
        // nothing more until something completes
        assert!(t.next_batch(10).is_empty());
    }

    #[test]
    fn test_active_counter_never_exceeds_max_parallel() {
        let t = ReconTree::new("10.0.0.5", 2);
        t.add_port(80, "http", "");
        t.add_port(8080, "http-proxy", "");
        let batch = t.next_batch(10);
        assert_eq!(batch.len(), 2);
        assert_eq!(t.active(), 2);
        t.complete(batch[0].node, batch[0].kind);
        assert_eq!(t.active(), 1);
        assert_eq!(t.next_batch(10).len(), 1);
        assert_eq!(t.active(), 2);
    }

    #[test]
    fn test_deeper_endpoints_precede_new_sibling_same_kind() {
        let t = ReconTree::new("10.0.0.5", 10);
        t.add_port(80, "http", "");
        t.add_endpoint(80, "/admin");
        t.add_port(8080, "http", "");
        let batch = t.next_batch(10);
        let fuzz_positions: Vec<usize> = batch
            .iter()
            .enumerate()
            .filter(|(_, b)| b.kind == ReconTaskKind::ParamFuzz)
            .map(|(i, _)| i)
            .collect();
        let enum_positions: Vec<usize> = batch
            .iter()
            .enumerate()
            .filter(|(_, b)| b.kind == ReconTaskKind::EndpointEnum)
            .map(|(i, _)| i)
            .collect();
        // all endpoint-enum tasks come before any param-fuzz (kind priority)
        assert!(enum_positions.iter().max() < fuzz_positions.iter().min());
        // and within endpoint-enum, port 80 precedes port 8080 (walk order)
        let ports: Vec<u16> = batch
            .iter()
            .filter(|b| b.kind == ReconTaskKind::EndpointEnum)
            .map(|b| b.port)
            .collect();
        assert_eq!(ports, vec![80, 8080]);
    }

    #[test]
    fn test_task_status_never_regresses() {
        let t = tree();
        t.add_port(80, "http", "");
        let batch = t.next_batch(1);
        let task = &batch[0];
        t.complete(task.node, task.kind);
        t.complete(task.node, task.kind); // second completion is a no-op
        assert_eq!(t.active(), 0);
    }

    #[test]
    fn test_auto_unlock_when_queue_drains() {
        let t = tree();
        t.add_port(80, "http", "");
        assert!(t.is_locked());
        loop {
            let batch = t.next_batch(10);
            if batch.is_empty() {
                break;
            }
            for task in batch {
                t.complete(task.node, task.kind);
            }
        }
        assert!(!t.has_pending());
        assert!(!t.is_locked());
    }

    #[test]
    fn test_manual_unlock_keeps_pending_advisory() {
        let t = tree();
        t.add_port(80, "http", "");
        t.unlock();
        assert!(!t.is_locked());
        assert!(t.has_pending());
    }

    #[test]
    fn test_complete_matching_by_suggested_command() {
        let t = tree();
        t.add_port(80, "http", "");
        let batch = t.next_batch(10);
        let enum_task = batch
            .iter()
            .find(|b| b.kind == ReconTaskKind::EndpointEnum)
            .unwrap();
        let done = t.complete_matching(&enum_task.suggested);
        assert_eq!(done, 1);
        assert!(t.active() < 3);
    }

    #[test]
    fn test_endpoint_inherits_parent_port() {
        let t = ReconTree::new("10.0.0.5", 10);
        t.add_port(8080, "http", "");
        t.add_endpoint(8080, "/api");
        let batch = t.next_batch(10);
        let fuzz = batch
            .iter()
            .find(|b| b.kind == ReconTaskKind::ParamFuzz)
            .unwrap();
        assert_eq!(fuzz.port, 8080);
        assert_eq!(fuzz.path, "/api");
        assert!(fuzz.suggested.contains(":8080/api"));
    }

    #[test]
    fn test_render_shows_tree_and_lock() {
        let t = tree();
        t.add_port(80, "http", "nginx");
        let s = t.render();
        assert!(s.contains("10.0.0.5"));
        assert!(s.contains("80/tcp http nginx"));
        assert!(s.contains("recon locked"));
    }
}
