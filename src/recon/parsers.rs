// Observation parsers feeding the recon tree
//
// Single-pass, pure over the captured observation; no I/O. The loop calls
// these after every finished command and applies the findings through the
// tree's mutators.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static NMAP_PORT_RE: Lazy<Regex> = Lazy::new(|| {
    // "80/tcp open  http    Apache httpd 2.4.41 ((Ubuntu))"
    Regex::new(r"(?m)^\s*(\d{1,5})/(tcp|udp)\s+open\s+([\w.\-/]+)\s*(.*)$").unwrap()
});

static HTTP_STATUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^HTTP/[\d.]+\s+(\d{3})").unwrap());

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^(server|x-powered-by|set-cookie|location):\s*(.+)$").unwrap());

/// An open port reported by a scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct PortFinding {
    pub port: u16,
    pub proto: String,
    pub service: String,
    pub banner: String,
}

/// Parse nmap service lines (normal or grepable output).
pub fn parse_nmap(observation: &str) -> Vec<PortFinding> {
    let mut out: Vec<PortFinding> = Vec::new();
    for cap in NMAP_PORT_RE.captures_iter(observation) {
        let Ok(port) = cap[1].parse::<u16>() else {
            continue;
        };
        if out.iter().any(|p| p.port == port) {
            continue;
        }
        out.push(PortFinding {
            port,
            proto: cap[2].to_string(),
            service: cap[3].to_string(),
            banner: cap.get(4).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
        });
    }
    out
}

/// One ffuf hit, from either the single-object or NDJSON output shape.
#[derive(Debug, Clone, Deserialize)]
struct FfufResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    host: String,
    #[serde(default)]
    input: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FfufReport {
    #[serde(default)]
    results: Vec<FfufResult>,
}

/// Classified ffuf findings.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FfufFindings {
    /// (status, path) pairs from content discovery.
    pub endpoints: Vec<(u16, String)>,
    /// Virtual host names from Host-header fuzzing.
    pub vhosts: Vec<String>,
    /// Parameter names from query fuzzing.
    pub params: Vec<String>,
}

impl FfufFindings {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.vhosts.is_empty() && self.params.is_empty()
    }
}

/// Parse ffuf JSON output: a `-o`-style report object or `-json` lines.
pub fn parse_ffuf(observation: &str) -> FfufFindings {
    let mut results: Vec<FfufResult> = Vec::new();

    if let Ok(report) = serde_json::from_str::<FfufReport>(observation) {
        results = report.results;
    }
    if results.is_empty() {
        for line in observation.lines() {
            let line = line.trim();
            if !line.starts_with('{') {
                continue;
            }
            if let Ok(r) = serde_json::from_str::<FfufResult>(line) {
                results.push(r);
            }
        }
    }

    let mut findings = FfufFindings::default();
    for r in &results {
        let fuzz = r
            .input
            .get("FUZZ")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if fuzz.is_empty() || r.url.is_empty() {
            continue;
        }

        let url_host = host_of(&r.url);
        if !r.host.is_empty() && !url_host.is_empty() && !r.host.eq_ignore_ascii_case(&url_host) {
            // Host header fuzzing: the hit is a virtual host.
            if !findings.vhosts.contains(&r.host) {
                findings.vhosts.push(r.host.clone());
            }
        } else if r.url.contains('?') {
            let name = fuzz.to_string();
            if !findings.params.contains(&name) {
                findings.params.push(name);
            }
        } else {
            let path = format!("/{}", fuzz.trim_start_matches('/'));
            if !findings.endpoints.iter().any(|(_, p)| *p == path) {
                findings.endpoints.push((r.status, path));
            }
        }
    }
    findings
}

fn host_of(url: &str) -> String {
    let rest = url.split("://").nth(1).unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or("");
    authority.split(':').next().unwrap_or("").to_string()
}

/// Profile pulled from a curl `-i` observation.
#[derive(Debug, Clone, PartialEq)]
pub struct CurlProfile {
    pub status: u16,
    /// Interesting headers, as "name: value" lines.
    pub headers: Vec<String>,
}

/// Parse a curl `-i` response head into a profile.
pub fn parse_curl(observation: &str) -> Option<CurlProfile> {
    let status = HTTP_STATUS_RE
        .captures(observation)?
        .get(1)?
        .as_str()
        .parse::<u16>()
        .ok()?;
    let headers = HEADER_RE
        .captures_iter(observation)
        .map(|c| format!("{}: {}", c[1].to_lowercase(), c[2].trim()))
        .collect();
    Some(CurlProfile { status, headers })
}
