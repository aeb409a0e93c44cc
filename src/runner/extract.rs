// Entity extraction over captured command output
//
// Best-effort regex parsers; extraction never fails a run.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PORT_RE: Lazy<Regex> = Lazy::new(|| {
    // "22/tcp open ssh OpenSSH 8.9" and the grepable variants
    Regex::new(r"(?m)^\s*(\d{1,5})/(tcp|udp)\s+open(?:\s+(\S+))?").unwrap()
});

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b((?:\d{1,3}\.){3}\d{1,3})\b").unwrap()
});

static CVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bCVE-\d{4}-\d{4,7}\b").unwrap());

/// A structured fact pulled out of raw tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Port {
        number: u16,
        proto: String,
        service: Option<String>,
    },
    Ip {
        address: String,
    },
    Cve {
        id: String,
    },
}

/// Scan captured lines for ports, IPv4 addresses and CVE identifiers.
pub fn extract_entities(lines: &[String]) -> Vec<Entity> {
    let mut found = Vec::new();

    for line in lines {
        for cap in PORT_RE.captures_iter(line) {
            if let Ok(number) = cap[1].parse::<u16>() {
                let entity = Entity::Port {
                    number,
                    proto: cap[2].to_string(),
                    service: cap.get(3).map(|m| m.as_str().to_string()),
                };
                if !found.contains(&entity) {
                    found.push(entity);
                }
            }
        }
        for cap in IPV4_RE.captures_iter(line) {
            if octets_valid(&cap[1]) {
                let entity = Entity::Ip {
                    address: cap[1].to_string(),
                };
                if !found.contains(&entity) {
                    found.push(entity);
                }
            }
        }
        for m in CVE_RE.find_iter(line) {
            let entity = Entity::Cve {
                id: m.as_str().to_string(),
            };
            if !found.contains(&entity) {
                found.push(entity);
            }
        }
    }

    found
}

fn octets_valid(candidate: &str) -> bool {
    candidate.split('.').all(|o| o.parse::<u16>().map(|v| v <= 255).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extracts_open_ports_with_service() {
        let found = extract_entities(&lines(&[
            "PORT   STATE SERVICE",
            "22/tcp open  ssh",
            "80/tcp open  http",
            "443/tcp closed https",
        ]));
        assert!(found.contains(&Entity::Port {
            number: 22,
            proto: "tcp".into(),
            service: Some("ssh".into())
        }));
        assert!(found.contains(&Entity::Port {
            number: 80,
            proto: "tcp".into(),
            service: Some("http".into())
        }));
        // closed ports are not entities
        assert!(!found.iter().any(|e| matches!(e, Entity::Port { number: 443, .. })));
    }

    #[test]
    fn test_extracts_ips_and_rejects_bad_octets() {
        let found = extract_entities(&lines(&["host 10.0.0.5 up", "bogus 999.1.1.1"]));
        assert!(found.contains(&Entity::Ip {
            address: "10.0.0.5".into()
        }));
        assert!(!found.iter().any(|e| matches!(e, Entity::Ip { address } if address == "999.1.1.1")));
    }

    #[test]
    fn test_extracts_cves_once() {
        let found = extract_entities(&lines(&[
            "vulnerable to CVE-2021-41773",
            "again: CVE-2021-41773 and CVE-2014-6271",
        ]));
        let cves: Vec<_> = found
            .iter()
            .filter(|e| matches!(e, Entity::Cve { .. }))
            .collect();
        assert_eq!(cves.len(), 2);
    }

    #[test]
    fn test_empty_input_extracts_nothing() {
        assert!(extract_entities(&[]).is_empty());
    }
}
