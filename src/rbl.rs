//! RBL server descriptors and aggregate zone definitions, loaded from JSON
//! files at startup.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MimirError, Result};

/// One upstream RBL. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RblServer {
    /// Display name, e.g. "Spamhaus ZEN"
    pub name: String,
    /// Zone suffix queried upstream, e.g. "zen.spamhaus.org"
    pub host: String,
    #[serde(default)]
    pub description: String,
}

/// The `rbls` field of an aggregate zone file entry: `"*"` or a list of RBL
/// hosts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RblSelection {
    Wildcard(String),
    Hosts(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
struct AggregateZoneEntry {
    pub domain: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rbls: RblSelection,
}

/// An aggregate zone with its RBL set already expanded by value; a `"*"`
/// selection is resolved against the full RBL list at load time.
#[derive(Debug, Clone)]
pub struct AggregateZone {
    pub domain: String,
    pub description: Option<String>,
    pub rbls: Vec<RblServer>,
}

/// Load the RBL server list. Hosts are normalized to lowercase; duplicate
/// hosts are rejected.
pub fn load_rbl_servers(path: &Path) -> Result<Vec<RblServer>> {
    let data = std::fs::read_to_string(path)?;
    let mut servers: Vec<RblServer> = serde_json::from_str(&data)
        .map_err(|e| MimirError::ConfigParseError(format!("{}: {}", path.display(), e)))?;

    for server in &mut servers {
        server.host = server.host.trim_end_matches('.').to_lowercase();
        if server.host.is_empty() {
            return Err(MimirError::ConfigParseError(format!(
                "{}: RBL '{}' has an empty host",
                path.display(),
                server.name
            )));
        }
    }

    for (i, server) in servers.iter().enumerate() {
        if servers[..i].iter().any(|s| s.host == server.host) {
            return Err(MimirError::ConfigParseError(format!(
                "{}: duplicate RBL host {}",
                path.display(),
                server.host
            )));
        }
    }

    info!("Loaded {} RBL servers from {}", servers.len(), path.display());
    Ok(servers)
}

/// Load aggregate zone definitions and expand each zone's RBL selection
/// against the loaded server list.
pub fn load_aggregate_zones(path: &Path, rbls: &[RblServer]) -> Result<Vec<Arc<AggregateZone>>> {
    let data = std::fs::read_to_string(path)?;
    let entries: Vec<AggregateZoneEntry> = serde_json::from_str(&data)
        .map_err(|e| MimirError::ConfigParseError(format!("{}: {}", path.display(), e)))?;

    let mut zones = Vec::with_capacity(entries.len());
    for entry in entries {
        let domain = entry.domain.trim_end_matches('.').to_lowercase();
        if domain.is_empty() {
            return Err(MimirError::ConfigParseError(format!(
                "{}: aggregate zone with empty domain",
                path.display()
            )));
        }

        let selected = match &entry.rbls {
            RblSelection::Wildcard(token) => {
                if token != "*" {
                    return Err(MimirError::ConfigParseError(format!(
                        "{}: zone {}: rbls must be \"*\" or a list of hosts",
                        path.display(),
                        domain
                    )));
                }
                // Expanded by value: later edits to the server list never
                // change an already-loaded zone.
                rbls.to_vec()
            }
            RblSelection::Hosts(hosts) => {
                let mut selected = Vec::with_capacity(hosts.len());
                for host in hosts {
                    let host = host.trim_end_matches('.').to_lowercase();
                    match rbls.iter().find(|s| s.host == host) {
                        Some(server) => selected.push(server.clone()),
                        None => {
                            warn!(
                                "Aggregate zone {} references unknown RBL host {}, skipping it",
                                domain, host
                            );
                        }
                    }
                }
                selected
            }
        };

        if selected.is_empty() {
            warn!("Aggregate zone {} has no usable RBLs", domain);
        }

        zones.push(Arc::new(AggregateZone {
            domain,
            description: entry.description,
            rbls: selected,
        }));
    }

    info!(
        "Loaded {} aggregate zones from {}",
        zones.len(),
        path.display()
    );
    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn sample_servers() -> Vec<RblServer> {
        vec![
            RblServer {
                name: "A".into(),
                host: "a.example.org".into(),
                description: String::new(),
            },
            RblServer {
                name: "B".into(),
                host: "b.example.org".into(),
                description: String::new(),
            },
        ]
    }

    #[test]
    fn test_load_rbl_servers() {
        let file = write_temp(
            r#"[
                {"name": "Spamhaus ZEN", "host": "ZEN.Spamhaus.org", "description": "combined list"},
                {"name": "SpamCop", "host": "bl.spamcop.net"}
            ]"#,
        );
        let servers = load_rbl_servers(file.path()).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].host, "zen.spamhaus.org");
        assert_eq!(servers[1].description, "");
    }

    #[test]
    fn test_duplicate_hosts_rejected() {
        let file = write_temp(
            r#"[
                {"name": "One", "host": "bl.example.org"},
                {"name": "Two", "host": "BL.example.org."}
            ]"#,
        );
        assert!(load_rbl_servers(file.path()).is_err());
    }

    #[test]
    fn test_wildcard_expansion_is_by_value() {
        let file = write_temp(
            r#"[{"domain": "multi.example.com", "rbls": "*"}]"#,
        );
        let zones = load_aggregate_zones(file.path(), &sample_servers()).unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].rbls.len(), 2);
    }

    #[test]
    fn test_host_selection_skips_unknown() {
        let file = write_temp(
            r#"[{"domain": "some.example.com", "description": "subset",
                 "rbls": ["a.example.org", "missing.example.net"]}]"#,
        );
        let zones = load_aggregate_zones(file.path(), &sample_servers()).unwrap();
        assert_eq!(zones[0].rbls.len(), 1);
        assert_eq!(zones[0].rbls[0].host, "a.example.org");
        assert_eq!(zones[0].description.as_deref(), Some("subset"));
    }

    #[test]
    fn test_bad_wildcard_token_rejected() {
        let file = write_temp(r#"[{"domain": "multi.example.com", "rbls": "all"}]"#);
        assert!(load_aggregate_zones(file.path(), &sample_servers()).is_err());
    }
}
