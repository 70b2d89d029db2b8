//! Infers the cabling between collected devices from their LLDP tables.
//!
//! Every cable is normally reported twice, once from each end. Both reports
//! collapse onto one canonical edge; a cable seen from one end only is still
//! kept. Neighbors outside the collected set are dropped without error.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{DeviceRecord, Endpoint, LinkEdge, LldpNeighbor, Observation, TopologyConflict};
use crate::utils::{normalize_mac, short_hostname};

/// Lookup from LLDP identity to device index. `None` marks a key shared by
/// two devices, which can never resolve.
struct PeerIndex {
    by_name: HashMap<String, Option<usize>>,
    by_short_name: HashMap<String, Option<usize>>,
    by_chassis: HashMap<String, Option<usize>>,
    /// Devices that advertised at least one chassis id
    has_chassis: Vec<bool>,
}

enum PeerMatch {
    Known(usize),
    Unknown,
    /// System name and chassis id point at different devices
    Disagree { by_name: usize, by_chassis: usize },
}

fn claim(map: &mut HashMap<String, Option<usize>>, key: String, idx: usize) {
    if key.is_empty() {
        return;
    }
    match map.entry(key) {
        Entry::Vacant(v) => {
            v.insert(Some(idx));
        }
        Entry::Occupied(mut o) => {
            if *o.get() != Some(idx) {
                o.insert(None);
            }
        }
    }
}

impl PeerIndex {
    fn new(records: &[DeviceRecord]) -> Self {
        let mut by_name = HashMap::new();
        let mut by_short_name = HashMap::new();
        let mut by_chassis = HashMap::new();
        let mut has_chassis = vec![false; records.len()];

        for (idx, record) in records.iter().enumerate() {
            let names = std::iter::once(record.identity.as_str()).chain(record.lldp_system_name());
            for name in names {
                claim(&mut by_name, name.trim().to_lowercase(), idx);
                claim(&mut by_short_name, short_hostname(name), idx);
            }

            // EOS advertises the system MAC as its chassis id
            let chassis = std::iter::once(record.system_mac.as_str()).chain(record.lldp_chassis_id());
            for c in chassis {
                if !c.trim().is_empty() {
                    claim(&mut by_chassis, normalize_mac(c), idx);
                    has_chassis[idx] = true;
                }
            }
        }

        Self {
            by_name,
            by_short_name,
            by_chassis,
            has_chassis,
        }
    }

    /// Exact name first. Short names only bridge a qualified and an
    /// unqualified name, never two different domains.
    fn lookup_name(&self, name: &str) -> Option<usize> {
        let full = name.trim().to_lowercase();
        if full.is_empty() {
            return None;
        }
        if let Some(hit) = self.by_name.get(&full) {
            return *hit;
        }
        if full.contains('.') {
            // only a device known by its bare name can match
            self.by_name.get(&short_hostname(&full)).copied().flatten()
        } else {
            self.by_short_name.get(&full).copied().flatten()
        }
    }

    fn lookup_chassis(&self, chassis_id: &str) -> Option<usize> {
        if chassis_id.trim().is_empty() {
            return None;
        }
        self.by_chassis.get(&normalize_mac(chassis_id)).copied().flatten()
    }

    /// A chassis id that no collected device advertised
    fn is_foreign_chassis(&self, chassis_id: &str) -> bool {
        !chassis_id.trim().is_empty() && !self.by_chassis.contains_key(&normalize_mac(chassis_id))
    }

    fn resolve(&self, neighbor: &LldpNeighbor) -> PeerMatch {
        let by_name = self.lookup_name(&neighbor.remote_system_name);
        let by_chassis = self.lookup_chassis(&neighbor.remote_chassis_id);
        match (by_name, by_chassis) {
            (Some(n), Some(c)) if n != c => PeerMatch::Disagree {
                by_name: n,
                by_chassis: c,
            },
            // a namesake whose own chassis id differs is some other box
            (Some(n), None) if self.has_chassis[n] && self.is_foreign_chassis(&neighbor.remote_chassis_id) => {
                PeerMatch::Unknown
            }
            (Some(idx), _) | (None, Some(idx)) => PeerMatch::Known(idx),
            (None, None) => PeerMatch::Unknown,
        }
    }
}

#[derive(Default)]
struct EdgeDraft {
    reporters: BTreeSet<usize>,
    conflict: Option<TopologyConflict>,
}

/// Build the deduplicated, undirected link graph over `records`.
///
/// Edges come back sorted by their canonical endpoints, so the output is a
/// pure function of the input set.
pub fn build(records: &[DeviceRecord]) -> Vec<LinkEdge> {
    let index = PeerIndex::new(records);
    let mut drafts: BTreeMap<(Endpoint, Endpoint), EdgeDraft> = BTreeMap::new();
    let mut dropped = 0usize;

    for (idx, record) in records.iter().enumerate() {
        for neighbor in &record.lldp_neighbors {
            if neighbor.local_port.is_empty() || neighbor.remote_port.is_empty() {
                dropped += 1;
                continue;
            }

            let (peer, conflict_reason) = match index.resolve(neighbor) {
                PeerMatch::Unknown => {
                    tracing::debug!(
                        "{}:{} neighbor {} is outside the device set",
                        record.identity,
                        neighbor.local_port,
                        neighbor.remote_system_name
                    );
                    dropped += 1;
                    continue;
                }
                PeerMatch::Known(peer) => (peer, None),
                PeerMatch::Disagree { by_name, by_chassis } => (
                    by_name,
                    Some(format!(
                        "neighbor system name {:?} matches {} but chassis id {} matches {}",
                        neighbor.remote_system_name,
                        records[by_name].identity,
                        neighbor.remote_chassis_id,
                        records[by_chassis].identity
                    )),
                ),
            };

            if peer == idx {
                tracing::warn!(
                    "{}:{} reports itself as its own neighbor; ignoring",
                    record.identity,
                    neighbor.local_port
                );
                dropped += 1;
                continue;
            }

            let local = Endpoint::new(record.identity.as_str(), neighbor.local_port.as_str());
            let remote = Endpoint::new(records[peer].identity.as_str(), neighbor.remote_port.as_str());
            let edge = LinkEdge::canonical(local.clone(), remote, Observation::SingleSided);

            let draft = drafts.entry(edge.key()).or_default();
            draft.reporters.insert(idx);
            if let Some(reason) = conflict_reason {
                draft.conflict.get_or_insert(TopologyConflict { endpoint: local, reason });
            }
        }
    }

    flag_shared_ports(&mut drafts);

    let edges: Vec<LinkEdge> = drafts
        .into_iter()
        .map(|((a, b), draft)| LinkEdge {
            a,
            b,
            observation: if draft.reporters.len() > 1 {
                Observation::BothSides
            } else {
                Observation::SingleSided
            },
            conflict: draft.conflict,
        })
        .collect();

    let conflicts = edges.iter().filter(|e| e.conflict.is_some()).count();
    tracing::info!(
        "Inferred {} links from {} devices ({} neighbor entries dropped, {} conflicting links)",
        edges.len(),
        records.len(),
        dropped,
        conflicts
    );
    edges
}

/// A port can terminate one cable. Every edge sharing a port with another edge is flagged.
fn flag_shared_ports(drafts: &mut BTreeMap<(Endpoint, Endpoint), EdgeDraft>) {
    let mut claims: BTreeMap<Endpoint, Vec<(Endpoint, Endpoint)>> = BTreeMap::new();
    for key in drafts.keys() {
        claims.entry(key.0.clone()).or_default().push(key.clone());
        claims.entry(key.1.clone()).or_default().push(key.clone());
    }

    for (endpoint, keys) in claims {
        if keys.len() < 2 {
            continue;
        }
        for key in &keys {
            let others: Vec<String> = keys
                .iter()
                .filter(|k| *k != key)
                .map(|(a, b)| if *a == endpoint { b.to_string() } else { a.to_string() })
                .collect();
            if let Some(draft) = drafts.get_mut(key) {
                draft.conflict.get_or_insert(TopologyConflict {
                    endpoint: endpoint.clone(),
                    reason: format!("port {} is also cabled to {}", endpoint, others.join(", ")),
                });
            }
        }
    }
}

/// Lab adapter number for a switch port: Management* is adapter 0,
/// EthernetN (and its lanes EthernetN/M) is adapter N.
pub fn adapter_number(port: &str) -> Option<u32> {
    let lower = port.trim().to_lowercase();
    if lower.starts_with("management") {
        return Some(0);
    }
    let rest = lower
        .strip_prefix("ethernet")
        .or_else(|| lower.strip_prefix("et"))?;
    rest.split('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LldpLocalEntry;

    fn record(identity: &str, chassis: &str, neighbors: &[(&str, &str, &str, &str)]) -> DeviceRecord {
        DeviceRecord {
            identity: identity.to_string(),
            version: "4.28.3M".to_string(),
            model: "cEOSLab".to_string(),
            system_mac: String::new(),
            serial_number: String::new(),
            interfaces: Vec::new(),
            startup_config: Vec::new(),
            lldp_local: vec![LldpLocalEntry {
                local_port: "Ethernet1".to_string(),
                chassis_id: chassis.to_string(),
                system_name: identity.to_string(),
            }],
            lldp_neighbors: neighbors
                .iter()
                .map(|(local, peer, peer_chassis, remote)| LldpNeighbor {
                    local_port: local.to_string(),
                    remote_port: remote.to_string(),
                    remote_chassis_id: peer_chassis.to_string(),
                    remote_system_name: peer.to_string(),
                })
                .collect(),
            transformed_config: None,
        }
    }

    const A: &str = "001c.7300.000a";
    const B: &str = "001c.7300.000b";
    const C: &str = "001c.7300.000c";

    #[test]
    fn test_symmetric_reports_collapse_to_one_edge() {
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", B, "Ethernet2")]),
            record("sw-b", B, &[("Ethernet2", "sw-a", A, "Ethernet1")]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].a, Endpoint::new("sw-a", "Ethernet1"));
        assert_eq!(edges[0].b, Endpoint::new("sw-b", "Ethernet2"));
        assert_eq!(edges[0].observation, Observation::BothSides);
        assert!(edges[0].conflict.is_none());
    }

    #[test]
    fn test_build_is_order_independent() {
        let a = record("sw-a", A, &[("Ethernet1", "sw-b", B, "Ethernet2")]);
        let b = record("sw-b", B, &[("Ethernet2", "sw-a", A, "Ethernet1")]);
        assert_eq!(build(&[a.clone(), b.clone()]), build(&[b, a]));
    }

    #[test]
    fn test_full_mesh_of_three() {
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", B, "Ethernet1"), ("Ethernet2", "sw-c", C, "Ethernet1")]),
            record("sw-b", B, &[("Ethernet1", "sw-a", A, "Ethernet1"), ("Ethernet2", "sw-c", C, "Ethernet2")]),
            record("sw-c", C, &[("Ethernet1", "sw-a", A, "Ethernet2"), ("Ethernet2", "sw-b", B, "Ethernet2")]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 3);
        assert!(edges.iter().all(|e| e.observation == Observation::BothSides));
        assert!(edges.iter().all(|e| e.conflict.is_none()));
    }

    #[test]
    fn test_neighbor_outside_set_is_dropped() {
        let records = vec![record("sw-a", A, &[("Ethernet1", "core-router", "001c.7399.9999", "Ethernet7")])];
        assert!(build(&records).is_empty());
    }

    #[test]
    fn test_single_sided_report_still_yields_edge() {
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", B, "Ethernet2")]),
            record("sw-b", B, &[]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].observation, Observation::SingleSided);
    }

    #[test]
    fn test_self_neighbor_is_ignored() {
        let records = vec![record("sw-a", A, &[("Ethernet1", "sw-a", A, "Ethernet2")])];
        assert!(build(&records).is_empty());
    }

    #[test]
    fn test_resolves_by_chassis_id_and_short_name() {
        let records = vec![
            record("sw-a.dc1.example.net", A, &[("Ethernet1", "", B, "Ethernet1")]),
            record("sw-b", B, &[("Ethernet1", "SW-A.dc1.example.net", "", "Ethernet1")]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].observation, Observation::BothSides);
    }

    #[test]
    fn test_short_name_bridges_bare_and_qualified_names() {
        let records = vec![
            record("leaf1", A, &[("Ethernet1", "spine1.dc1.example.net", "", "Ethernet3")]),
            record("spine1.dc1.example.net", B, &[("Ethernet3", "leaf1.dc1.example.net", "", "Ethernet1")]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].a, Endpoint::new("leaf1", "Ethernet1"));
        assert_eq!(edges[0].observation, Observation::BothSides);
    }

    #[test]
    fn test_other_site_namesake_is_not_a_peer() {
        let records = vec![
            record("leaf1.dc1.example.net", A, &[]),
            record(
                "spine1.dc1.example.net",
                B,
                &[("Ethernet7", "leaf1.dc2.example.net", "001c.7300.00ff", "Ethernet49")],
            ),
        ];
        let edges = build(&records);
        assert!(edges.is_empty(), "unexpected edges: {:?}", edges);
    }

    #[test]
    fn test_name_match_with_foreign_chassis_is_dropped() {
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", "001c.7300.00ff", "Ethernet1")]),
            record("sw-b", B, &[]),
        ];
        assert!(build(&records).is_empty());

        // nothing to compare against when sw-b never advertised a chassis id
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", "001c.7300.00ff", "Ethernet1")]),
            record("sw-b", "", &[]),
        ];
        assert_eq!(build(&records).len(), 1);
    }

    #[test]
    fn test_port_cabled_to_two_peers_is_conflict() {
        // sw-a says Ethernet1 goes to sw-b, sw-c says its Ethernet1 goes to sw-a:Ethernet1 too
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", B, "Ethernet1")]),
            record("sw-b", B, &[]),
            record("sw-c", C, &[("Ethernet1", "sw-a", A, "Ethernet1")]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 2);
        for edge in &edges {
            let conflict = edge.conflict.as_ref().expect("edge should be flagged");
            assert_eq!(conflict.endpoint, Endpoint::new("sw-a", "Ethernet1"));
        }
    }

    #[test]
    fn test_mismatched_remote_ports_are_conflict() {
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", B, "Ethernet1")]),
            record("sw-b", B, &[("Ethernet1", "sw-a", A, "Ethernet2")]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.conflict.is_some()));
    }

    #[test]
    fn test_name_and_chassis_disagreement_is_conflict() {
        let records = vec![
            record("sw-a", A, &[("Ethernet1", "sw-b", C, "Ethernet1")]),
            record("sw-b", B, &[]),
            record("sw-c", C, &[]),
        ];
        let edges = build(&records);
        assert_eq!(edges.len(), 1);
        let conflict = edges[0].conflict.as_ref().unwrap();
        assert_eq!(conflict.endpoint, Endpoint::new("sw-a", "Ethernet1"));
        assert!(conflict.reason.contains("sw-c"));
    }

    #[test]
    fn test_adapter_number() {
        assert_eq!(adapter_number("Ethernet12"), Some(12));
        assert_eq!(adapter_number("Ethernet49/1"), Some(49));
        assert_eq!(adapter_number("Et3"), Some(3));
        assert_eq!(adapter_number("Management1"), Some(0));
        assert_eq!(adapter_number("Port-Channel10"), None);
    }
}
