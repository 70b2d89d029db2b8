//! Turns EOS `| json` command output into DeviceRecord pieces.
//!
//! Both the eAPI and the SSH transport hand their decoded JSON to these
//! functions, so the two transports cannot drift apart.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use super::{QueryError, VersionInfo};
use crate::models::{InterfaceInfo, LldpLocalEntry, LldpNeighbor};
use crate::utils::interface_sort_key;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowVersion {
    version: String,
    #[serde(default)]
    model_name: String,
    #[serde(default)]
    system_mac_address: String,
    #[serde(default)]
    serial_number: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowInterfacesStatus {
    interface_statuses: HashMap<String, InterfaceStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterfaceStatus {
    #[serde(default)]
    interface_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowLldpLocalInfo {
    #[serde(default)]
    system_name: String,
    #[serde(default)]
    chassis_id: String,
    #[serde(default)]
    local_interface_info: HashMap<String, Value>,
}

/// `show lldp neighbors` (summary) row
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborSummary {
    port: String,
    neighbor_device: String,
    neighbor_port: String,
}

/// `show lldp neighbors detail` per-port block
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborDetailPort {
    #[serde(default)]
    lldp_neighbor_info: Vec<NeighborDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborDetail {
    #[serde(default)]
    chassis_id: String,
    #[serde(default)]
    system_name: String,
    #[serde(default)]
    neighbor_interface_info: NeighborInterfaceInfo,
}

#[derive(Deserialize, Default)]
struct NeighborInterfaceInfo {
    #[serde(default, rename = "interfaceId")]
    interface_id: String,
    #[serde(default, rename = "interfaceId_v2")]
    interface_id_v2: String,
}

impl NeighborInterfaceInfo {
    /// EOS quotes `interfaceId` ("\"Ethernet1\""); `interfaceId_v2` is the clean form
    fn port(&self) -> String {
        if !self.interface_id_v2.is_empty() {
            return self.interface_id_v2.clone();
        }
        self.interface_id.trim_matches('"').to_string()
    }
}

fn decode<T: serde::de::DeserializeOwned>(command: &str, value: Value) -> Result<T, QueryError> {
    serde_json::from_value(value)
        .map_err(|e| QueryError::Malformed(format!("unexpected `{}` output: {}", command, e)))
}

pub fn parse_version(value: Value) -> Result<VersionInfo, QueryError> {
    let v: ShowVersion = decode("show version", value)?;
    if v.version.trim().is_empty() {
        return Err(QueryError::Malformed("`show version` reported an empty version".to_string()));
    }
    Ok(VersionInfo {
        version: v.version.trim().to_string(),
        model: v.model_name,
        system_mac: v.system_mac_address,
        serial_number: v.serial_number,
    })
}

pub fn parse_interfaces(value: Value) -> Result<Vec<InterfaceInfo>, QueryError> {
    let status: ShowInterfacesStatus = decode("show interfaces status", value)?;
    let mut interfaces: Vec<InterfaceInfo> = status
        .interface_statuses
        .into_iter()
        .map(|(name, s)| InterfaceInfo {
            name,
            media: s.interface_type,
        })
        .collect();
    interfaces.sort_by_key(|i| interface_sort_key(&i.name));
    Ok(interfaces)
}

pub fn parse_lldp_local_info(value: Value) -> Result<Vec<LldpLocalEntry>, QueryError> {
    let info: ShowLldpLocalInfo = decode("show lldp local-info", value)?;
    if info.system_name.is_empty() && info.chassis_id.is_empty() {
        return Err(QueryError::Malformed(
            "`show lldp local-info` carried neither system name nor chassis id".to_string(),
        ));
    }

    let mut ports: Vec<String> = info.local_interface_info.into_keys().collect();
    ports.sort_by_key(|p| interface_sort_key(p));

    // Keep the device's identity even when LLDP runs on no port
    if ports.is_empty() {
        ports.push(String::new());
    }

    Ok(ports
        .into_iter()
        .map(|local_port| LldpLocalEntry {
            local_port,
            chassis_id: info.chassis_id.clone(),
            system_name: info.system_name.clone(),
        })
        .collect())
}

/// Accepts both the summary (`show lldp neighbors`) and the detail
/// (`show lldp neighbors detail`) shapes. Only the detail form carries chassis ids.
pub fn parse_lldp_neighbors(value: Value) -> Result<Vec<LldpNeighbor>, QueryError> {
    let table = value
        .get("lldpNeighbors")
        .cloned()
        .ok_or_else(|| QueryError::Malformed("`show lldp neighbors` output has no lldpNeighbors".to_string()))?;

    let mut neighbors = match table {
        Value::Array(_) => {
            let rows: Vec<NeighborSummary> = decode("show lldp neighbors", table)?;
            rows.into_iter()
                .map(|r| LldpNeighbor {
                    local_port: r.port,
                    remote_port: r.neighbor_port,
                    remote_chassis_id: String::new(),
                    remote_system_name: r.neighbor_device,
                })
                .collect::<Vec<_>>()
        }
        Value::Object(_) => {
            let ports: HashMap<String, NeighborDetailPort> = decode("show lldp neighbors detail", table)?;
            let mut out = Vec::new();
            for (local_port, block) in ports {
                for n in block.lldp_neighbor_info {
                    out.push(LldpNeighbor {
                        local_port: local_port.clone(),
                        remote_port: n.neighbor_interface_info.port(),
                        remote_chassis_id: n.chassis_id,
                        remote_system_name: n.system_name,
                    });
                }
            }
            out
        }
        other => {
            return Err(QueryError::Malformed(format!(
                "lldpNeighbors has unexpected type: {}",
                other
            )))
        }
    };

    neighbors.sort_by(|a, b| {
        interface_sort_key(&a.local_port)
            .cmp(&interface_sort_key(&b.local_port))
            .then_with(|| a.remote_system_name.cmp(&b.remote_system_name))
    });
    Ok(neighbors)
}

/// Split `show running-config` text into lines, dropping the trailing blank
pub fn parse_running_config(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect();
    while lines.last().map_or(false, |l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}
