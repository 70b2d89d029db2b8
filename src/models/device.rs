use serde::{Deserialize, Serialize};

/// One interface from the device's inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    /// Media/type as reported by the switch (e.g. "10GBASE-T", "EbraTestPhyPort")
    #[serde(default)]
    pub media: String,
}

/// LLDP local-info entry: how this device identifies itself on one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpLocalEntry {
    pub local_port: String,
    pub chassis_id: String,
    pub system_name: String,
}

/// LLDP neighbor entry: a peer seen on one of this device's ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpNeighbor {
    pub local_port: String,
    pub remote_port: String,
    pub remote_chassis_id: String,
    pub remote_system_name: String,
}

/// DeviceRecord is everything collected from one physical switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Identity as given in the device list (hostname or FQDN)
    pub identity: String,
    pub version: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system_mac: String,
    #[serde(default)]
    pub serial_number: String,
    pub interfaces: Vec<InterfaceInfo>,
    #[serde(skip_serializing)]
    pub startup_config: Vec<String>,
    pub lldp_local: Vec<LldpLocalEntry>,
    pub lldp_neighbors: Vec<LldpNeighbor>,
    /// Populated once by the sanitizer, never by the collector
    #[serde(skip_serializing)]
    pub transformed_config: Option<Vec<String>>,
}

impl DeviceRecord {
    /// LLDP system name this device advertises, if it reported any
    pub fn lldp_system_name(&self) -> Option<&str> {
        self.lldp_local
            .iter()
            .map(|l| l.system_name.as_str())
            .find(|s| !s.is_empty())
    }

    /// Chassis id this device advertises, if it reported any
    pub fn lldp_chassis_id(&self) -> Option<&str> {
        self.lldp_local
            .iter()
            .map(|l| l.chassis_id.as_str())
            .find(|s| !s.is_empty())
    }
}
