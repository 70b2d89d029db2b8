mod device;
mod provisioning;
mod topology;

pub use device::*;
pub use provisioning::*;
pub use topology::*;

/// Where a cEOS container reads its startup configuration from
pub const STARTUP_CONFIG_PATH: &str = "/mnt/flash/startup-config";

/// Remote template available on the lab platform
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LabTemplate {
    pub template_id: String,
    pub name: String,
    #[serde(default)]
    pub template_type: String,
    /// Image reference carrying the version tag, e.g. "ceos:4.28.3M"
    #[serde(default)]
    pub image: String,
}
