pub mod eapi;
pub mod parse;
pub mod ssh;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::config::DeviceList;
use crate::error::ProvisionError;
use crate::models::{DeviceRecord, InterfaceInfo, LldpLocalEntry, LldpNeighbor};

pub use eapi::EapiClient;
pub use ssh::SshClient;

/// Transport-level failure while querying a switch
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    Unreachable(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Malformed(String),
}

impl QueryError {
    /// Attach the device identity and lift into the run taxonomy
    pub fn for_device(self, device: &str) -> ProvisionError {
        let device = device.to_string();
        match self {
            Self::Unreachable(reason) => ProvisionError::DeviceUnreachable { device, reason },
            Self::Auth(reason) => ProvisionError::AuthenticationFailed { device, reason },
            Self::Malformed(reason) => ProvisionError::MalformedResponse { device, reason },
        }
    }
}

/// Identity details from `show version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub model: String,
    pub system_mac: String,
    pub serial_number: String,
}

/// Read-only queries against one physical switch
#[async_trait]
pub trait DeviceQuery: Send + Sync {
    async fn get_version(&self, device: &str) -> Result<VersionInfo, QueryError>;
    async fn get_running_config(&self, device: &str) -> Result<Vec<String>, QueryError>;
    async fn get_interfaces(&self, device: &str) -> Result<Vec<InterfaceInfo>, QueryError>;
    async fn get_lldp_neighbors(&self, device: &str) -> Result<Vec<LldpNeighbor>, QueryError>;
    async fn get_lldp_local_info(&self, device: &str) -> Result<Vec<LldpLocalEntry>, QueryError>;
    /// Done with `device`; drop anything held open for it
    fn release(&self, _device: &str) {}
}

/// Raw EOS command execution; implemented by each transport
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a show command and return its decoded JSON output
    async fn run_json(&self, device: &str, command: &str) -> Result<serde_json::Value, QueryError>;
    /// Run a show command and return its text output
    async fn run_text(&self, device: &str, command: &str) -> Result<String, QueryError>;
    /// Close any connection kept open for `device`
    fn release(&self, _device: &str) {}
}

/// DeviceQuery over any EOS command transport
pub struct EosDevices<R> {
    runner: R,
}

impl<R: CommandRunner> EosDevices<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: CommandRunner> DeviceQuery for EosDevices<R> {
    async fn get_version(&self, device: &str) -> Result<VersionInfo, QueryError> {
        parse::parse_version(self.runner.run_json(device, "show version").await?)
    }

    async fn get_running_config(&self, device: &str) -> Result<Vec<String>, QueryError> {
        let text = self.runner.run_text(device, "show running-config").await?;
        Ok(parse::parse_running_config(&text))
    }

    async fn get_interfaces(&self, device: &str) -> Result<Vec<InterfaceInfo>, QueryError> {
        parse::parse_interfaces(self.runner.run_json(device, "show interfaces status").await?)
    }

    async fn get_lldp_neighbors(&self, device: &str) -> Result<Vec<LldpNeighbor>, QueryError> {
        parse::parse_lldp_neighbors(self.runner.run_json(device, "show lldp neighbors detail").await?)
    }

    async fn get_lldp_local_info(&self, device: &str) -> Result<Vec<LldpLocalEntry>, QueryError> {
        parse::parse_lldp_local_info(self.runner.run_json(device, "show lldp local-info").await?)
    }

    fn release(&self, device: &str) {
        self.runner.release(device);
    }
}

/// Collect one device's state. The first failing query decides the error.
pub async fn collect_device(query: &dyn DeviceQuery, device: &str) -> Result<DeviceRecord, ProvisionError> {
    let version = query.get_version(device).await.map_err(|e| e.for_device(device))?;
    let interfaces = query.get_interfaces(device).await.map_err(|e| e.for_device(device))?;
    let lldp_local = query.get_lldp_local_info(device).await.map_err(|e| e.for_device(device))?;
    let lldp_neighbors = query.get_lldp_neighbors(device).await.map_err(|e| e.for_device(device))?;
    let startup_config = query.get_running_config(device).await.map_err(|e| e.for_device(device))?;

    Ok(DeviceRecord {
        identity: device.to_string(),
        version: version.version,
        model: version.model,
        system_mac: version.system_mac,
        serial_number: version.serial_number,
        interfaces,
        startup_config,
        lldp_local,
        lldp_neighbors,
        transformed_config: None,
    })
}

/// Collect every device with at most `max_workers` in flight.
///
/// Returns exactly one entry per input device, in input order. A failure for
/// one device never stops collection of the others.
pub async fn collect_all(
    query: Arc<dyn DeviceQuery>,
    devices: &DeviceList,
    max_workers: usize,
) -> Vec<(String, Result<DeviceRecord, ProvisionError>)> {
    tracing::info!("Polling {} switches ({} workers)", devices.len(), max_workers);

    let results: Vec<(String, Result<DeviceRecord, ProvisionError>)> = stream::iter(devices.iter().cloned())
        .map(|device| {
            let query = query.clone();
            async move {
                let result = collect_device(query.as_ref(), &device).await;
                query.release(&device);
                match &result {
                    Ok(record) => tracing::info!(
                        "Finished polling {} (EOS {}, {} LLDP neighbors)",
                        device,
                        record.version,
                        record.lldp_neighbors.len()
                    ),
                    Err(e) => tracing::warn!("Polling failed: {}", e),
                }
                (device, result)
            }
        })
        .buffered(max_workers.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    tracing::info!("Finished polling switches ({} ok, {} failed)", results.len() - failed, failed);
    results
}
