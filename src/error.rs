use serde::Serialize;

/// Failure taxonomy for a provisioning run.
///
/// Only `ProjectCreationFailed` aborts a run. Every other variant is recorded
/// against the device or edge it belongs to and excludes that entity's
/// dependents from later stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvisionError {
    #[error("device {device} unreachable: {reason}")]
    DeviceUnreachable { device: String, reason: String },

    #[error("authentication failed for device {device}: {reason}")]
    AuthenticationFailed { device: String, reason: String },

    #[error("malformed response from device {device}: {reason}")]
    MalformedResponse { device: String, reason: String },

    #[error("conflicting topology on {device} port {port}: {reason}")]
    ConflictingTopology {
        device: String,
        port: String,
        reason: String,
    },

    #[error("no matching template for device {device} (version {version}): {reason}")]
    NoMatchingTemplate {
        device: String,
        version: String,
        reason: String,
    },

    #[error("failed to create project {project}: {reason}")]
    ProjectCreationFailed { project: String, reason: String },

    #[error("failed to create node for device {device}: {reason}")]
    NodeCreationFailed { device: String, reason: String },

    #[error("failed to push config to device {device}: {reason}")]
    ConfigPushFailed { device: String, reason: String },

    #[error("failed to create link {link}: {reason}")]
    LinkCreationFailed { link: String, reason: String },
}

/// Configuration problems detected before a run starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    MissingField(&'static str),

    #[error("both a device file and a literal device list were supplied; choose one")]
    ConflictingDeviceSources,

    #[error("no device file or literal device list was supplied")]
    NoDeviceSource,

    #[error("device list is empty")]
    EmptyDeviceList,

    #[error("cannot read device list {path}: {source}")]
    DeviceListUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("cannot load sanitizer rules from {path}: {reason}")]
    RulesUnreadable { path: String, reason: String },
}
