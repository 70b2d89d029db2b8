use std::env;
use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

/// Config holds the raw settings for a run, as read from the environment
#[derive(Clone, Default)]
pub struct Config {
    pub devices: String,
    pub device_file: String,
    pub server: String,
    pub username: String,
    pub password: String,
    pub project: String,
    pub transport: String,
    pub max_workers: String,
    pub gns3_port: String,
    pub gns3_user: String,
    pub gns3_password: String,
    pub docker_port: String,
    pub request_timeout_secs: String,
    pub sanitizer_rules: String,
    pub reuse_project: String,
    pub close_project: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            devices: get_env("PTOV_DEVICES", ""),
            device_file: get_env("PTOV_DEVICE_FILE", ""),
            server: get_env("PTOV_SERVER", ""),
            username: get_env("PTOV_USERNAME", ""),
            password: get_env("PTOV_PASSWORD", ""),
            project: get_env("PTOV_PROJECT", ""),
            transport: get_env("PTOV_TRANSPORT", "eapi"),
            max_workers: get_env("PTOV_MAX_WORKERS", "20"),
            gns3_port: get_env("PTOV_GNS3_PORT", "3080"),
            gns3_user: get_env("PTOV_GNS3_USER", "admin"),
            gns3_password: get_env("PTOV_GNS3_PASSWORD", "admin"),
            docker_port: get_env("PTOV_DOCKER_PORT", "2375"),
            request_timeout_secs: get_env("PTOV_REQUEST_TIMEOUT_SECS", "30"),
            sanitizer_rules: get_env("PTOV_SANITIZER_RULES", ""),
            reuse_project: get_env("PTOV_REUSE_PROJECT", "false"),
            close_project: get_env("PTOV_CLOSE_PROJECT", "true"),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// How the collector talks to the physical switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Eapi,
    Ssh,
}

/// Username/password pair for the physical switches.
///
/// Handed to the device-query client and nowhere else.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Ordered, de-duplicated set of device identities to collect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceList(Vec<String>);

impl DeviceList {
    /// Parse newline, comma or whitespace separated device names.
    /// Blank entries and `#` comments are skipped; the first occurrence of a duplicate wins.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut devices: Vec<String> = Vec::new();
        for line in input.lines() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            for name in line.split(|c: char| c == ',' || c.is_whitespace()) {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                if !devices.iter().any(|d| d.eq_ignore_ascii_case(name)) {
                    devices.push(name.to_string());
                }
            }
        }

        if devices.is_empty() {
            return Err(ConfigError::EmptyDeviceList);
        }
        Ok(Self(devices))
    }

    /// Read a device list file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::DeviceListUnreadable {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Validated settings for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub devices: DeviceList,
    pub credentials: Credentials,
    pub transport: Transport,
    pub server: String,
    pub project: String,
    pub max_workers: usize,
    pub gns3_port: u16,
    pub gns3_user: String,
    pub gns3_password: String,
    pub docker_port: u16,
    pub request_timeout_secs: u64,
    pub sanitizer_rules: Option<String>,
    pub reuse_project: bool,
    pub close_project: bool,
}

impl RunConfig {
    /// Validate raw settings. Fails on the first missing or malformed value.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let devices = match (cfg.device_file.trim(), cfg.devices.trim()) {
            ("", "") => return Err(ConfigError::NoDeviceSource),
            (file, "") => DeviceList::from_file(Path::new(file))?,
            ("", list) => DeviceList::parse(list)?,
            _ => return Err(ConfigError::ConflictingDeviceSources),
        };

        let server = required("PTOV_SERVER", &cfg.server)?;
        let project = required("PTOV_PROJECT", &cfg.project)?;
        let username = required("PTOV_USERNAME", &cfg.username)?;
        if cfg.password.is_empty() {
            return Err(ConfigError::MissingField("PTOV_PASSWORD"));
        }

        let transport = match cfg.transport.trim().to_lowercase().as_str() {
            "" | "eapi" => Transport::Eapi,
            "ssh" => Transport::Ssh,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "PTOV_TRANSPORT",
                    value: other.to_string(),
                })
            }
        };

        let max_workers: usize = parse_value("PTOV_MAX_WORKERS", &cfg.max_workers)?;
        if max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PTOV_MAX_WORKERS",
                value: cfg.max_workers.clone(),
            });
        }

        Ok(Self {
            devices,
            credentials: Credentials {
                username,
                password: cfg.password.clone(),
            },
            transport,
            server,
            project,
            max_workers,
            gns3_port: parse_value("PTOV_GNS3_PORT", &cfg.gns3_port)?,
            gns3_user: cfg.gns3_user.clone(),
            gns3_password: cfg.gns3_password.clone(),
            docker_port: parse_value("PTOV_DOCKER_PORT", &cfg.docker_port)?,
            request_timeout_secs: parse_value("PTOV_REQUEST_TIMEOUT_SECS", &cfg.request_timeout_secs)?,
            sanitizer_rules: Some(cfg.sanitizer_rules.trim().to_string()).filter(|s| !s.is_empty()),
            reuse_project: parse_bool("PTOV_REUSE_PROJECT", &cfg.reuse_project)?,
            close_project: parse_bool("PTOV_CLOSE_PROJECT", &cfg.close_project)?,
        })
    }
}

fn required(key: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingField(key));
    }
    Ok(value.to_string())
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
