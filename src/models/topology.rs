use serde::Serialize;
use std::fmt;

/// One end of a cable: a device identity and its local port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Endpoint {
    pub device: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(device: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.port)
    }
}

/// Which ends of the cable reported it over LLDP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    /// Only one device reported the cable
    SingleSided,
    /// Both devices reported each other
    BothSides,
}

/// A port claimed by more than one cable, or a peer whose LLDP identity is ambiguous
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyConflict {
    pub endpoint: Endpoint,
    pub reason: String,
}

/// LinkEdge is one inferred cable. `a` always sorts before `b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkEdge {
    pub a: Endpoint,
    pub b: Endpoint,
    pub observation: Observation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<TopologyConflict>,
}

impl LinkEdge {
    /// Build an edge with endpoints in canonical order
    pub fn canonical(x: Endpoint, y: Endpoint, observation: Observation) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            a,
            b,
            observation,
            conflict: None,
        }
    }

    pub fn key(&self) -> (Endpoint, Endpoint) {
        (self.a.clone(), self.b.clone())
    }

    pub fn touches(&self, device: &str) -> bool {
        self.a.device == device || self.b.device == device
    }
}

impl fmt::Display for LinkEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}
