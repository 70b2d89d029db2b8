pub mod client;
pub mod types;

pub use client::Gns3Client;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::LabTemplate;

/// What the orchestrator asks the lab platform to instantiate for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub template_id: String,
    /// Adapter count, management adapter included
    pub interface_count: u32,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedNode {
    pub node_id: String,
    /// Backing container, target of the config push
    pub container_id: String,
}

/// One end of a lab link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSide {
    pub node_id: String,
    pub adapter_number: u32,
    pub port_number: u32,
}

/// Project/node/link API of the emulation host
#[async_trait]
pub trait LabPlatform: Send + Sync {
    async fn list_templates(&self) -> Result<Vec<LabTemplate>>;

    /// Create the project, or return the existing one of that name when `reuse` is set
    async fn create_project(&self, name: &str, reuse: bool) -> Result<String>;

    async fn create_node(&self, project_id: &str, spec: &NodeSpec) -> Result<CreatedNode>;

    async fn create_link(&self, project_id: &str, a: &LinkSide, b: &LinkSide) -> Result<String>;

    async fn close_project(&self, project_id: &str) -> Result<()>;

    fn project_url(&self, _project_id: &str) -> Option<String> {
        None
    }
}

const GRID_START: (i32, i32) = (-825, -375);
const GRID_STEP_X: i32 = 150;
const GRID_STEP_Y: i32 = 200;
const GRID_MAX_X: i32 = 400;
const GRID_WRAP_X: i32 = -800;

/// Canvas position of the `index`-th node
pub fn grid_position(index: usize) -> (i32, i32) {
    let (mut x, mut y) = GRID_START;
    for _ in 0..index {
        x += GRID_STEP_X;
        if x > GRID_MAX_X {
            x = GRID_WRAP_X;
            y += GRID_STEP_Y;
        }
    }
    (x, y)
}
