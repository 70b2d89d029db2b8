//! Run coordinator: collect, infer, then materialize the lab.
//!
//! Stages run strictly in order. Within a stage, devices and links are
//! processed concurrently with at most `max_workers` calls in flight, and a
//! failure only excludes the work that depends on it.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::DeviceList;
use crate::docker::ContainerFiles;
use crate::error::ProvisionError;
use crate::gns3::{grid_position, CreatedNode, LabPlatform, LinkSide, NodeSpec};
use crate::matcher::match_template;
use crate::models::{
    DeviceOutcome, DeviceRecord, LabTemplate, LinkEdge, LinkOutcome, ProvisioningResult, RunState,
    StepOutcome, STARTUP_CONFIG_PATH,
};
use crate::poller::{collect_all, DeviceQuery};
use crate::sanitizer::{apply_system_mac, count_ethernet_interfaces, Sanitizer};
use crate::topology::{self, adapter_number};
use crate::utils::normalize_mac;

/// Per-run knobs
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub project: String,
    pub max_workers: usize,
    pub reuse_project: bool,
    pub close_project: bool,
}

pub struct Orchestrator {
    query: Arc<dyn DeviceQuery>,
    platform: Arc<dyn LabPlatform>,
    files: Arc<dyn ContainerFiles>,
    sanitizer: Sanitizer,
    options: RunOptions,
}

/// Per-device step results as they are decided. A `None` step was never reached.
struct DeviceProgress {
    device: String,
    collection: StepOutcome,
    version: Option<String>,
    template: Option<StepOutcome>,
    node: Option<StepOutcome>,
    config_push: Option<StepOutcome>,
}

/// Outcome for a step that never ran, explained by the step before it
fn blocked_by(previous: &StepOutcome, step: &str) -> StepOutcome {
    match previous {
        StepOutcome::Skipped { reason } => StepOutcome::skipped(reason.clone()),
        StepOutcome::Failed { .. } => StepOutcome::skipped(format!("{} failed", step)),
        StepOutcome::Succeeded { .. } => StepOutcome::skipped("not attempted"),
    }
}

impl DeviceProgress {
    fn finish(self) -> DeviceOutcome {
        let template = self
            .template
            .unwrap_or_else(|| blocked_by(&self.collection, "collection"));
        let node = self.node.unwrap_or_else(|| blocked_by(&template, "template match"));
        let config_push = self
            .config_push
            .unwrap_or_else(|| blocked_by(&node, "node creation"));

        DeviceOutcome {
            device: self.device,
            collection: self.collection,
            version: self.version,
            template,
            node,
            config_push,
        }
    }
}

/// A device that is ready for node creation
struct NodePlan {
    slot: usize,
    spec: NodeSpec,
    config: String,
}

impl Orchestrator {
    pub fn new(
        query: Arc<dyn DeviceQuery>,
        platform: Arc<dyn LabPlatform>,
        files: Arc<dyn ContainerFiles>,
        sanitizer: Sanitizer,
        options: RunOptions,
    ) -> Self {
        Self {
            query,
            platform,
            files,
            sanitizer,
            options,
        }
    }

    fn workers(&self) -> usize {
        self.options.max_workers.max(1)
    }

    /// Provision a lab for `devices`.
    ///
    /// Only a failed project creation is an `Err`; every other failure is
    /// recorded in the returned result.
    pub async fn run(&self, devices: &DeviceList) -> Result<ProvisioningResult, ProvisionError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let project = self.options.project.as_str();
        tracing::info!("Run {} started for project {} ({} devices)", run_id, project, devices.len());

        // --- Collecting ---
        enter(&run_id, RunState::Collecting);
        let mut progress = Vec::with_capacity(devices.len());
        let mut slots: Vec<usize> = Vec::new();
        let mut records: Vec<DeviceRecord> = Vec::new();
        for (slot, (device, result)) in collect_all(self.query.clone(), devices, self.workers())
            .await
            .into_iter()
            .enumerate()
        {
            let (collection, version) = match result {
                Ok(record) => {
                    let version = record.version.clone();
                    slots.push(slot);
                    records.push(record);
                    (StepOutcome::ok(), Some(version))
                }
                Err(error) => (StepOutcome::Failed { error }, None),
            };
            progress.push(DeviceProgress {
                device,
                collection,
                version,
                template: None,
                node: None,
                config_push: None,
            });
        }

        // --- Inferring ---
        enter(&run_id, RunState::Inferring);
        let edges = topology::build(&records);
        for record in records.iter_mut() {
            let transformed = self.sanitizer.transform(&record.startup_config, &record.version);
            let mac = if record.system_mac.is_empty() {
                record.lldp_chassis_id().unwrap_or("")
            } else {
                record.system_mac.as_str()
            };
            record.transformed_config = Some(apply_system_mac(&transformed, &normalize_mac(mac)));
        }

        let templates = self.load_templates().await;
        let mut plans = Vec::new();
        for (&slot, record) in slots.iter().zip(&records) {
            let bound = match &templates {
                Ok(templates) => match_template(&record.identity, &record.version, templates),
                Err(reason) => Err(ProvisionError::NoMatchingTemplate {
                    device: record.identity.clone(),
                    version: record.version.clone(),
                    reason: reason.clone(),
                }),
            };
            match bound {
                Ok(template) => {
                    tracing::info!(
                        "{} (EOS {}) -> template {} ({})",
                        record.identity,
                        record.version,
                        template.name,
                        template.template_id
                    );
                    progress[slot].template = Some(StepOutcome::ok_with(template.template_id.clone()));
                    plans.push(self.plan_node(slot, plans.len(), record, template));
                }
                Err(error) => {
                    tracing::warn!("{}", error);
                    progress[slot].template = Some(StepOutcome::Failed { error });
                }
            }
        }

        // --- CreatingProject ---
        enter(&run_id, RunState::CreatingProject);
        let project_id = match self.platform.create_project(project, self.options.reuse_project).await {
            Ok(id) => id,
            Err(e) => {
                let error = ProvisionError::ProjectCreationFailed {
                    project: project.to_string(),
                    reason: format!("{:#}", e),
                };
                tracing::error!("Run {} aborted: {}", run_id, error);
                return Err(error);
            }
        };
        tracing::info!("Project {} ready ({})", project, project_id);

        // --- CreatingNodes ---
        enter(&run_id, RunState::CreatingNodes);
        let nodes = self.create_nodes(&project_id, &plans, &mut progress).await;
        for plan in plans.iter().filter(|p| !nodes.contains_key(&p.slot)) {
            let blocked = edges.iter().filter(|e| e.touches(&plan.spec.name)).count();
            if blocked > 0 {
                tracing::warn!("{} links of {} will be skipped", blocked, plan.spec.name);
            }
        }

        // --- PushingConfig ---
        enter(&run_id, RunState::PushingConfig);
        self.push_configs(&plans, &nodes, &mut progress).await;

        // --- CreatingLinks ---
        enter(&run_id, RunState::CreatingLinks);
        let by_device: HashMap<&str, &CreatedNode> = plans
            .iter()
            .filter_map(|p| nodes.get(&p.slot).map(|n| (p.spec.name.as_str(), n)))
            .collect();
        let links = self.create_links(&project_id, &edges, &by_device).await;

        if self.options.close_project {
            if let Err(e) = self.platform.close_project(&project_id).await {
                tracing::warn!("Failed to close project {}: {:#}", project_id, e);
            }
        }

        let devices: Vec<DeviceOutcome> = progress.into_iter().map(DeviceProgress::finish).collect();
        let state = ProvisioningResult::terminal_state(&devices, &links);
        let summary = ProvisioningResult::summarize(&devices, &links);
        enter(&run_id, state);
        tracing::info!(
            "Run {} finished: {}/{} devices, {}/{} links",
            run_id,
            summary.devices_succeeded,
            summary.devices_total,
            summary.links_succeeded,
            summary.links_total
        );

        Ok(ProvisioningResult {
            run_id,
            project_name: project.to_string(),
            project_url: self.platform.project_url(&project_id),
            project_id,
            state,
            started_at,
            finished_at: Utc::now(),
            devices,
            links,
            summary,
        })
    }

    /// Template list, or the reason every device will go unmatched
    async fn load_templates(&self) -> Result<Vec<LabTemplate>, String> {
        match self.platform.list_templates().await {
            Ok(templates) => {
                tracing::debug!("Lab platform offers {} templates", templates.len());
                Ok(templates)
            }
            Err(e) => {
                tracing::warn!("Failed to list lab templates: {:#}", e);
                Err(format!("template list unavailable: {:#}", e))
            }
        }
    }

    fn plan_node(&self, slot: usize, index: usize, record: &DeviceRecord, template: &LabTemplate) -> NodePlan {
        let config = record.transformed_config.clone().unwrap_or_default();

        // Adapter 0 is management; EthernetN needs adapter N to exist
        let highest_port = record
            .interfaces
            .iter()
            .filter_map(|i| adapter_number(&i.name))
            .max()
            .unwrap_or(0);
        let ethernet = count_ethernet_interfaces(&config) as u32;
        let (x, y) = grid_position(index);

        NodePlan {
            slot,
            spec: NodeSpec {
                name: record.identity.clone(),
                template_id: template.template_id.clone(),
                interface_count: ethernet.max(highest_port) + 1,
                x,
                y,
            },
            config: config.join("\n") + "\n",
        }
    }

    async fn create_nodes(
        &self,
        project_id: &str,
        plans: &[NodePlan],
        progress: &mut [DeviceProgress],
    ) -> HashMap<usize, CreatedNode> {
        let results: Vec<(usize, Result<CreatedNode, ProvisionError>)> = stream::iter(plans)
            .map(|plan| async move {
                let result = self
                    .platform
                    .create_node(project_id, &plan.spec)
                    .await
                    .map_err(|e| ProvisionError::NodeCreationFailed {
                        device: plan.spec.name.clone(),
                        reason: format!("{:#}", e),
                    });
                (plan.slot, result)
            })
            .buffered(self.workers())
            .collect()
            .await;

        let mut nodes = HashMap::new();
        for (slot, result) in results {
            progress[slot].node = Some(match result {
                Ok(node) => {
                    tracing::info!("Created node {} ({})", progress[slot].device, node.node_id);
                    let outcome = StepOutcome::ok_with(node.node_id.clone());
                    nodes.insert(slot, node);
                    outcome
                }
                Err(error) => {
                    tracing::warn!("{}", error);
                    StepOutcome::Failed { error }
                }
            });
        }
        nodes
    }

    async fn push_configs(
        &self,
        plans: &[NodePlan],
        nodes: &HashMap<usize, CreatedNode>,
        progress: &mut [DeviceProgress],
    ) {
        let ready = plans.iter().filter_map(|p| nodes.get(&p.slot).map(|n| (p, n)));
        let results: Vec<(usize, StepOutcome)> = stream::iter(ready)
            .map(|(plan, node)| async move {
                let outcome = match self
                    .files
                    .write_file(&node.container_id, STARTUP_CONFIG_PATH, plan.config.as_bytes())
                    .await
                {
                    Ok(()) => StepOutcome::ok(),
                    Err(e) => {
                        let error = ProvisionError::ConfigPushFailed {
                            device: plan.spec.name.clone(),
                            reason: format!("{:#}", e),
                        };
                        tracing::warn!("{}", error);
                        StepOutcome::Failed { error }
                    }
                };
                (plan.slot, outcome)
            })
            .buffered(self.workers())
            .collect()
            .await;

        for (slot, outcome) in results {
            progress[slot].config_push = Some(outcome);
        }
    }

    async fn create_links(
        &self,
        project_id: &str,
        edges: &[LinkEdge],
        nodes: &HashMap<&str, &CreatedNode>,
    ) -> Vec<LinkOutcome> {
        let shared = shared_adapters(edges);
        let shared = &shared;
        let outcomes: Vec<StepOutcome> = stream::iter(edges)
            .map(|edge| async move { self.create_link(project_id, edge, nodes, shared).await })
            .buffered(self.workers())
            .collect()
            .await;

        edges
            .iter()
            .cloned()
            .zip(outcomes)
            .map(|(edge, outcome)| LinkOutcome { edge, outcome })
            .collect()
    }

    async fn create_link(
        &self,
        project_id: &str,
        edge: &LinkEdge,
        nodes: &HashMap<&str, &CreatedNode>,
        shared: &HashSet<(&str, u32)>,
    ) -> StepOutcome {
        if let Some(conflict) = &edge.conflict {
            tracing::warn!("Not creating {}: {}", edge, conflict.reason);
            return StepOutcome::Failed {
                error: ProvisionError::ConflictingTopology {
                    device: conflict.endpoint.device.clone(),
                    port: conflict.endpoint.port.clone(),
                    reason: conflict.reason.clone(),
                },
            };
        }

        for end in [&edge.a, &edge.b] {
            let adapter = adapter_number(&end.port).filter(|n| shared.contains(&(end.device.as_str(), *n)));
            if let Some(adapter) = adapter {
                let error = ProvisionError::ConflictingTopology {
                    device: end.device.clone(),
                    port: end.port.clone(),
                    reason: format!("lab adapter {} of {} is claimed by more than one link", adapter, end.device),
                };
                tracing::warn!("Not creating {}: {}", edge, error);
                return StepOutcome::Failed { error };
            }
        }

        let (node_a, node_b) = match (nodes.get(edge.a.device.as_str()), nodes.get(edge.b.device.as_str())) {
            (Some(a), Some(b)) => (a, b),
            (a, _) => {
                let missing = if a.is_none() { &edge.a.device } else { &edge.b.device };
                return StepOutcome::skipped(format!("no node for {}", missing));
            }
        };

        let failed = |reason: String| {
            let error = ProvisionError::LinkCreationFailed {
                link: edge.to_string(),
                reason,
            };
            tracing::warn!("{}", error);
            StepOutcome::Failed { error }
        };

        let (adapter_a, adapter_b) = match (adapter_number(&edge.a.port), adapter_number(&edge.b.port)) {
            (Some(a), Some(b)) => (a, b),
            (a, _) => {
                let port = if a.is_none() { &edge.a } else { &edge.b };
                return failed(format!("{} has no lab adapter", port));
            }
        };

        let side_a = LinkSide {
            node_id: node_a.node_id.clone(),
            adapter_number: adapter_a,
            port_number: 0,
        };
        let side_b = LinkSide {
            node_id: node_b.node_id.clone(),
            adapter_number: adapter_b,
            port_number: 0,
        };

        match self.platform.create_link(project_id, &side_a, &side_b).await {
            Ok(link_id) => {
                tracing::debug!("Created link {} ({})", edge, link_id);
                StepOutcome::ok_with(link_id)
            }
            Err(e) => failed(format!("{:#}", e)),
        }
    }
}

/// (device, adapter) pairs that more than one creatable edge would cable.
/// Breakout lanes of one parent port all land on the same adapter.
fn shared_adapters(edges: &[LinkEdge]) -> HashSet<(&str, u32)> {
    let mut claims: HashMap<(&str, u32), usize> = HashMap::new();
    for edge in edges.iter().filter(|e| e.conflict.is_none()) {
        for end in [&edge.a, &edge.b] {
            if let Some(adapter) = adapter_number(&end.port) {
                *claims.entry((end.device.as_str(), adapter)).or_default() += 1;
            }
        }
    }
    claims
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| key)
        .collect()
}

fn enter(run_id: &str, state: RunState) {
    tracing::info!("Run {} -> {:?}", run_id, state);
}
