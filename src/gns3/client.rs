use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::types::*;
use super::{CreatedNode, LabPlatform, LinkSide, NodeSpec};
use crate::models::LabTemplate;

/// GNS3 server v2 REST API client
pub struct Gns3Client {
    server: String,
    port: u16,
    username: String,
    password: String,
    client: Client,
}

impl Gns3Client {
    pub fn new(server: &str, port: u16, username: String, password: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            port,
            username,
            password,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("http://{}:{}/v2{}", self.server, self.port, path)
    }

    /// Helper to send a request and decode the JSON reply
    async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let text = self.request_text(method, path, body).await?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("GNS3 returned unexpected body for {}: {}", path, e))
    }

    /// Helper for calls whose reply body is not needed
    async fn request_text<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<String>
    where
        B: Serialize + ?Sized,
    {
        let mut req = self
            .client
            .request(method.clone(), self.api_url(path))
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("GNS3 {} {} failed: {}", method, path, e))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow::anyhow!("GNS3 API error {} on {} {}: {}", status, method, path, text));
        }
        Ok(text)
    }

    async fn find_project(&self, name: &str) -> Result<Option<Gns3Project>> {
        let projects: Vec<Gns3Project> = self.request(Method::GET, "/projects", None::<&()>).await?;
        Ok(projects.into_iter().find(|p| p.name == name))
    }

    /// Duplicate the base template, size its adapters and drop an instance on the canvas
    async fn instantiate(&self, project_id: &str, tmp_template_id: &str, spec: &NodeSpec) -> Result<String> {
        self.request_text(
            Method::PUT,
            &format!("/templates/{}", tmp_template_id),
            Some(&AdaptersUpdate {
                adapters: spec.interface_count,
            }),
        )
        .await?;

        let node: Gns3Node = self
            .request(
                Method::POST,
                &format!("/projects/{}/templates/{}", project_id, tmp_template_id),
                Some(&NodePlacement { x: spec.x, y: spec.y }),
            )
            .await?;
        Ok(node.node_id)
    }
}

#[async_trait]
impl LabPlatform for Gns3Client {
    async fn list_templates(&self) -> Result<Vec<LabTemplate>> {
        let templates: Vec<Gns3Template> = self.request(Method::GET, "/templates", None::<&()>).await?;
        Ok(templates.into_iter().map(LabTemplate::from).collect())
    }

    async fn create_project(&self, name: &str, reuse: bool) -> Result<String> {
        if reuse {
            if let Some(existing) = self.find_project(name).await? {
                tracing::info!("Reusing GNS3 project {} ({})", existing.name, existing.project_id);
                if existing.status != "opened" {
                    self.request_text(Method::POST, &format!("/projects/{}/open", existing.project_id), None::<&()>)
                        .await?;
                }
                return Ok(existing.project_id);
            }
        }

        let project: Gns3Project = self
            .request(Method::POST, "/projects", Some(&ProjectCreate { name: name.to_string() }))
            .await?;
        Ok(project.project_id)
    }

    async fn create_node(&self, project_id: &str, spec: &NodeSpec) -> Result<CreatedNode> {
        let tmp: TemplateRef = self
            .request(Method::POST, &format!("/templates/{}/duplicate", spec.template_id), None::<&()>)
            .await?;

        let placed = self.instantiate(project_id, &tmp.template_id, spec).await;

        // The temporary template is only needed to carry the adapter count
        if let Err(e) = self
            .request_text(Method::DELETE, &format!("/templates/{}", tmp.template_id), None::<&()>)
            .await
        {
            tracing::warn!("Failed to delete temporary template {}: {}", tmp.template_id, e);
        }
        let node_id = placed?;

        let node_path = format!("/projects/{}/nodes/{}", project_id, node_id);
        self.request_text(Method::PUT, &node_path, Some(&NodeRename { name: spec.name.clone() }))
            .await?;

        let node: Gns3Node = self.request(Method::GET, &node_path, None::<&()>).await?;
        let container_id = node
            .properties
            .container_id
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow::anyhow!("node {} has no container id", node_id))?;

        Ok(CreatedNode { node_id, container_id })
    }

    async fn create_link(&self, project_id: &str, a: &LinkSide, b: &LinkSide) -> Result<String> {
        let body = LinkCreate {
            nodes: [a, b]
                .iter()
                .map(|side| LinkNode {
                    node_id: side.node_id.clone(),
                    adapter_number: side.adapter_number,
                    port_number: side.port_number,
                })
                .collect(),
        };
        let link: Gns3Link = self
            .request(Method::POST, &format!("/projects/{}/links", project_id), Some(&body))
            .await?;
        Ok(link.link_id)
    }

    async fn close_project(&self, project_id: &str) -> Result<()> {
        self.request_text(Method::POST, &format!("/projects/{}/close", project_id), None::<&()>)
            .await?;
        Ok(())
    }

    fn project_url(&self, project_id: &str) -> Option<String> {
        Some(format!(
            "http://{}:{}/static/web-ui/server/1/project/{}",
            self.server, self.port, project_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Gns3Client {
        Gns3Client::new("lab-host/", 3080, "admin".to_string(), "admin".to_string(), 5).unwrap()
    }

    #[test]
    fn test_api_url() {
        assert_eq!(client().api_url("/templates"), "http://lab-host:3080/v2/templates");
    }

    #[test]
    fn test_project_url() {
        assert_eq!(
            client().project_url("6f1c").as_deref(),
            Some("http://lab-host:3080/static/web-ui/server/1/project/6f1c")
        );
    }
}
