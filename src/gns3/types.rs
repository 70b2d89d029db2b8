use serde::{Deserialize, Serialize};

use crate::models::LabTemplate;

// --- GNS3 v2 API types ---

#[derive(Debug, Clone, Deserialize)]
pub struct Gns3Template {
    pub template_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub template_type: String,
    /// Only docker templates carry an image
    #[serde(default)]
    pub image: Option<String>,
}

impl From<Gns3Template> for LabTemplate {
    fn from(t: Gns3Template) -> Self {
        LabTemplate {
            template_id: t.template_id,
            name: t.name,
            template_type: t.template_type,
            image: t.image.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gns3Project {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectCreate {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRef {
    pub template_id: String,
}

#[derive(Debug, Serialize)]
pub struct AdaptersUpdate {
    pub adapters: u32,
}

#[derive(Debug, Serialize)]
pub struct NodePlacement {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Serialize)]
pub struct NodeRename {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeProperties {
    #[serde(default)]
    pub container_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Gns3Node {
    pub node_id: String,
    #[serde(default)]
    pub properties: NodeProperties,
}

#[derive(Debug, Serialize)]
pub struct LinkNode {
    pub node_id: String,
    pub adapter_number: u32,
    pub port_number: u32,
}

#[derive(Debug, Serialize)]
pub struct LinkCreate {
    pub nodes: Vec<LinkNode>,
}

#[derive(Debug, Deserialize)]
pub struct Gns3Link {
    pub link_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_list_decodes_mixed_types() {
        let body = r#"[
            {"template_id": "a1", "name": "cEOS 4.28.3M", "template_type": "docker", "image": "ceos:4.28.3M", "adapters": 9},
            {"template_id": "b2", "name": "VPCS", "template_type": "vpcs", "builtin": true}
        ]"#;
        let templates: Vec<Gns3Template> = serde_json::from_str(body).unwrap();
        let templates: Vec<LabTemplate> = templates.into_iter().map(LabTemplate::from).collect();
        assert_eq!(templates[0].image, "ceos:4.28.3M");
        assert_eq!(templates[1].template_type, "vpcs");
        assert_eq!(templates[1].image, "");
    }

    #[test]
    fn test_node_container_id() {
        let body = r#"{"node_id": "n1", "name": "cEOS-1", "properties": {"container_id": "c0ffee", "adapters": 5}}"#;
        let node: Gns3Node = serde_json::from_str(body).unwrap();
        assert_eq!(node.properties.container_id.as_deref(), Some("c0ffee"));

        let bare: Gns3Node = serde_json::from_str(r#"{"node_id": "n2"}"#).unwrap();
        assert!(bare.properties.container_id.is_none());
    }

    #[test]
    fn test_link_body_shape() {
        let body = LinkCreate {
            nodes: vec![
                LinkNode {
                    node_id: "n1".to_string(),
                    adapter_number: 1,
                    port_number: 0,
                },
                LinkNode {
                    node_id: "n2".to_string(),
                    adapter_number: 49,
                    port_number: 0,
                },
            ],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["nodes"][1]["adapter_number"], 49);
        assert_eq!(json["nodes"][0]["port_number"], 0);
    }
}
