use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::types::resources::{Resource, ResourceTemplate};

/// Static catalog of resources and resource templates, keyed by name
#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<IndexMap<String, Resource>>,
    templates: RwLock<IndexMap<String, ResourceTemplate>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name
    pub async fn add_resource(&self, resource: Resource) {
        tracing::debug!(resource = %resource.name, uri = %resource.uri, "Registered resource");
        self.resources
            .write()
            .await
            .insert(resource.name.clone(), resource);
    }

    pub async fn add_template(&self, template: ResourceTemplate) {
        tracing::debug!(template = %template.name, "Registered resource template");
        self.templates
            .write()
            .await
            .insert(template.name.clone(), template);
    }

    pub async fn list_resources(&self) -> Vec<Resource> {
        self.resources.read().await.values().cloned().collect()
    }

    pub async fn list_templates(&self) -> Vec<ResourceTemplate> {
        self.templates.read().await.values().cloned().collect()
    }
}
