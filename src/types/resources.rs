//! MCP Resource Types
//!
//! Resources are descriptive catalog entries. They carry no handler and are
//! only ever listed.

use serde::{Deserialize, Serialize};

/// A resource in the catalog
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

impl Resource {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            description: String::new(),
            mime_type: "text/plain".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// A parameterized resource address, e.g. `file:///{path}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceTemplate {
    pub name: String,
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

impl ResourceTemplate {
    pub fn new(name: impl Into<String>, uri_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri_template: uri_template.into(),
            description: String::new(),
            mime_type: "text/plain".to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// Result of `resources/list`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
}

/// Result of `resources/templates/list`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ListResourceTemplatesResult {
    #[serde(rename = "resourceTemplates")]
    pub resource_templates: Vec<ResourceTemplate>,
}
