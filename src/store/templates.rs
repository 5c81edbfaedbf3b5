//! Template and user records, and the read boundary to the template store.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// A message template as stored by the web application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub delivery_method: String,
}

/// The sending user, forwarded verbatim to the delivery system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Read access to stored templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Fetch a template by id; `TemplateNotFound` when absent.
    async fn get_template(&self, id: &str) -> Result<Template, StoreError>;
}

/// Process-local template store.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: RwLock::new(templates.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }

    /// Load a JSON array of templates.
    pub async fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to read {}: {e}", path.display()))
        })?;
        let templates: Vec<Template> = serde_json::from_str(&raw).map_err(|e| {
            StoreError::Unavailable(format!("Invalid template file {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), count = templates.len(), "Templates loaded");
        Ok(Self::with_templates(templates))
    }

    pub async fn insert(&self, template: Template) {
        self.templates
            .write()
            .await
            .insert(template.id.clone(), template);
    }

    pub async fn len(&self) -> usize {
        self.templates.read().await.len()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get_template(&self, id: &str) -> Result<Template, StoreError> {
        self.templates
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::TemplateNotFound { id: id.to_string() })
    }
}
