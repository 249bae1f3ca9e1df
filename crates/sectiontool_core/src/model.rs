use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::classify::SectionType;

/// A selectable storefront layout with its ordered sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(alias = "slug", alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// One renderable slot of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(rename = "type", default)]
    pub section_type: SectionType,
    // Missing in some stored documents; verification reports it as empty.
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub order: usize,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub default_props: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("template id must not be empty")]
    EmptyTemplateId,
    #[error("template {template}: section at order {order} has an empty component name")]
    EmptyComponent { template: String, order: usize },
}

impl Template {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            sections: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_sections(&self.id, &self.sections)
    }

    /// Sections in render position, regardless of storage order.
    pub fn sections_by_order(&self) -> Vec<&Section> {
        let mut sorted = self.sections.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|section| section.order);
        sorted
    }
}

impl Section {
    pub fn validate(&self, template_id: &str) -> Result<(), ValidationError> {
        if self.component.trim().is_empty() {
            return Err(ValidationError::EmptyComponent {
                template: template_id.to_string(),
                order: self.order,
            });
        }
        Ok(())
    }
}

/// Structural checks applied before any write reaches a store.
pub fn validate_sections(template_id: &str, sections: &[Section]) -> Result<(), ValidationError> {
    if template_id.trim().is_empty() {
        return Err(ValidationError::EmptyTemplateId);
    }
    sections
        .iter()
        .try_for_each(|section| section.validate(template_id))
}
