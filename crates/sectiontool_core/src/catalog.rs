use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::model::Template;

const EMBEDDED_CATALOG: &str = include_str!("../../../config/default-catalog.toml");

/// Template id to front-end component mapping, in render order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCatalog {
    #[serde(default)]
    pub templates: Vec<CatalogTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub components: Vec<String>,
}

impl CatalogTemplate {
    /// A template document carrying only identity fields; sections are filled by `apply`.
    pub fn to_template(&self) -> Template {
        Template::new(&self.id, &self.name, &self.category)
    }
}

impl ComponentCatalog {
    pub fn find(&self, id: &str) -> Option<&CatalogTemplate> {
        self.templates.iter().find(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    fn check(&self, origin: &str) -> Result<()> {
        let mut seen = BTreeSet::new();
        for entry in &self.templates {
            if entry.id.trim().is_empty() {
                bail!("{origin}: catalog entry with empty id");
            }
            if !seen.insert(entry.id.as_str()) {
                bail!("{origin}: duplicate catalog template id `{}`", entry.id);
            }
            if entry.components.is_empty() {
                bail!("{origin}: template `{}` lists no components", entry.id);
            }
            if let Some(position) = entry
                .components
                .iter()
                .position(|component| component.trim().is_empty())
            {
                bail!(
                    "{origin}: template `{}` has an empty component name at position {position}",
                    entry.id
                );
            }
        }
        Ok(())
    }
}

pub fn embedded_catalog() -> Result<ComponentCatalog> {
    parse_catalog(EMBEDDED_CATALOG, "embedded catalog")
}

/// Load a catalog file, or the built-in catalog when no path is given.
pub fn load_catalog(path: Option<&Path>) -> Result<ComponentCatalog> {
    let Some(path) = path else {
        return embedded_catalog();
    };
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_catalog(&content, &path.display().to_string())
}

fn parse_catalog(content: &str, origin: &str) -> Result<ComponentCatalog> {
    let catalog: ComponentCatalog =
        toml::from_str(content).with_context(|| format!("failed to parse {origin}"))?;
    catalog.check(origin)?;
    Ok(catalog)
}
