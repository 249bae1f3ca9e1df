use anyhow::{Context, Result, anyhow};
use mongodb::bson::{self, Bson, Document, doc};
use mongodb::sync::{Client, Collection};
use serde::{Deserialize, Serialize};

use crate::model::{Section, Template};
use crate::store::{ReplaceOutcome, TemplateListing, TemplateStore, UndecodableTemplate};

pub const TEMPLATES_COLLECTION: &str = "templates";

/// Shape of a document in the `templates` collection. Storefront documents are
/// keyed by `slug`; `_id` is left to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateDocument {
    #[serde(alias = "id", default, skip_serializing_if = "Option::is_none")]
    slug: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    sections: Vec<Section>,
}

impl TemplateDocument {
    fn into_template(self, fallback_id: String) -> Template {
        Template {
            id: self.slug.unwrap_or(fallback_id),
            name: self.name,
            category: self.category,
            sections: self.sections,
        }
    }
}

impl From<&Template> for TemplateDocument {
    fn from(template: &Template) -> Self {
        Self {
            slug: Some(template.id.clone()),
            name: template.name.clone(),
            category: template.category.clone(),
            sections: template.sections.clone(),
        }
    }
}

/// Best identifier for a raw document: `slug`, then `id`, then `_id`.
fn document_label(document: &Document) -> String {
    for key in ["slug", "id"] {
        if let Ok(value) = document.get_str(key) {
            return value.to_string();
        }
    }
    match document.get("_id") {
        Some(Bson::ObjectId(object_id)) => object_id.to_hex(),
        Some(Bson::String(value)) => value.clone(),
        Some(other) => other.to_string(),
        None => "<no id>".to_string(),
    }
}

fn decode_document(document: Document) -> Result<Template, UndecodableTemplate> {
    let label = document_label(&document);
    match bson::from_document::<TemplateDocument>(document) {
        Ok(decoded) => Ok(decoded.into_template(label)),
        Err(err) => Err(UndecodableTemplate {
            id: label,
            error: err.to_string(),
        }),
    }
}

fn replace_outcome(matched_count: u64, modified_count: u64) -> ReplaceOutcome {
    match (matched_count, modified_count) {
        (0, _) => ReplaceOutcome::NotFound,
        (_, 0) => ReplaceOutcome::Unchanged,
        _ => ReplaceOutcome::Updated,
    }
}

pub struct MongoTemplateStore {
    // Keeps the connection pool alive for as long as the store exists.
    _client: Client,
    templates: Collection<TemplateDocument>,
}

impl MongoTemplateStore {
    /// Connect and ping, so an unreachable server fails before any record is touched.
    pub fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).context("failed to parse MongoDB connection string")?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 })
            .run()
            .with_context(|| format!("failed to reach MongoDB database `{database}`"))?;
        tracing::info!(database, "connected to MongoDB");
        let templates = db.collection::<TemplateDocument>(TEMPLATES_COLLECTION);
        Ok(Self {
            _client: client,
            templates,
        })
    }

    fn raw(&self) -> Collection<Document> {
        self.templates.clone_with_type()
    }
}

impl TemplateStore for MongoTemplateStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    fn list_templates(&mut self) -> Result<TemplateListing> {
        let cursor = self
            .raw()
            .find(doc! {})
            .sort(doc! { "slug": 1 })
            .run()
            .context("failed to query templates collection")?;
        let mut listing = TemplateListing::default();
        for document in cursor {
            let document = document.context("failed to read from templates cursor")?;
            match decode_document(document) {
                Ok(template) => listing.templates.push(template),
                Err(undecodable) => listing.undecodable.push(undecodable),
            }
        }
        Ok(listing)
    }

    fn get_template(&mut self, id: &str) -> Result<Option<Template>> {
        let document = self
            .raw()
            .find_one(doc! { "slug": id })
            .run()
            .with_context(|| format!("failed to load template {id}"))?;
        document
            .map(|document| {
                decode_document(document).map_err(|undecodable| {
                    anyhow!(
                        "template {} does not decode: {}",
                        undecodable.id,
                        undecodable.error
                    )
                })
            })
            .transpose()
    }

    fn insert_template(&mut self, template: &Template) -> Result<bool> {
        template.validate()?;
        let existing = self
            .templates
            .count_documents(doc! { "slug": template.id.as_str() })
            .run()
            .with_context(|| format!("failed to check for template {}", template.id))?;
        if existing > 0 {
            return Ok(false);
        }
        self.templates
            .insert_one(TemplateDocument::from(template))
            .run()
            .with_context(|| format!("failed to insert template {}", template.id))?;
        Ok(true)
    }

    fn replace_sections(&mut self, id: &str, sections: &[Section]) -> Result<ReplaceOutcome> {
        let encoded = bson::to_bson(sections).context("failed to encode sections as BSON")?;
        let result = self
            .templates
            .update_one(doc! { "slug": id }, doc! { "$set": { "sections": encoded } })
            .run()
            .with_context(|| format!("failed to replace sections of {id}"))?;
        Ok(replace_outcome(result.matched_count, result.modified_count))
    }
}
