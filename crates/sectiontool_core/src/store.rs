use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{Backend, ToolConfig};
use crate::migrate::{
    MIGRATIONS_POLICY_MESSAGE, migrate_connection, open_connection, pending_for_connection,
};
use crate::model::{Section, Template};
use crate::runtime::ResolvedPaths;

/// Result of a full replace of a template's `sections` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceOutcome {
    Updated,
    /// The write went through but the stored sections were already identical.
    Unchanged,
    NotFound,
}

impl ReplaceOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::NotFound => "not_found",
        }
    }
}

/// A stored document that could not be decoded into a [`Template`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndecodableTemplate {
    pub id: String,
    pub error: String,
}

/// Every stored template, with documents that failed to decode kept apart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateListing {
    pub templates: Vec<Template>,
    pub undecodable: Vec<UndecodableTemplate>,
}

impl TemplateListing {
    pub fn len(&self) -> usize {
        self.templates.len() + self.undecodable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persistence seam for template documents.
pub trait TemplateStore {
    fn backend_name(&self) -> &'static str;
    /// A document that fails to decode lands in `undecodable` instead of failing the listing.
    fn list_templates(&mut self) -> Result<TemplateListing>;
    fn get_template(&mut self, id: &str) -> Result<Option<Template>>;
    /// Inserts a new template; returns `false` when the id already exists.
    fn insert_template(&mut self, template: &Template) -> Result<bool>;
    /// Overwrites the whole `sections` field. Never merges.
    fn replace_sections(&mut self, id: &str, sections: &[Section]) -> Result<ReplaceOutcome>;
}

/// Open the store selected by config. Connection failures are fatal to the caller.
pub fn open_store(config: &ToolConfig, paths: &ResolvedPaths) -> Result<Box<dyn TemplateStore>> {
    match config.backend()? {
        Backend::Sqlite => Ok(Box::new(SqliteTemplateStore::open(&paths.db_path)?)),
        Backend::Mongodb => open_mongodb(config),
    }
}

#[cfg(feature = "mongodb")]
fn open_mongodb(config: &ToolConfig) -> Result<Box<dyn TemplateStore>> {
    let uri = config
        .mongodb_uri()
        .context("MONGODB_URI is not set and [database].uri is missing from config")?;
    let store = crate::mongo::MongoTemplateStore::connect(&uri, &config.database_name())?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "mongodb"))]
fn open_mongodb(_config: &ToolConfig) -> Result<Box<dyn TemplateStore>> {
    bail!("the mongodb backend is not compiled in; rebuild with `--features mongodb`")
}

/// Local document store: one row per template, sections kept as ordered JSON.
pub struct SqliteTemplateStore {
    connection: Connection,
}

impl SqliteTemplateStore {
    /// Open an existing, fully migrated database.
    pub fn open(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!(
                "template database not found at {}. {MIGRATIONS_POLICY_MESSAGE}",
                db_path.display()
            );
        }
        let connection = open_connection(db_path)?;
        let pending = pending_for_connection(&connection)?;
        if pending > 0 {
            bail!("{pending} schema migration(s) pending. {MIGRATIONS_POLICY_MESSAGE}");
        }
        Ok(Self { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        migrate_connection(&connection)?;
        Ok(Self { connection })
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM templates", [], |row| row.get(0))
            .context("failed to count templates")?;
        usize::try_from(count).context("template count does not fit into usize")
    }

    fn stored_hash(&self, id: &str) -> Result<Option<String>> {
        self.connection
            .query_row(
                "SELECT sections_hash FROM templates WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read sections hash for {id}"))
    }
}

struct TemplateRow {
    id: String,
    name: String,
    category: String,
    sections_json: String,
}

impl TemplateRow {
    fn into_template(self) -> Result<Template> {
        let sections: Vec<Section> = serde_json::from_str(&self.sections_json)
            .with_context(|| format!("stored sections for {} are not valid JSON", self.id))?;
        Ok(Template {
            id: self.id,
            name: self.name,
            category: self.category,
            sections,
        })
    }
}

impl TemplateStore for SqliteTemplateStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn list_templates(&mut self) -> Result<TemplateListing> {
        let mut statement = self
            .connection
            .prepare("SELECT id, name, category, sections_json FROM templates ORDER BY id")
            .context("failed to prepare template listing")?;
        let rows = statement
            .query_map([], |row| {
                Ok(TemplateRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category: row.get(2)?,
                    sections_json: row.get(3)?,
                })
            })
            .context("failed to list templates")?;

        let mut listing = TemplateListing::default();
        for row in rows {
            let row = row.context("failed to read template row")?;
            let id = row.id.clone();
            match row.into_template() {
                Ok(template) => listing.templates.push(template),
                Err(err) => listing.undecodable.push(UndecodableTemplate {
                    id,
                    error: format!("{err:#}"),
                }),
            }
        }
        Ok(listing)
    }

    fn get_template(&mut self, id: &str) -> Result<Option<Template>> {
        let row = self
            .connection
            .query_row(
                "SELECT id, name, category, sections_json FROM templates WHERE id = ?1",
                params![id],
                |row| {
                    Ok(TemplateRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        category: row.get(2)?,
                        sections_json: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to load template {id}"))?;
        row.map(TemplateRow::into_template).transpose()
    }

    fn insert_template(&mut self, template: &Template) -> Result<bool> {
        template.validate()?;
        let sections_json = encode_sections(&template.sections)?;
        let now = crate::unix_timestamp()?;
        let inserted = self
            .connection
            .execute(
                "INSERT OR IGNORE INTO templates (
                    id, name, category, sections_json, sections_hash, created_at_unix, updated_at_unix
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    template.id,
                    template.name,
                    template.category,
                    sections_json,
                    compute_hash(&sections_json),
                    now,
                ],
            )
            .with_context(|| format!("failed to insert template {}", template.id))?;
        Ok(inserted > 0)
    }

    fn replace_sections(&mut self, id: &str, sections: &[Section]) -> Result<ReplaceOutcome> {
        let Some(previous_hash) = self.stored_hash(id)? else {
            return Ok(ReplaceOutcome::NotFound);
        };
        let sections_json = encode_sections(sections)?;
        let hash = compute_hash(&sections_json);
        self.connection
            .execute(
                "UPDATE templates SET sections_json = ?1, sections_hash = ?2, updated_at_unix = ?3 WHERE id = ?4",
                params![sections_json, hash, crate::unix_timestamp()?, id],
            )
            .with_context(|| format!("failed to replace sections of {id}"))?;
        if previous_hash == hash {
            Ok(ReplaceOutcome::Unchanged)
        } else {
            Ok(ReplaceOutcome::Updated)
        }
    }
}

fn encode_sections(sections: &[Section]) -> Result<String> {
    serde_json::to_string(sections).context("failed to serialize sections")
}

pub(crate) fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::migrate::run_migrations;
    use crate::runtime::tests::temp_paths;
    use crate::section::synthesize_sections;

    /// In-memory store with injectable write failures.
    #[derive(Default)]
    pub(crate) struct MemoryTemplateStore {
        pub templates: BTreeMap<String, Template>,
        pub undecodable: Vec<UndecodableTemplate>,
        pub failing_ids: Vec<String>,
        pub writes: usize,
    }

    impl MemoryTemplateStore {
        pub(crate) fn with_templates(templates: Vec<Template>) -> Self {
            Self {
                templates: templates
                    .into_iter()
                    .map(|template| (template.id.clone(), template))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl TemplateStore for MemoryTemplateStore {
        fn backend_name(&self) -> &'static str {
            "memory"
        }

        fn list_templates(&mut self) -> Result<TemplateListing> {
            Ok(TemplateListing {
                templates: self.templates.values().cloned().collect(),
                undecodable: self.undecodable.clone(),
            })
        }

        fn get_template(&mut self, id: &str) -> Result<Option<Template>> {
            Ok(self.templates.get(id).cloned())
        }

        fn insert_template(&mut self, template: &Template) -> Result<bool> {
            if self.templates.contains_key(&template.id) {
                return Ok(false);
            }
            self.templates
                .insert(template.id.clone(), template.clone());
            Ok(true)
        }

        fn replace_sections(&mut self, id: &str, sections: &[Section]) -> Result<ReplaceOutcome> {
            if self.failing_ids.iter().any(|failing| failing == id) {
                bail!("simulated write failure for {id}");
            }
            let Some(template) = self.templates.get_mut(id) else {
                return Ok(ReplaceOutcome::NotFound);
            };
            self.writes += 1;
            let unchanged = template.sections == sections;
            template.sections = sections.to_vec();
            Ok(if unchanged {
                ReplaceOutcome::Unchanged
            } else {
                ReplaceOutcome::Updated
            })
        }
    }

    #[test]
    fn sqlite_store_round_trips_ordered_sections() {
        let mut store = SqliteTemplateStore::open_in_memory().expect("open");
        let mut template = Template::new("home-1", "Home Fashion 01", "Fashion");
        assert!(store.insert_template(&template).expect("insert"));
        assert!(!store.insert_template(&template).expect("second insert"));

        template.sections = synthesize_sections(&["Header2", "Hero", "Marquee", "Footer1"]);
        let outcome = store
            .replace_sections("home-1", &template.sections)
            .expect("replace");
        assert_eq!(outcome, ReplaceOutcome::Updated);

        let stored = store.get_template("home-1").expect("get").expect("exists");
        assert_eq!(stored, template);
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn sqlite_replace_is_idempotent() {
        let mut store = SqliteTemplateStore::open_in_memory().expect("open");
        store
            .insert_template(&Template::new("home-electronic", "Electronic", "Tech"))
            .expect("insert");
        let sections = synthesize_sections(&["Header7", "ProductsElectronic", "Footer1"]);

        let first = store
            .replace_sections("home-electronic", &sections)
            .expect("first");
        let after_first = store.get_template("home-electronic").expect("get");
        let second = store
            .replace_sections("home-electronic", &sections)
            .expect("second");
        let after_second = store.get_template("home-electronic").expect("get");

        assert_eq!(first, ReplaceOutcome::Updated);
        assert_eq!(second, ReplaceOutcome::Unchanged);
        assert_eq!(second.as_str(), "unchanged");
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn sqlite_replace_reports_missing_template() {
        let mut store = SqliteTemplateStore::open_in_memory().expect("open");
        let outcome = store
            .replace_sections("missing", &synthesize_sections(&["Hero"]))
            .expect("replace");
        assert_eq!(outcome, ReplaceOutcome::NotFound);
        assert!(store.get_template("missing").expect("get").is_none());
    }

    #[test]
    fn sqlite_insert_validates_before_writing() {
        let mut store = SqliteTemplateStore::open_in_memory().expect("open");
        let err = store
            .insert_template(&Template::new("", "Nameless", "Tech"))
            .expect_err("must fail");
        assert!(err.to_string().contains("template id must not be empty"));
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn sqlite_open_requires_migrated_database() {
        let (_temp, paths) = temp_paths();
        let err = SqliteTemplateStore::open(&paths.db_path)
            .err()
            .expect("missing db must fail");
        assert!(err.to_string().contains("sectiontool db migrate"));

        run_migrations(&paths).expect("migrate");
        let mut store = SqliteTemplateStore::open(&paths.db_path).expect("open");
        assert!(store.list_templates().expect("list").is_empty());
    }

    #[test]
    fn sqlite_lists_templates_by_id() {
        let mut store = SqliteTemplateStore::open_in_memory().expect("open");
        for id in ["home-2", "home-1", "home-cosmetic"] {
            store
                .insert_template(&Template::new(id, id, "Fashion"))
                .expect("insert");
        }
        let ids = store
            .list_templates()
            .expect("list")
            .templates
            .into_iter()
            .map(|template| template.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["home-1", "home-2", "home-cosmetic"]);
    }

    #[test]
    fn sqlite_listing_keeps_going_past_bad_rows() {
        let mut store = SqliteTemplateStore::open_in_memory().expect("open");
        let rows = [
            ("home-1", r#"[{"type":"header","component":"Header1","order":0},{"type":"hero","order":1}]"#),
            ("home-2", "{not json"),
            ("home-3", "[]"),
        ];
        for (id, sections_json) in rows {
            store
                .connection
                .execute(
                    "INSERT INTO templates (
                        id, name, category, sections_json, sections_hash, created_at_unix, updated_at_unix
                    ) VALUES (?1, ?1, 'Fashion', ?2, ?3, 0, 0)",
                    params![id, sections_json, compute_hash(sections_json)],
                )
                .expect("raw insert");
        }

        let listing = store.list_templates().expect("list");
        assert_eq!(listing.len(), 3);
        let ids = listing
            .templates
            .iter()
            .map(|template| template.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["home-1", "home-3"]);
        assert_eq!(listing.templates[0].sections[1].component, "");
        assert_eq!(listing.undecodable.len(), 1);
        assert_eq!(listing.undecodable[0].id, "home-2");
        assert!(listing.undecodable[0].error.contains("not valid JSON"));
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = compute_hash("[]");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_hash("[]"));
        assert_ne!(hash, compute_hash("[{}]"));
    }
}
