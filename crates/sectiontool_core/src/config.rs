use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE_NAME: &str = "ecomus";
pub const DEFAULT_PAUSE_EVERY: usize = 10;
pub const DEFAULT_PAUSE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Mongodb,
}

impl Backend {
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("sqlite") {
            return Ok(Self::Sqlite);
        }
        if value.eq_ignore_ascii_case("mongodb") || value.eq_ignore_ascii_case("mongo") {
            return Ok(Self::Mongodb);
        }
        bail!("unsupported database backend: {value}")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Mongodb => "mongodb",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub frontend: FrontendSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DatabaseSection {
    pub backend: Option<Backend>,
    pub uri: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BatchSection {
    pub pause_every: Option<usize>,
    pub pause_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CatalogSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FrontendSection {
    pub components_dir: Option<PathBuf>,
}

impl ToolConfig {
    /// Resolve the backend: env SECTIONTOOL_BACKEND > config > sqlite.
    pub fn backend(&self) -> Result<Backend> {
        if let Some(value) = env_value("SECTIONTOOL_BACKEND") {
            return Backend::parse(&value);
        }
        Ok(self.database.backend.unwrap_or_default())
    }

    /// Resolve the MongoDB connection string: env MONGODB_URI > config.
    pub fn mongodb_uri(&self) -> Option<String> {
        env_value("MONGODB_URI").or_else(|| self.database.uri.clone())
    }

    /// Resolve the database name: env MONGODB_DATABASE > config > DEFAULT_DATABASE_NAME.
    pub fn database_name(&self) -> String {
        env_value("MONGODB_DATABASE")
            .or_else(|| self.database.name.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string())
    }

    pub fn pause_every(&self) -> usize {
        self.batch.pause_every.unwrap_or(DEFAULT_PAUSE_EVERY)
    }

    pub fn pause_ms(&self) -> u64 {
        self.batch.pause_ms.unwrap_or(DEFAULT_PAUSE_MS)
    }

    /// Catalog file: env SECTIONTOOL_CATALOG > config, relative to `project_root`.
    pub fn catalog_path(&self, project_root: &Path) -> Option<PathBuf> {
        env_value("SECTIONTOOL_CATALOG")
            .map(PathBuf::from)
            .or_else(|| self.catalog.path.clone())
            .map(|path| relative_to(&path, project_root))
    }

    pub fn components_dir(&self, project_root: &Path) -> Option<PathBuf> {
        self.frontend
            .components_dir
            .as_deref()
            .map(|path| relative_to(path, project_root))
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
