//! Gateway configuration.
//!
//! Config is loaded once at startup from a YAML file and validated before
//! the server opens any ports. `${ENV_VAR}` sequences are expanded from the
//! process environment before parsing; a missing variable fails startup.
//!
//! ```yaml
//! port: 8080
//! apiKey: ${API_KEY}
//! corsOrigins: "*"
//! indexes:
//!   catalog:
//!     engine: elasticsearch
//!     host: http://localhost:9200
//!     index: products
//!     defaults:
//!       perPage: 20
//!       facets: [category, period]
//!       suggestField: title
//!     fields:
//!       title: { weight: 10, searchable: true }
//!       artist: { alias: artist_name }
//! ```

use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::models::Highlight;

/// Which backend dialect an index handle speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Elasticsearch,
    Opensearch,
    Meilisearch,
    Typesense,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Elasticsearch => "elasticsearch",
            EngineKind::Opensearch => "opensearch",
            EngineKind::Meilisearch => "meilisearch",
            EngineKind::Typesense => "typesense",
        }
    }

    /// Elasticsearch and OpenSearch support comma-joined cross-index search.
    pub fn supports_multi_index(&self) -> bool {
        matches!(self, EngineKind::Elasticsearch | EngineKind::Opensearch)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(list) => list.clone(),
        }
    }
}

/// Per-field configuration: ranking weight, searchable flag, backend alias
/// target, nested path, and the Typesense epoch-seconds marker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldConfig {
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub searchable: Option<bool>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub nested: Option<String>,
    #[serde(default)]
    pub date: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefaults {
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub facets: Option<Vec<String>>,
    #[serde(default)]
    pub highlight: Option<Highlight>,
    #[serde(default)]
    pub suggest_field: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    pub engine: EngineKind,
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub index: OneOrMany,
    #[serde(default)]
    pub defaults: IndexDefaults,
    #[serde(default)]
    pub fields: IndexMap<String, FieldConfig>,
}

impl IndexConfig {
    pub fn index_names(&self) -> Vec<String> {
        self.index.to_vec()
    }

    /// The backend-facing index identifier; a list collapses to a
    /// comma-joined name for the engines that support cross-index search.
    pub fn index_name(&self) -> String {
        self.index_names().join(",")
    }

    /// `(public, backend)` alias pairs declared in field config.
    pub fn alias_entries(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter_map(|(name, f)| f.alias.as_ref().map(|a| (name.clone(), a.clone())))
            .collect()
    }

    /// Boosts derived from field weights, in config declaration order,
    /// keyed by backend field name.
    pub fn derived_boosts(&self) -> IndexMap<String, f64> {
        self.fields
            .iter()
            .filter_map(|(name, f)| {
                f.weight.map(|w| (f.alias.clone().unwrap_or_else(|| name.clone()), w))
            })
            .collect()
    }

    /// Backend names of fields flagged `searchable: true`.
    pub fn derived_searchable_fields(&self) -> Option<Vec<String>> {
        let list: Vec<String> = self
            .fields
            .iter()
            .filter(|(_, f)| f.searchable == Some(true))
            .map(|(name, f)| f.alias.clone().unwrap_or_else(|| name.clone()))
            .collect();
        if list.is_empty() {
            None
        } else {
            Some(list)
        }
    }

    /// Nested path for a backend field name, if configured.
    pub fn nested_path(&self, backend_field: &str) -> Option<&str> {
        self.fields.iter().find_map(|(name, f)| {
            let target = f.alias.as_deref().unwrap_or(name);
            if target == backend_field {
                f.nested.as_deref()
            } else {
                None
            }
        })
    }

    /// Backend names of fields marked as epoch-second dates.
    pub fn date_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, f)| f.date == Some(true))
            .map(|(name, f)| f.alias.clone().unwrap_or_else(|| name.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "defaults::port")]
    pub port: u16,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub cors_origins: Option<OneOrMany>,
    pub indexes: IndexMap<String, IndexConfig>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env(content)?;
        let mut config: Self =
            serde_yaml::from_str(&expanded).context("parsing config YAML")?;
        if config.api_key.is_none() {
            config.api_key = std::env::var("API_KEY").ok().filter(|k| !k.is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let handle_re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap();
        for (handle, index) in &self.indexes {
            anyhow::ensure!(
                handle_re.is_match(handle),
                "index handle `{handle}` is not a URL-safe identifier"
            );
            let names = index.index_names();
            anyhow::ensure!(!names.is_empty(), "index `{handle}` lists no backend index names");
            anyhow::ensure!(
                names.len() == 1 || index.engine.supports_multi_index(),
                "index `{handle}`: engine `{}` does not support multiple index names",
                index.engine.as_str()
            );
            // Duplicate alias targets would make outbound translation lossy.
            crate::alias::FieldAliasMap::new(index.alias_entries())
                .map_err(|e| anyhow::anyhow!("index `{handle}`: {e}"))?;
        }
        Ok(())
    }
}

/// Expand `${VAR}` sequences from the process environment. An unset
/// variable is a startup error, never an empty substitution.
pub fn expand_env(content: &str) -> anyhow::Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut missing: Vec<String> = Vec::new();
    let expanded = re.replace_all(content, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });
    anyhow::ensure!(
        missing.is_empty(),
        "missing environment variable(s) referenced by config: {}",
        missing.join(", ")
    );
    Ok(expanded.into_owned())
}

mod defaults {
    pub fn port() -> u16 {
        8080
    }
}
