//! Engine dispatch. One closed capability set, four adapters behind it;
//! the right adapter is selected once per handle at startup from
//! configuration, never per request.

pub mod elastic;
pub mod meilisearch;
pub mod typesense;

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::alias::FieldAliasMap;
use crate::config::{EngineKind, GatewayConfig, IndexConfig};
use crate::error::Result;
use crate::models::{FacetValue, FilterValue, SearchOptions, SearchResult};

use elastic::ElasticEngine;
use meilisearch::MeilisearchEngine;
use typesense::TypesenseEngine;

pub enum Engine {
    Elastic(ElasticEngine),
    Meilisearch(MeilisearchEngine),
    Typesense(TypesenseEngine),
}

impl Engine {
    /// Build the adapter for an index. Unknown engine kinds never reach
    /// this point: they already fail configuration parsing.
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        Ok(match config.engine {
            EngineKind::Elasticsearch | EngineKind::Opensearch => {
                Engine::Elastic(ElasticEngine::from_config(config)?)
            }
            EngineKind::Meilisearch => {
                Engine::Meilisearch(MeilisearchEngine::from_config(config)?)
            }
            EngineKind::Typesense => Engine::Typesense(TypesenseEngine::from_config(config)?),
        })
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        match self {
            Engine::Elastic(e) => e.search(query, options).await,
            Engine::Meilisearch(e) => e.search(query, options).await,
            Engine::Typesense(e) => e.search(query, options).await,
        }
    }

    /// `None` on a backend 404; other failures surface unchanged.
    pub async fn get_document(&self, id: &str) -> Result<Option<Value>> {
        match self {
            Engine::Elastic(e) => e.get_document(id).await,
            Engine::Meilisearch(e) => e.get_document(id).await,
            Engine::Typesense(e) => e.get_document(id).await,
        }
    }

    pub async fn search_facet_values(
        &self,
        field: &str,
        prefix: &str,
        filters: Option<&IndexMap<String, FilterValue>>,
        max_values: usize,
    ) -> Result<Vec<FacetValue>> {
        match self {
            Engine::Elastic(e) => e.search_facet_values(field, prefix, filters, max_values).await,
            Engine::Meilisearch(e) => {
                e.search_facet_values(field, prefix, filters, max_values).await
            }
            Engine::Typesense(e) => e.search_facet_values(field, prefix, filters, max_values).await,
        }
    }

    pub async fn get_mapping(&self) -> Result<Value> {
        match self {
            Engine::Elastic(e) => e.get_mapping().await,
            Engine::Meilisearch(e) => e.get_mapping().await,
            Engine::Typesense(e) => e.get_mapping().await,
        }
    }

    pub async fn raw_query(&self, body: Value) -> Result<Value> {
        match self {
            Engine::Elastic(e) => e.raw_query(body).await,
            Engine::Meilisearch(e) => e.raw_query(body).await,
            Engine::Typesense(e) => e.raw_query(body).await,
        }
    }
}

/// Everything the orchestrator needs for one handle, derived once at
/// startup and read-only afterwards.
pub struct IndexContext {
    pub handle: String,
    pub config: IndexConfig,
    pub engine: Engine,
    pub aliases: FieldAliasMap,
    pub boosts: IndexMap<String, f64>,
    pub searchable_fields: Option<Vec<String>>,
}

pub fn build_registry(config: &GatewayConfig) -> Result<HashMap<String, IndexContext>> {
    let mut registry = HashMap::new();
    for (handle, index) in &config.indexes {
        let context = IndexContext {
            handle: handle.clone(),
            config: index.clone(),
            engine: Engine::from_config(index)?,
            aliases: FieldAliasMap::new(index.alias_entries())?,
            boosts: index.derived_boosts(),
            searchable_fields: index.derived_searchable_fields(),
        };
        tracing::info!(
            target: "registry",
            handle = %handle,
            engine = index.engine.as_str(),
            index = %index.index_name(),
            "registered index"
        );
        registry.insert(handle.clone(), context);
    }
    Ok(registry)
}
