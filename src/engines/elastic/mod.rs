//! The shared Elasticsearch/OpenSearch engine. One algorithm serves both
//! dialects; the differences live in [`client::ElasticFlavor`].

pub mod client;
pub mod query;
pub mod response;

use indexmap::IndexMap;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::config::{EngineKind, IndexConfig};
use crate::error::{GatewayError, Result};
use crate::models::{FacetValue, SearchOptions, SearchResult};

use client::{ElasticClient, ElasticFlavor};

pub struct ElasticEngine {
    client: ElasticClient,
    index: String,
    config: IndexConfig,
    // Fetched once per process; later searches resolve sort fields from it
    // without another round-trip.
    mapping: OnceCell<Value>,
}

impl ElasticEngine {
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let flavor = match config.engine {
            EngineKind::Elasticsearch => ElasticFlavor::Elasticsearch,
            EngineKind::Opensearch => ElasticFlavor::OpenSearch,
            other => {
                return Err(GatewayError::Config(format!(
                    "engine `{}` is not elastic-compatible",
                    other.as_str()
                )))
            }
        };
        let client = ElasticClient::new(
            &config.host,
            flavor,
            config.username.clone(),
            config.password.clone(),
            config.api_key.clone(),
        )?;
        Ok(Self {
            client,
            index: config.index_name(),
            config: config.clone(),
            mapping: OnceCell::new(),
        })
    }

    async fn cached_mapping(&self) -> Result<&Value> {
        self.mapping
            .get_or_try_init(|| async { self.client.mapping(&self.index).await })
            .await
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        // The mapping is only needed to resolve sort fields.
        let mapping = if options.sort.is_empty() {
            None
        } else {
            Some(self.cached_mapping().await?)
        };
        let body = query::build_search_body(query, options, &self.config, mapping);
        let resp = self.client.search(&self.index, &body).await?;
        Ok(response::normalize_search_response(&resp, options))
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Value>> {
        if self.index.contains(',') {
            // Backend `get` is single-index; cross-index handles fetch by id
            // through the search API instead.
            let body = json!({ "query": { "ids": { "values": [id] } }, "size": 1 });
            let resp = self.client.search(&self.index, &body).await?;
            Ok(resp.pointer("/hits/hits/0").cloned())
        } else {
            self.client.get_doc(&self.index, id).await
        }
    }

    pub async fn search_facet_values(
        &self,
        field: &str,
        prefix: &str,
        filters: Option<&IndexMap<String, crate::models::FilterValue>>,
        max_values: usize,
    ) -> Result<Vec<FacetValue>> {
        let body = query::facet_values_body(field, prefix, filters, max_values, &self.config);
        let resp = self.client.search(&self.index, &body).await?;
        let values = resp
            .pointer("/aggregations/facet_values")
            .and_then(|node| response::extract_buckets("facet_values", node))
            .map(response::buckets_to_facet_values)
            .unwrap_or_default();
        Ok(values)
    }

    pub async fn get_mapping(&self) -> Result<Value> {
        Ok(self.cached_mapping().await?.clone())
    }

    /// Raw passthrough: the body goes to the search API against this
    /// handle's index (or an `index` field embedded in the body) and the
    /// backend's response is returned verbatim.
    pub async fn raw_query(&self, mut body: Value) -> Result<Value> {
        let index = body
            .as_object_mut()
            .and_then(|map| map.remove("index"))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| self.index.clone());
        self.client.search(&index, &body).await
    }
}
