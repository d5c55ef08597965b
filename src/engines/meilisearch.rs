//! Meilisearch adapter. Translates the normalized contract onto
//! Meilisearch's filter-expression / sort-token / facet-distribution model.

use std::time::Duration;

use indexmap::IndexMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use crate::config::IndexConfig;
use crate::error::{GatewayError, Result};
use crate::models::{
    total_pages, FacetValue, FilterValue, Highlight, SearchHit, SearchOptions, SearchResult,
};

pub struct MeilisearchEngine {
    base_url: String,
    http: Client,
    api_key: Option<String>,
    index_uid: String,
    // The primary-key field name is needed to surface objectID; fetched
    // lazily and kept for the process lifetime.
    primary_key: OnceCell<String>,
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the filters map as one Meilisearch filter expression.
pub fn render_filter(filters: &IndexMap<String, FilterValue>) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|(field, value)| match value {
            FilterValue::Term(s) => format!("{field} = \"{}\"", escape_value(s)),
            FilterValue::Terms(list) => {
                let ors: Vec<String> = list
                    .iter()
                    .map(|s| format!("{field} = \"{}\"", escape_value(s)))
                    .collect();
                format!("({})", ors.join(" OR "))
            }
            FilterValue::Flag(b) => format!("{field} = {b}"),
            FilterValue::Range { min, max } => {
                let mut bounds = Vec::new();
                if let Some(min) = min {
                    bounds.push(format!("{field} >= {min}"));
                }
                if let Some(max) = max {
                    bounds.push(format!("{field} <= {max}"));
                }
                bounds.join(" AND ")
            }
        })
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" AND "))
    }
}

pub fn render_sort(sort: &IndexMap<String, crate::models::SortOrder>) -> Vec<String> {
    sort.iter().map(|(field, order)| format!("{field}:{}", order.as_str())).collect()
}

impl MeilisearchEngine {
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let names = config.index_names();
        if names.len() != 1 {
            return Err(GatewayError::Config(
                "meilisearch indexes take exactly one backend index name".into(),
            ));
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: config.host.trim_end_matches('/').to_string(),
            http,
            api_key: config.api_key.clone(),
            index_uid: names.into_iter().next().unwrap(),
            primary_key: OnceCell::new(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder, op: &str) -> Result<(StatusCode, Value)> {
        let resp = builder.send().await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("meilisearch {op} failed ({status})"));
            tracing::event!(
                target: "meilisearch.request",
                tracing::Level::ERROR,
                http.status = %status,
                op,
                error.message = %message,
                "backend request failed"
            );
            return Err(GatewayError::Backend(message));
        }
        Ok((status, body))
    }

    async fn primary_key(&self) -> &str {
        self.primary_key
            .get_or_init(|| async {
                let info = self
                    .send(
                        self.request(Method::GET, &format!("indexes/{}", self.index_uid)),
                        "index-info",
                    )
                    .await
                    .map(|(_, body)| body)
                    .unwrap_or(Value::Null);
                info.get("primaryKey")
                    .and_then(Value::as_str)
                    .unwrap_or("id")
                    .to_string()
            })
            .await
    }

    fn normalize_hit(&self, hit: &Value, primary_key: &str) -> SearchHit {
        let mut source = hit.as_object().cloned().unwrap_or_default();
        let formatted = source.remove("_formatted");
        let object_id = match source.get(primary_key).or_else(|| source.get("id")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let highlights = extract_highlights(formatted.as_ref());
        SearchHit::new(source, object_id, self.index_uid.clone(), None, highlights)
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        let mut body = Map::new();
        body.insert("q".to_string(), json!(query));
        body.insert(
            "offset".to_string(),
            json!(options.page.saturating_sub(1) * options.per_page),
        );
        body.insert("limit".to_string(), json!(options.per_page));
        if let Some(filter) = render_filter(&options.filters) {
            body.insert("filter".to_string(), json!(filter));
        }
        if !options.sort.is_empty() {
            body.insert("sort".to_string(), json!(render_sort(&options.sort)));
        }
        if !options.facets.is_empty() {
            body.insert("facets".to_string(), json!(options.facets));
        }
        match &options.highlight {
            Highlight::Enabled(false) => {}
            Highlight::Enabled(true) => {
                body.insert("attributesToHighlight".to_string(), json!(["*"]));
                body.insert("highlightPreTag".to_string(), json!("<mark>"));
                body.insert("highlightPostTag".to_string(), json!("</mark>"));
            }
            Highlight::Fields(list) => {
                body.insert("attributesToHighlight".to_string(), json!(list));
                body.insert("highlightPreTag".to_string(), json!("<mark>"));
                body.insert("highlightPostTag".to_string(), json!("</mark>"));
            }
        }
        if let Some(attributes) = &options.attributes_to_retrieve {
            body.insert("attributesToRetrieve".to_string(), json!(attributes));
        }

        let (_, resp) = self
            .send(
                self.request(Method::POST, &format!("indexes/{}/search", self.index_uid))
                    .json(&Value::Object(body)),
                "search",
            )
            .await?;

        let primary_key = self.primary_key().await.to_string();
        let hits: Vec<SearchHit> = resp
            .get("hits")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(|hit| self.normalize_hit(hit, &primary_key)).collect())
            .unwrap_or_default();
        let total = resp
            .get("estimatedTotalHits")
            .or_else(|| resp.get("totalHits"))
            .and_then(Value::as_u64)
            .unwrap_or(hits.len() as u64);

        let mut facets: IndexMap<String, Vec<FacetValue>> = IndexMap::new();
        if let Some(distribution) = resp.get("facetDistribution").and_then(Value::as_object) {
            for facet in &options.facets {
                let values = distribution
                    .get(facet)
                    .and_then(Value::as_object)
                    .map(|counts| {
                        counts
                            .iter()
                            .map(|(value, count)| FacetValue {
                                value: value.clone(),
                                count: count.as_u64().unwrap_or(0),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                facets.insert(facet.clone(), values);
            }
        }

        Ok(SearchResult {
            hits,
            total_hits: total,
            page: options.page,
            per_page: options.per_page,
            total_pages: total_pages(total, options.per_page),
            facets,
            histograms: None,
            geo_clusters: None,
            suggestions: Vec::new(),
        })
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Value>> {
        let path = format!(
            "indexes/{}/documents/{}",
            self.index_uid,
            urlencoding::encode(id)
        );
        let (status, body) = self.send(self.request(Method::GET, &path), "get-document").await?;
        let not_found = status == StatusCode::NOT_FOUND
            || body.get("code").and_then(Value::as_str) == Some("document_not_found");
        if not_found {
            return Ok(None);
        }
        Ok(Some(body))
    }

    pub async fn search_facet_values(
        &self,
        field: &str,
        prefix: &str,
        filters: Option<&IndexMap<String, FilterValue>>,
        max_values: usize,
    ) -> Result<Vec<FacetValue>> {
        let mut body = Map::new();
        body.insert("facetName".to_string(), json!(field));
        body.insert("facetQuery".to_string(), json!(prefix));
        if let Some(filter) = filters.and_then(render_filter) {
            body.insert("filter".to_string(), json!(filter));
        }
        let (_, resp) = self
            .send(
                self.request(Method::POST, &format!("indexes/{}/facet-search", self.index_uid))
                    .json(&Value::Object(body)),
                "facet-search",
            )
            .await?;
        let mut values: Vec<FacetValue> = resp
            .get("facetHits")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|hit| {
                        Some(FacetValue {
                            value: hit.get("value")?.as_str()?.to_string(),
                            count: hit.get("count").and_then(Value::as_u64).unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        values.truncate(max_values);
        Ok(values)
    }

    /// The engine-native schema surface: the index settings object.
    pub async fn get_mapping(&self) -> Result<Value> {
        let (_, body) = self
            .send(
                self.request(Method::GET, &format!("indexes/{}/settings", self.index_uid)),
                "settings",
            )
            .await?;
        Ok(body)
    }

    pub async fn raw_query(&self, body: Value) -> Result<Value> {
        let (_, resp) = self
            .send(
                self.request(Method::POST, &format!("indexes/{}/search", self.index_uid))
                    .json(&body),
                "raw-search",
            )
            .await?;
        Ok(resp)
    }
}

/// Pick the `_formatted` entries that actually carry a highlight. Shapes
/// vary across backend versions; anything unrecognized yields no highlight
/// for that field rather than an error.
fn extract_highlights(formatted: Option<&Value>) -> IndexMap<String, Vec<String>> {
    let mut out = IndexMap::new();
    let Some(map) = formatted.and_then(Value::as_object) else {
        return out;
    };
    for (field, value) in map {
        match value {
            Value::String(s) if s.contains("<mark>") => {
                out.insert(field.clone(), vec![s.clone()]);
            }
            Value::Array(items) => {
                let marked: Vec<String> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|s| s.contains("<mark>"))
                    .map(str::to_string)
                    .collect();
                if !marked.is_empty() {
                    out.insert(field.clone(), marked);
                }
            }
            _ => {}
        }
    }
    out
}
