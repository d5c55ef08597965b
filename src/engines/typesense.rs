//! Typesense adapter. Translates the normalized contract onto Typesense's
//! `filter_by` / `sort_by` / `facet_by` search parameters.

use std::time::Duration;

use indexmap::IndexMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::IndexConfig;
use crate::error::{GatewayError, Result};
use crate::models::{
    total_pages, FacetValue, FilterValue, Highlight, SearchHit, SearchOptions, SearchResult,
};

pub struct TypesenseEngine {
    base_url: String,
    http: Client,
    api_key: Option<String>,
    collection: String,
    date_fields: Vec<String>,
}

fn escape_value(value: &str) -> String {
    value.replace('`', "\\`")
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Render the filters map as a `filter_by` expression.
pub fn render_filter_by(filters: &IndexMap<String, FilterValue>) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|(field, value)| match value {
            FilterValue::Term(s) => format!("{field}:=`{}`", escape_value(s)),
            FilterValue::Terms(list) => {
                let quoted: Vec<String> =
                    list.iter().map(|s| format!("`{}`", escape_value(s))).collect();
                format!("{field}:=[{}]", quoted.join(","))
            }
            FilterValue::Flag(b) => format!("{field}:={b}"),
            FilterValue::Range { min, max } => {
                let mut bounds = Vec::new();
                if let Some(min) = min {
                    bounds.push(format!("{field}:>={}", format_number(*min)));
                }
                if let Some(max) = max {
                    bounds.push(format!("{field}:<={}", format_number(*max)));
                }
                bounds.join(" && ")
            }
        })
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" && "))
    }
}

pub fn render_sort_by(sort: &IndexMap<String, crate::models::SortOrder>) -> String {
    sort.iter()
        .map(|(field, order)| format!("{field}:{}", order.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

fn epoch_to_iso(secs: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(secs).ok()?.format(&Rfc3339).ok()
}

impl TypesenseEngine {
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let names = config.index_names();
        if names.len() != 1 {
            return Err(GatewayError::Config(
                "typesense indexes take exactly one backend collection name".into(),
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
            collection: names.into_iter().next().unwrap(),
            date_fields: config.date_fields(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-TYPESENSE-API-KEY", key);
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
                .unwrap_or_else(|| format!("typesense {op} failed ({status})"));
            tracing::event!(
                target: "typesense.request",
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

    async fn search_request(&self, params: Vec<(String, String)>, op: &str) -> Result<Value> {
        let path = format!("collections/{}/documents/search", self.collection);
        let (status, body) = self
            .send(self.request(Method::GET, &path).query(&params), op)
            .await?;
        if !status.is_success() {
            return Err(GatewayError::Backend(
                body.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("typesense {op} failed ({status})")),
            ));
        }
        Ok(body)
    }

    /// Declared date fields hold seconds-since-epoch; rewrite them to ISO
    /// strings when normalizing documents.
    fn rewrite_dates(&self, source: &mut Map<String, Value>) {
        for field in &self.date_fields {
            if let Some(secs) = source.get(field).and_then(Value::as_i64) {
                if let Some(iso) = epoch_to_iso(secs) {
                    source.insert(field.clone(), Value::String(iso));
                }
            }
        }
    }

    fn normalize_hit(&self, hit: &Value) -> SearchHit {
        let mut source = hit
            .get("document")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        self.rewrite_dates(&mut source);
        let object_id = match source.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let score = hit.get("text_match").and_then(Value::as_f64);
        SearchHit::new(source, object_id, self.collection.clone(), score, extract_highlights(hit))
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        let mut params: Vec<(String, String)> = Vec::new();
        let q = if query.trim().is_empty() { "*" } else { query };
        params.push(("q".into(), q.to_string()));

        let query_by: Vec<String> = if !options.boosts.is_empty() {
            options.boosts.keys().cloned().collect()
        } else if let Some(searchable) = &options.searchable_fields {
            searchable.clone()
        } else {
            vec!["*".to_string()]
        };
        params.push(("query_by".into(), query_by.join(",")));
        if !options.boosts.is_empty() {
            let weights: Vec<String> = options
                .boosts
                .values()
                .map(|w| (w.round() as i64).to_string())
                .collect();
            params.push(("query_by_weights".into(), weights.join(",")));
        }

        if let Some(filter_by) = render_filter_by(&options.filters) {
            params.push(("filter_by".into(), filter_by));
        }
        if !options.sort.is_empty() {
            params.push(("sort_by".into(), render_sort_by(&options.sort)));
        }
        if !options.facets.is_empty() {
            params.push(("facet_by".into(), options.facets.join(",")));
        }
        params.push(("page".into(), options.page.to_string()));
        params.push(("per_page".into(), options.per_page.to_string()));
        match &options.highlight {
            Highlight::Enabled(false) => {
                params.push(("highlight_fields".into(), "none".into()));
            }
            Highlight::Enabled(true) => {
                params.push(("highlight_start_tag".into(), "<mark>".into()));
                params.push(("highlight_end_tag".into(), "</mark>".into()));
            }
            Highlight::Fields(list) => {
                params.push(("highlight_fields".into(), list.join(",")));
                params.push(("highlight_start_tag".into(), "<mark>".into()));
                params.push(("highlight_end_tag".into(), "</mark>".into()));
            }
        }
        if let Some(attributes) = &options.attributes_to_retrieve {
            params.push(("include_fields".into(), attributes.join(",")));
        }

        let resp = self.search_request(params, "search").await?;

        let hits: Vec<SearchHit> = resp
            .get("hits")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(|hit| self.normalize_hit(hit)).collect())
            .unwrap_or_default();
        let total = resp.get("found").and_then(Value::as_u64).unwrap_or(hits.len() as u64);

        let mut facets: IndexMap<String, Vec<FacetValue>> = IndexMap::new();
        if let Some(counts) = resp.get("facet_counts").and_then(Value::as_array) {
            for facet in &options.facets {
                let values = counts
                    .iter()
                    .find(|entry| {
                        entry.get("field_name").and_then(Value::as_str) == Some(facet.as_str())
                    })
                    .and_then(|entry| entry.get("counts"))
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|count| {
                                Some(FacetValue {
                                    value: count.get("value")?.as_str()?.to_string(),
                                    count: count.get("count").and_then(Value::as_u64).unwrap_or(0),
                                })
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
            "collections/{}/documents/{}",
            self.collection,
            urlencoding::encode(id)
        );
        let (status, body) = self.send(self.request(Method::GET, &path), "get-document").await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let mut doc = body;
        if let Some(map) = doc.as_object_mut() {
            let mut source = std::mem::take(map);
            self.rewrite_dates(&mut source);
            *map = source;
        }
        Ok(Some(doc))
    }

    pub async fn search_facet_values(
        &self,
        field: &str,
        prefix: &str,
        filters: Option<&IndexMap<String, FilterValue>>,
        max_values: usize,
    ) -> Result<Vec<FacetValue>> {
        let mut params: Vec<(String, String)> = vec![
            ("q".into(), "*".into()),
            ("query_by".into(), "*".into()),
            ("facet_by".into(), field.to_string()),
            ("facet_query".into(), format!("{field}:{prefix}")),
            ("max_facet_values".into(), max_values.to_string()),
            ("per_page".into(), "0".into()),
        ];
        if let Some(filter_by) = filters.and_then(render_filter_by) {
            params.push(("filter_by".into(), filter_by));
        }
        let resp = self.search_request(params, "facet-search").await?;
        let values = resp
            .get("facet_counts")
            .and_then(Value::as_array)
            .and_then(|counts| {
                counts.iter().find(|entry| {
                    entry.get("field_name").and_then(Value::as_str) == Some(field)
                })
            })
            .and_then(|entry| entry.get("counts"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|count| {
                        Some(FacetValue {
                            value: count.get("value")?.as_str()?.to_string(),
                            count: count.get("count").and_then(Value::as_u64).unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(values)
    }

    /// The engine-native schema surface: the collection definition.
    pub async fn get_mapping(&self) -> Result<Value> {
        let (status, body) = self
            .send(
                self.request(Method::GET, &format!("collections/{}", self.collection)),
                "collection",
            )
            .await?;
        if !status.is_success() {
            return Err(GatewayError::Backend(format!("collection fetch failed ({status})")));
        }
        Ok(body)
    }

    /// Raw passthrough: a JSON object of native search parameters, with
    /// `query_by` defaulted when absent.
    pub async fn raw_query(&self, body: Value) -> Result<Value> {
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(map) = body.as_object() {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                params.push((key.clone(), rendered));
            }
        }
        if !params.iter().any(|(key, _)| key == "query_by") {
            params.push(("query_by".into(), "*".into()));
        }
        self.search_request(params, "raw-search").await
    }
}

/// Highlight extraction across backend versions: the native object form is
/// preferred, the legacy array form accepted; anything else yields empty
/// highlights for the hit.
fn extract_highlights(hit: &Value) -> IndexMap<String, Vec<String>> {
    let mut out = IndexMap::new();
    if let Some(object) = hit.get("highlight").and_then(Value::as_object) {
        for (field, entry) in object {
            let fragments = snippet_fragments(entry);
            if !fragments.is_empty() {
                out.insert(field.clone(), fragments);
            }
        }
        if !out.is_empty() {
            return out;
        }
    }
    if let Some(legacy) = hit.get("highlights").and_then(Value::as_array) {
        for entry in legacy {
            let Some(field) = entry.get("field").and_then(Value::as_str) else { continue };
            let fragments = snippet_fragments(entry);
            if !fragments.is_empty() {
                out.insert(field.to_string(), fragments);
            }
        }
    }
    out
}

fn snippet_fragments(entry: &Value) -> Vec<String> {
    if let Some(snippets) = entry.get("snippets").and_then(Value::as_array) {
        return snippets.iter().filter_map(Value::as_str).map(str::to_string).collect();
    }
    if let Some(snippet) = entry.get("snippet").and_then(Value::as_str) {
        return vec![snippet.to_string()];
    }
    Vec::new()
}
