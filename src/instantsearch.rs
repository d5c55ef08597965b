//! Algolia InstantSearch compatibility: translate multi-query request
//! bodies into the normalized form and render results back in Algolia's
//! shape. Only the wire format is Algolia's — execution goes through the
//! same engines as the native surface.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::models::{FilterValue, Highlight, SearchOptions, SearchResult};

pub const DEFAULT_PRE_TAG: &str = "<em>";
pub const DEFAULT_POST_TAG: &str = "</em>";

#[derive(Debug, Clone, Deserialize)]
pub struct MultiQueryBody {
    pub requests: Vec<InstantSearchRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantSearchRequest {
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub params: Option<InstantSearchParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantSearchParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub hits_per_page: Option<i64>,
    #[serde(default)]
    pub facets: Option<Value>,
    #[serde(default)]
    pub facet_filters: Option<Value>,
    #[serde(default)]
    pub numeric_filters: Option<Value>,
    #[serde(default)]
    pub highlight_pre_tag: Option<String>,
    #[serde(default)]
    pub highlight_post_tag: Option<String>,
}

#[derive(Debug)]
pub struct TranslatedQuery {
    pub query: String,
    pub options: SearchOptions,
    pub pre_tag: String,
    pub post_tag: String,
}

/// Parse Algolia `facetFilters`: the outer list is AND, an inner list is OR
/// over one field, entries split on the first `:`, negations (leading `-`)
/// are skipped, and a single-value field collapses to a bare string.
pub fn parse_facet_filters(value: &Value) -> IndexMap<String, FilterValue> {
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut push = |entry: &str| {
        if entry.starts_with('-') {
            return;
        }
        if let Some((field, v)) = entry.split_once(':') {
            grouped.entry(field.to_string()).or_default().push(v.to_string());
        }
    };
    match value {
        Value::String(entry) => push(entry),
        Value::Array(outer) => {
            for item in outer {
                match item {
                    Value::String(entry) => push(entry),
                    Value::Array(inner) => {
                        for entry in inner.iter().filter_map(Value::as_str) {
                            push(entry);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    grouped
        .into_iter()
        .map(|(field, mut values)| {
            let filter = if values.len() == 1 {
                FilterValue::Term(values.remove(0))
            } else {
                FilterValue::Terms(values)
            };
            (field, filter)
        })
        .collect()
}

fn numeric_filter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)(>=|<=|>|<)(.+)$").unwrap())
}

/// Parse Algolia `numericFilters`, merging per-field `min`/`max` bounds.
pub fn parse_numeric_filters(value: &Value) -> IndexMap<String, FilterValue> {
    let mut bounds: IndexMap<String, (Option<f64>, Option<f64>)> = IndexMap::new();
    let entries: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    for entry in entries {
        let Some(caps) = numeric_filter_re().captures(entry) else { continue };
        let field = caps[1].trim().to_string();
        let Ok(number) = caps[3].trim().parse::<f64>() else { continue };
        let slot = bounds.entry(field).or_default();
        match &caps[2] {
            ">=" | ">" => slot.0 = Some(number),
            _ => slot.1 = Some(number),
        }
    }
    bounds
        .into_iter()
        .map(|(field, (min, max))| (field, FilterValue::Range { min, max }))
        .collect()
}

fn requested_facets(value: Option<&Value>, default_facets: Option<&[String]>) -> Vec<String> {
    let explicit: Vec<String> = match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(list)) => {
            list.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }
        _ => Vec::new(),
    };
    // The `["*"]` sentinel means "whatever the index considers its facets".
    if explicit.iter().any(|f| f == "*") {
        return default_facets.map(<[String]>::to_vec).unwrap_or_default();
    }
    explicit
}

/// Translate one multi-query request into the normalized form.
pub fn translate_request(
    request: &InstantSearchRequest,
    default_facets: Option<&[String]>,
) -> TranslatedQuery {
    let params = request.params.clone().unwrap_or_default();
    let query = params
        .query
        .clone()
        .or_else(|| request.query.clone())
        .unwrap_or_default();

    let mut options = SearchOptions::default();
    options.page = params.page.map(|p| (p + 1).max(1) as u32).unwrap_or(1);
    options.per_page =
        params.hits_per_page.map(|n| n.clamp(1, 100) as u32).unwrap_or(options.per_page);
    options.facets = requested_facets(params.facets.as_ref(), default_facets);
    if let Some(facet_filters) = &params.facet_filters {
        options.filters.extend(parse_facet_filters(facet_filters));
    }
    if let Some(numeric_filters) = &params.numeric_filters {
        options.filters.extend(parse_numeric_filters(numeric_filters));
    }
    options.highlight = Highlight::Enabled(true);

    TranslatedQuery {
        query,
        options,
        pre_tag: params.highlight_pre_tag.unwrap_or_else(|| DEFAULT_PRE_TAG.to_string()),
        post_tag: params.highlight_post_tag.unwrap_or_else(|| DEFAULT_POST_TAG.to_string()),
    }
}

/// Render one normalized result in Algolia's response shape.
pub fn render_result(
    result: &SearchResult,
    query: &str,
    handle: &str,
    pre_tag: &str,
    post_tag: &str,
    processing_time_ms: u64,
) -> Value {
    let hits: Vec<Value> = result
        .hits
        .iter()
        .map(|hit| {
            let mut out = Map::new();
            out.insert("objectID".to_string(), json!(hit.object_id));
            for (key, value) in &hit.source {
                out.insert(key.clone(), value.clone());
            }
            if !hit.highlights.is_empty() {
                let mut highlight_result = Map::new();
                for (field, fragments) in &hit.highlights {
                    let value = fragments
                        .join(" ... ")
                        .replace("<mark>", pre_tag)
                        .replace("</mark>", post_tag);
                    let match_level = if fragments.is_empty() { "none" } else { "full" };
                    highlight_result.insert(
                        field.clone(),
                        json!({ "value": value, "matchLevel": match_level }),
                    );
                }
                out.insert("_highlightResult".to_string(), Value::Object(highlight_result));
            }
            Value::Object(out)
        })
        .collect();

    let mut facets = Map::new();
    for (field, values) in &result.facets {
        let mut counts = Map::new();
        for value in values {
            counts.insert(value.value.clone(), json!(value.count));
        }
        facets.insert(field.clone(), Value::Object(counts));
    }

    json!({
        "index": handle,
        "hits": hits,
        "nbHits": result.total_hits,
        "page": result.page.saturating_sub(1),
        "nbPages": result.total_pages,
        "hitsPerPage": result.per_page,
        "facets": facets,
        "exhaustiveNbHits": true,
        "query": query,
        "processingTimeMS": processing_time_ms,
    })
}
