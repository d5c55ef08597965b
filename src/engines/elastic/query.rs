//! Translation of normalized requests into the Elasticsearch/OpenSearch
//! query DSL. Everything here is pure construction over `serde_json::Value`
//! so the emitted shapes can be asserted structurally in tests.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::config::IndexConfig;
use crate::models::{FilterValue, Highlight, SearchOptions, SortOrder};

/// The `must` clause: a `bool_prefix` multi-match over the boosted fields,
/// the searchable fields, or everything; `match_all` for a blank query.
fn text_clause(query: &str, options: &SearchOptions) -> Value {
    if query.trim().is_empty() {
        return json!({ "match_all": {} });
    }
    let fields: Vec<String> = if !options.boosts.is_empty() {
        options.boosts.iter().map(|(field, weight)| format!("{field}^{weight}")).collect()
    } else if let Some(searchable) = &options.searchable_fields {
        searchable.clone()
    } else {
        vec!["*".to_string()]
    };
    json!({
        "multi_match": {
            "query": query,
            "type": "bool_prefix",
            "fields": fields,
        }
    })
}

fn base_clause(field: &str, value: &FilterValue) -> Value {
    match value {
        FilterValue::Term(s) => json!({ "term": { field: s } }),
        FilterValue::Terms(list) => json!({ "terms": { field: list } }),
        FilterValue::Flag(b) => json!({ "term": { field: b } }),
        FilterValue::Range { min, max } => {
            let mut range = Map::new();
            if let Some(min) = min {
                range.insert("gte".to_string(), json!(min));
            }
            if let Some(max) = max {
                range.insert("lte".to_string(), json!(max));
            }
            json!({ "range": { field: range } })
        }
    }
}

/// A filter clause, wrapped in `nested` when the field has a configured
/// nested path.
pub fn filter_clause(field: &str, value: &FilterValue, config: &IndexConfig) -> Value {
    let clause = base_clause(field, value);
    match config.nested_path(field) {
        Some(path) => json!({ "nested": { "path": path, "query": clause } }),
        None => clause,
    }
}

/// Split filters into per-facet clause lists and the rest. Facet filters
/// move to `post_filter` so they narrow hits without shrinking their own
/// facet's counts.
fn partition_filters(
    options: &SearchOptions,
    config: &IndexConfig,
) -> (IndexMap<String, Vec<Value>>, Vec<Value>) {
    let mut facet_filters: IndexMap<String, Vec<Value>> = IndexMap::new();
    let mut rest = Vec::new();
    for (field, value) in &options.filters {
        let clause = filter_clause(field, value, config);
        if options.facets.iter().any(|f| f == field) {
            facet_filters.entry(field.clone()).or_default().push(clause);
        } else {
            rest.push(clause);
        }
    }
    (facet_filters, rest)
}

/// Facet aggregations with exclude-own-filter wrapping. When other facets
/// carry active filters, this facet's aggregation is wrapped in a filter of
/// those clauses so its counts reflect every selection except its own.
fn facet_aggregations(
    options: &SearchOptions,
    config: &IndexConfig,
    facet_filters: &IndexMap<String, Vec<Value>>,
    aggs: &mut Map<String, Value>,
) {
    for facet in &options.facets {
        let terms = json!({ "terms": { "field": facet, "size": 100 } });
        let inner = match config.nested_path(facet) {
            Some(path) => json!({ "nested": { "path": path }, "aggs": { facet: terms } }),
            None => terms,
        };
        let other_clauses: Vec<Value> = facet_filters
            .iter()
            .filter(|(field, _)| *field != facet)
            .flat_map(|(_, clauses)| clauses.iter().cloned())
            .collect();
        let agg = if other_clauses.is_empty() {
            inner
        } else {
            json!({
                "filter": { "bool": { "filter": other_clauses } },
                "aggs": { facet: inner },
            })
        };
        aggs.insert(facet.clone(), agg);
    }
}

fn highlight_clause(highlight: &Highlight) -> Option<Value> {
    let fields = match highlight {
        Highlight::Enabled(false) => return None,
        Highlight::Enabled(true) => json!({ "*": {} }),
        Highlight::Fields(list) => {
            let mut map = Map::new();
            for field in list {
                map.insert(field.clone(), json!({}));
            }
            Value::Object(map)
        }
    };
    Some(json!({
        "pre_tags": ["<mark>"],
        "post_tags": ["</mark>"],
        "fields": fields,
    }))
}

fn suggest_clause(query: &str, options: &SearchOptions, config: &IndexConfig) -> Option<Value> {
    if !options.suggest || query.trim().is_empty() {
        return None;
    }
    let field = config.defaults.suggest_field.as_deref()?;
    if field == "_all" {
        return None;
    }
    Some(json!({
        "text": query,
        "suggestion": {
            "phrase": { "field": field, "size": 3, "gram_size": 3 }
        }
    }))
}

/// Resolve a sort field against the cached index mapping: a text field with
/// a `.keyword` sub-field sorts on `field.keyword`.
///
/// Only the first index's mappings are consulted; a cross-index handle
/// never reaches the second one.
pub fn resolve_sort_field(mapping: &Value, index_names: &[String], field: &str) -> String {
    let first = index_names
        .first()
        .and_then(|name| mapping.get(name))
        .or_else(|| mapping.as_object().and_then(|m| m.values().next()));
    let Some(mut node) = first.and_then(|idx| idx.pointer("/mappings/properties")) else {
        return field.to_string();
    };
    let mut segments = field.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(child) = node.get(segment) else {
            return field.to_string();
        };
        if segments.peek().is_some() {
            let Some(nested) = child.get("properties") else {
                return field.to_string();
            };
            node = nested;
        } else {
            node = child;
        }
    }
    let is_text = node.get("type").and_then(Value::as_str) == Some("text");
    let has_keyword = node.pointer("/fields/keyword").is_some();
    if is_text && has_keyword {
        format!("{field}.keyword")
    } else {
        field.to_string()
    }
}

/// Build the full `_search` body for a normalized request.
pub fn build_search_body(
    query: &str,
    options: &SearchOptions,
    config: &IndexConfig,
    mapping: Option<&Value>,
) -> Value {
    let (facet_filters, mut main_filters) = partition_filters(options, config);

    let mut aggs = Map::new();
    facet_aggregations(options, config, &facet_filters, &mut aggs);
    for (field, interval) in &options.histogram {
        aggs.insert(
            format!("__histogram_{field}"),
            json!({
                "histogram": { "field": field, "interval": interval, "min_doc_count": 1 }
            }),
        );
    }
    if let Some(grid) = &options.geo_grid {
        let bounds = serde_json::to_value(grid.bounds).expect("bounds serialize");
        let mut bounding_box = Map::new();
        bounding_box.insert(grid.field.clone(), bounds.clone());
        main_filters.push(json!({ "geo_bounding_box": bounding_box }));
        aggs.insert(
            "__geo_grid".to_string(),
            json!({
                "geotile_grid": {
                    "field": grid.field,
                    "precision": grid.precision,
                    "bounds": bounds,
                },
                "aggs": { "sample": { "top_hits": { "size": 1 } } }
            }),
        );
    }

    let mut bool_query = Map::new();
    bool_query.insert("must".to_string(), text_clause(query, options));
    if !main_filters.is_empty() {
        bool_query.insert("filter".to_string(), Value::Array(main_filters));
    }

    let mut body = Map::new();
    body.insert("from".to_string(), json!(options.page.saturating_sub(1) * options.per_page));
    body.insert("size".to_string(), json!(options.per_page));
    body.insert("query".to_string(), json!({ "bool": bool_query }));

    if !facet_filters.is_empty() {
        let combined: Vec<Value> = facet_filters.values().flatten().cloned().collect();
        body.insert("post_filter".to_string(), json!({ "bool": { "filter": combined } }));
    }
    if !aggs.is_empty() {
        body.insert("aggs".to_string(), Value::Object(aggs));
    }
    if !options.sort.is_empty() {
        let sort: Vec<Value> = options
            .sort
            .iter()
            .map(|(field, order)| {
                let resolved = match mapping {
                    Some(mapping) => {
                        resolve_sort_field(mapping, &config.index_names(), field)
                    }
                    None => field.clone(),
                };
                json!({ resolved: { "order": order_str(order) } })
            })
            .collect();
        body.insert("sort".to_string(), Value::Array(sort));
    }
    if let Some(highlight) = highlight_clause(&options.highlight) {
        body.insert("highlight".to_string(), highlight);
    }
    if let Some(suggest) = suggest_clause(query, options, config) {
        body.insert("suggest".to_string(), suggest);
    }
    if let Some(attributes) = &options.attributes_to_retrieve {
        body.insert("_source".to_string(), json!(attributes));
    }

    Value::Object(body)
}

fn order_str(order: &SortOrder) -> &'static str {
    order.as_str()
}

/// Body for facet-value type-ahead: a size-0 search whose single terms
/// aggregation includes only values matching the prefix case-insensitively.
pub fn facet_values_body(
    field: &str,
    prefix: &str,
    filters: Option<&IndexMap<String, FilterValue>>,
    max_values: usize,
    config: &IndexConfig,
) -> Value {
    let query = match filters {
        Some(filters) if !filters.is_empty() => {
            let clauses: Vec<Value> =
                filters.iter().map(|(f, v)| filter_clause(f, v, config)).collect();
            json!({ "bool": { "filter": clauses } })
        }
        _ => json!({ "match_all": {} }),
    };
    let include = format!(".*{}.*", case_insensitive_regex(prefix));
    let terms = json!({ "terms": { "field": field, "size": max_values, "include": include } });
    let agg = match config.nested_path(field) {
        Some(path) => json!({ "nested": { "path": path }, "aggs": { "facet_values": terms } }),
        None => terms,
    };
    json!({ "size": 0, "query": query, "aggs": { "facet_values": agg } })
}

/// Escape regex metacharacters, then make each ASCII letter match either
/// case: `"ab"` becomes `"[aA][bB]"`.
pub fn case_insensitive_regex(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() * 4);
    for c in prefix.chars() {
        if c.is_ascii_alphabetic() {
            out.push('[');
            out.push(c.to_ascii_lowercase());
            out.push(c.to_ascii_uppercase());
            out.push(']');
        } else if "\\.^$|?*+()[]{}".contains(c) {
            out.push('\\');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}
