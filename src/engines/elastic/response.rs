//! Normalization of Elasticsearch/OpenSearch responses into the gateway's
//! shared result shape.

use indexmap::IndexMap;
use serde_json::Value;

use crate::geotile;
use crate::models::{
    total_pages, FacetValue, GeoCluster, HistogramBucket, SearchHit, SearchOptions, SearchResult,
};

pub fn normalize_hit(hit: &Value) -> SearchHit {
    let source = hit
        .get("_source")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let id = match hit.get("_id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let index = hit.get("_index").and_then(Value::as_str).unwrap_or_default().to_string();
    let score = hit.get("_score").and_then(Value::as_f64);
    let highlights: IndexMap<String, Vec<String>> = hit
        .get("highlight")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(field, fragments)| {
                    let fragments = fragments
                        .as_array()
                        .map(|arr| {
                            arr.iter().filter_map(|f| f.as_str().map(str::to_string)).collect()
                        })
                        .unwrap_or_default();
                    (field.clone(), fragments)
                })
                .collect()
        })
        .unwrap_or_default();
    SearchHit::new(source, id, index, score, highlights)
}

/// Total hits arrive as a plain integer in older responses and as
/// `{value, relation}` in newer ones.
fn total_hits(hits: &Value) -> u64 {
    match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::Object(obj)) => obj.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => 0,
    }
}

/// Walk an aggregation node down to its buckets, descending through the
/// filter and nested wrappers which repeat the aggregation's own name.
pub fn extract_buckets<'a>(name: &str, node: &'a Value) -> Option<&'a [Value]> {
    let mut node = node;
    loop {
        if let Some(buckets) = node.get("buckets").and_then(Value::as_array) {
            return Some(buckets);
        }
        node = node.get(name)?;
    }
}

fn bucket_value(key: Option<&Value>) -> String {
    match key {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

pub fn buckets_to_facet_values(buckets: &[Value]) -> Vec<FacetValue> {
    buckets
        .iter()
        .map(|bucket| FacetValue {
            value: bucket_value(bucket.get("key")),
            count: bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
        })
        .collect()
}

fn suggestions(body: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(suggest) = body.get("suggest").and_then(Value::as_object) {
        for entries in suggest.values() {
            let Some(entries) = entries.as_array() else { continue };
            for entry in entries {
                let Some(options) = entry.get("options").and_then(Value::as_array) else {
                    continue;
                };
                for option in options {
                    if let Some(text) = option.get("text").and_then(Value::as_str) {
                        out.push(text.to_string());
                    }
                }
            }
        }
    }
    out
}

pub fn normalize_search_response(body: &Value, options: &SearchOptions) -> SearchResult {
    let hits_node = body.get("hits").cloned().unwrap_or(Value::Null);
    let hits: Vec<SearchHit> = hits_node
        .get("hits")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(normalize_hit).collect())
        .unwrap_or_default();
    let total = total_hits(&hits_node);

    let aggregations = body.get("aggregations");

    let mut facets: IndexMap<String, Vec<FacetValue>> = IndexMap::new();
    for facet in &options.facets {
        let values = aggregations
            .and_then(|aggs| aggs.get(facet))
            .and_then(|node| extract_buckets(facet, node))
            .map(buckets_to_facet_values)
            .unwrap_or_default();
        facets.insert(facet.clone(), values);
    }

    let histograms = if options.histogram.is_empty() {
        None
    } else {
        let mut out: IndexMap<String, Vec<HistogramBucket>> = IndexMap::new();
        for field in options.histogram.keys() {
            let buckets = aggregations
                .and_then(|aggs| aggs.get(format!("__histogram_{field}")))
                .and_then(|node| node.get("buckets"))
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .map(|bucket| HistogramBucket {
                            key: bucket.get("key").and_then(Value::as_f64).unwrap_or(0.0),
                            count: bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
                        })
                        .collect()
                })
                .unwrap_or_default();
            out.insert(field.clone(), buckets);
        }
        Some(out)
    };

    let geo_clusters = options.geo_grid.as_ref().map(|_| {
        aggregations
            .and_then(|aggs| aggs.pointer("/__geo_grid/buckets"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|bucket| {
                        let key = bucket.get("key")?.as_str()?.to_string();
                        let center = geotile::tile_to_lat_lng(&key)?;
                        let sample = bucket
                            .pointer("/sample/hits/hits/0")
                            .map(normalize_hit);
                        Some(GeoCluster {
                            lat: center.lat,
                            lng: center.lng,
                            count: bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
                            key,
                            hit: sample,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    });

    SearchResult {
        hits,
        total_hits: total,
        page: options.page,
        per_page: options.per_page,
        total_pages: total_pages(total, options.per_page),
        facets,
        histograms,
        geo_clusters,
        suggestions: suggestions(body),
    }
}
