//! The emitted aggregation and filter shapes behind disjunctive faceting:
//! facet filters move to post_filter, and each facet's aggregation excludes
//! its own filter while honoring every other facet's.

use search_gateway::config::IndexConfig;
use search_gateway::engines::elastic::query::{
    build_search_body, case_insensitive_regex, facet_values_body,
};
use search_gateway::models::{FilterValue, SearchOptions};
use serde_json::json;

fn config(yaml: &str) -> IndexConfig {
    serde_yaml::from_str(yaml).expect("test config should parse")
}

fn basic_config() -> IndexConfig {
    config(
        r#"
engine: elasticsearch
host: http://localhost:9200
index: artworks
"#,
    )
}

fn nested_config() -> IndexConfig {
    config(
        r#"
engine: elasticsearch
host: http://localhost:9200
index: artworks
fields:
  tags: { nested: metadata.tags }
"#,
    )
}

#[test]
fn non_facet_filters_stay_in_the_main_query() {
    let mut options = SearchOptions::default();
    options.filters.insert("category".to_string(), FilterValue::Term("painting".into()));
    let body = build_search_body("", &options, &basic_config(), None);
    assert_eq!(
        body["query"]["bool"]["filter"],
        json!([{ "term": { "category": "painting" } }])
    );
    assert!(body.get("post_filter").is_none());
}

#[test]
fn faceted_filters_move_to_post_filter() {
    let mut options = SearchOptions::default();
    options.facets = vec!["category".into(), "period".into()];
    options.filters.insert("category".to_string(), FilterValue::Term("painting".into()));
    options.filters.insert("on_view".to_string(), FilterValue::Flag(true));
    let body = build_search_body("", &options, &basic_config(), None);

    // Only the non-facet filter narrows the aggregation input.
    assert_eq!(
        body["query"]["bool"]["filter"],
        json!([{ "term": { "on_view": true } }])
    );
    assert_eq!(
        body["post_filter"],
        json!({ "bool": { "filter": [{ "term": { "category": "painting" } }] } })
    );
}

#[test]
fn each_facet_excludes_its_own_filter_but_honors_the_others() {
    let mut options = SearchOptions::default();
    options.facets = vec!["category".into(), "period".into()];
    options.filters.insert("category".to_string(), FilterValue::Term("painting".into()));
    options.filters.insert("period".to_string(), FilterValue::Term("modern".into()));
    let body = build_search_body("", &options, &basic_config(), None);

    // category's aggregation is filtered by period's clause only.
    assert_eq!(
        body["aggs"]["category"],
        json!({
            "filter": { "bool": { "filter": [{ "term": { "period": "modern" } }] } },
            "aggs": { "category": { "terms": { "field": "category", "size": 100 } } }
        })
    );
    // period's aggregation is filtered by category's clause only.
    assert_eq!(
        body["aggs"]["period"],
        json!({
            "filter": { "bool": { "filter": [{ "term": { "category": "painting" } }] } },
            "aggs": { "period": { "terms": { "field": "period", "size": 100 } } }
        })
    );
}

#[test]
fn facet_with_only_its_own_filter_stays_plain() {
    // One facet filtered, the other facet unfiltered: the filtered facet has
    // no "other" clauses, so its aggregation is a plain terms.
    let mut options = SearchOptions::default();
    options.facets = vec!["category".into(), "period".into()];
    options.filters.insert("category".to_string(), FilterValue::Term("painting".into()));
    let body = build_search_body("", &options, &basic_config(), None);

    assert_eq!(
        body["aggs"]["category"],
        json!({ "terms": { "field": "category", "size": 100 } })
    );
    assert_eq!(
        body["aggs"]["period"],
        json!({
            "filter": { "bool": { "filter": [{ "term": { "category": "painting" } }] } },
            "aggs": { "period": { "terms": { "field": "period", "size": 100 } } }
        })
    );
}

#[test]
fn unfiltered_facets_are_plain_terms() {
    let mut options = SearchOptions::default();
    options.facets = vec!["category".into()];
    let body = build_search_body("", &options, &basic_config(), None);
    assert_eq!(
        body["aggs"]["category"],
        json!({ "terms": { "field": "category", "size": 100 } })
    );
    assert!(body.get("post_filter").is_none());
}

#[test]
fn filter_clause_shapes_match_the_contract() {
    let mut options = SearchOptions::default();
    options.filters.insert("a".to_string(), FilterValue::Term("x".into()));
    options.filters.insert("b".to_string(), FilterValue::Terms(vec!["x".into(), "y".into()]));
    options.filters.insert("c".to_string(), FilterValue::Flag(false));
    options
        .filters
        .insert("d".to_string(), FilterValue::Range { min: Some(1.0), max: Some(2.0) });
    options.filters.insert("e".to_string(), FilterValue::Range { min: Some(3.0), max: None });
    let body = build_search_body("", &options, &basic_config(), None);
    assert_eq!(
        body["query"]["bool"]["filter"],
        json!([
            { "term": { "a": "x" } },
            { "terms": { "b": ["x", "y"] } },
            { "term": { "c": false } },
            { "range": { "d": { "gte": 1.0, "lte": 2.0 } } },
            { "range": { "e": { "gte": 3.0 } } },
        ])
    );
}

#[test]
fn nested_fields_wrap_filters_in_nested_queries() {
    let mut options = SearchOptions::default();
    options.filters.insert("tags".to_string(), FilterValue::Term("old".into()));
    let body = build_search_body("", &options, &nested_config(), None);
    assert_eq!(
        body["query"]["bool"]["filter"],
        json!([{
            "nested": {
                "path": "metadata.tags",
                "query": { "term": { "tags": "old" } }
            }
        }])
    );
}

#[test]
fn nested_facets_wrap_terms_in_nested_aggregations() {
    let mut options = SearchOptions::default();
    options.facets = vec!["tags".into()];
    let body = build_search_body("", &options, &nested_config(), None);
    assert_eq!(
        body["aggs"]["tags"],
        json!({
            "nested": { "path": "metadata.tags" },
            "aggs": { "tags": { "terms": { "field": "tags", "size": 100 } } }
        })
    );
}

#[test]
fn nested_facet_with_exclusion_is_filter_outer_nested_inner() {
    let mut options = SearchOptions::default();
    options.facets = vec!["tags".into(), "category".into()];
    options.filters.insert("category".to_string(), FilterValue::Term("painting".into()));
    let body = build_search_body("", &options, &nested_config(), None);
    assert_eq!(
        body["aggs"]["tags"],
        json!({
            "filter": { "bool": { "filter": [{ "term": { "category": "painting" } }] } },
            "aggs": {
                "tags": {
                    "nested": { "path": "metadata.tags" },
                    "aggs": { "tags": { "terms": { "field": "tags", "size": 100 } } }
                }
            }
        })
    );
}

#[test]
fn facet_values_body_is_a_size_zero_filtered_terms_search() {
    let body = facet_values_body("category", "pa", None, 10, &basic_config());
    assert_eq!(body["size"], json!(0));
    assert_eq!(body["query"], json!({ "match_all": {} }));
    assert_eq!(
        body["aggs"]["facet_values"],
        json!({ "terms": { "field": "category", "size": 10, "include": ".*[pP][aA].*" } })
    );
}

#[test]
fn facet_values_body_narrows_with_filters_and_wraps_nested() {
    let mut filters = indexmap::IndexMap::new();
    filters.insert("period".to_string(), FilterValue::Term("modern".into()));
    let body = facet_values_body("tags", "o", Some(&filters), 5, &nested_config());
    assert_eq!(
        body["query"],
        json!({ "bool": { "filter": [{ "term": { "period": "modern" } }] } })
    );
    assert_eq!(
        body["aggs"]["facet_values"],
        json!({
            "nested": { "path": "metadata.tags" },
            "aggs": {
                "facet_values": { "terms": { "field": "tags", "size": 5, "include": ".*[oO].*" } }
            }
        })
    );
}

#[test]
fn prefix_regex_escapes_metacharacters_and_folds_case() {
    assert_eq!(case_insensitive_regex("ab"), "[aA][bB]");
    assert_eq!(case_insensitive_regex("a.b"), "[aA]\\.[bB]");
    assert_eq!(case_insensitive_regex("1+1"), "1\\+1");
    assert_eq!(case_insensitive_regex("Ä"), "Ä");
}
