//! Engine adapters and the full handler pipeline exercised against mock
//! backends.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use search_gateway::cache::ResultCache;
use search_gateway::config::{GatewayConfig, IndexConfig};
use search_gateway::engines::{build_registry, Engine};
use search_gateway::handlers::{router, AppState};
use search_gateway::models::{FilterValue, SearchOptions};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn index_config(yaml: String) -> IndexConfig {
    serde_yaml::from_str(&yaml).expect("test config")
}

fn elastic_config(host: &str) -> IndexConfig {
    index_config(format!(
        r#"
engine: elasticsearch
host: {host}
index: artworks
"#
    ))
}

async fn gateway_state(host: &str) -> Arc<AppState> {
    let yaml = format!(
        r#"
indexes:
  catalog:
    engine: elasticsearch
    host: {host}
    index: artworks
    defaults:
      facets: [category, period]
"#
    );
    let config = GatewayConfig::from_yaml(&yaml).expect("gateway config");
    Arc::new(AppState {
        indexes: build_registry(&config).expect("registry"),
        cache: ResultCache::disabled(),
        api_key: None,
    })
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn es_hit(id: &str, source: Value) -> Value {
    json!({ "_id": id, "_index": "artworks", "_score": 1.0, "_source": source })
}

// ---------------------------------------------------------------------------
// Elastic engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disjunctive_facets_keep_alternatives_visible() {
    let server = MockServer::start().await;
    // The filtered facet's own value narrows hits via post_filter, yet the
    // aggregation response still lists the sibling value.
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({
            "post_filter": { "bool": { "filter": [{ "term": { "category": "painting" } }] } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": { "value": 4 }, "hits": [ es_hit("1", json!({ "category": "painting" })) ] },
            "aggregations": {
                "category": { "buckets": [
                    { "key": "painting", "doc_count": 4 },
                    { "key": "sculpture", "doc_count": 2 }
                ]},
                "period": {
                    "doc_count": 4,
                    "period": { "buckets": [{ "key": "modern", "doc_count": 4 }] }
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = Engine::from_config(&elastic_config(&server.uri())).unwrap();
    let mut options = SearchOptions::default();
    options.facets = vec!["category".into(), "period".into()];
    options.filters.insert("category".to_string(), FilterValue::Term("painting".into()));
    let result = engine.search("", &options).await.unwrap();

    let categories: Vec<&str> =
        result.facets["category"].iter().map(|v| v.value.as_str()).collect();
    assert!(categories.contains(&"sculpture"), "alternative value stays visible");
    assert_eq!(result.facets["period"][0].count, 4, "restricted to the selected category");
    assert_eq!(result.total_hits, 4);
}

#[tokio::test]
async fn get_document_returns_none_on_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artworks/_doc/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "found": false })))
        .mount(&server)
        .await;
    let engine = Engine::from_config(&elastic_config(&server.uri())).unwrap();
    assert!(engine.get_document("9").await.unwrap().is_none());
}

#[tokio::test]
async fn get_document_passes_the_backend_document_through() {
    let server = MockServer::start().await;
    let doc = json!({ "_index": "artworks", "_id": "9", "found": true, "_source": { "title": "x" } });
    Mock::given(method("GET"))
        .and(path("/artworks/_doc/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc.clone()))
        .mount(&server)
        .await;
    let engine = Engine::from_config(&elastic_config(&server.uri())).unwrap();
    assert_eq!(engine.get_document("9").await.unwrap(), Some(doc));
}

#[tokio::test]
async fn cross_index_document_fetch_goes_through_search() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/press,blog/_search"))
        .and(body_partial_json(json!({ "query": { "ids": { "values": ["9"] } }, "size": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": 1, "hits": [ { "_id": "9", "_index": "press", "_source": {} } ] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let config = index_config(format!(
        r#"
engine: elasticsearch
host: {}
index: [press, blog]
"#,
        server.uri()
    ));
    let engine = Engine::from_config(&config).unwrap();
    let doc = engine.get_document("9").await.unwrap().expect("hit");
    assert_eq!(doc["_id"], json!("9"));
}

#[tokio::test]
async fn mapping_is_fetched_once_and_memoized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artworks/_mapping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "artworks": { "mappings": { "properties": {} } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let engine = Engine::from_config(&elastic_config(&server.uri())).unwrap();
    let first = engine.get_mapping().await.unwrap();
    let second = engine.get_mapping().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn backend_errors_propagate_their_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "type": "search_phase_execution_exception", "reason": "boom" },
            "status": 500
        })))
        .mount(&server)
        .await;
    let engine = Engine::from_config(&elastic_config(&server.uri())).unwrap();
    let err = engine.search("q", &SearchOptions::default()).await.unwrap_err();
    assert!(err.to_string().contains("boom"), "{err}");
}

#[tokio::test]
async fn raw_query_responses_are_verbatim() {
    let server = MockServer::start().await;
    let backend_body = json!({ "took": 3, "hits": { "total": 1, "hits": [] }, "custom": true });
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({ "query": { "match_all": {} } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(backend_body.clone()))
        .mount(&server)
        .await;
    let engine = Engine::from_config(&elastic_config(&server.uri())).unwrap();
    let resp = engine.raw_query(json!({ "query": { "match_all": {} } })).await.unwrap();
    assert_eq!(resp, backend_body);
}

#[tokio::test]
async fn facet_values_search_narrows_by_prefix() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({ "size": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": 2, "hits": [] },
            "aggregations": { "facet_values": { "buckets": [
                { "key": "painting", "doc_count": 4 },
                { "key": "pastel", "doc_count": 1 }
            ]}}
        })))
        .mount(&server)
        .await;
    let engine = Engine::from_config(&elastic_config(&server.uri())).unwrap();
    let values = engine.search_facet_values("category", "pa", None, 10).await.unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].value, "painting");
    assert_eq!(values[0].count, 4);
}

// ---------------------------------------------------------------------------
// Meilisearch engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn meilisearch_search_translates_and_normalizes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uid": "products", "primaryKey": "sku"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/indexes/products/search"))
        .and(body_partial_json(json!({
            "q": "shoe",
            "offset": 0,
            "limit": 20,
            "filter": "brand = \"Nike\"",
            "facets": ["brand"],
            "highlightPreTag": "<mark>",
            "highlightPostTag": "</mark>"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{
                "sku": "S1",
                "name": "Shoe",
                "_formatted": { "name": "<mark>Shoe</mark>", "sku": "S1" }
            }],
            "estimatedTotalHits": 1,
            "facetDistribution": { "brand": { "Nike": 7, "Adidas": 2 } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = index_config(format!(
        r#"
engine: meilisearch
host: {}
index: products
"#,
        server.uri()
    ));
    let engine = Engine::from_config(&config).unwrap();
    let mut options = SearchOptions::default();
    options.facets = vec!["brand".into()];
    options.filters.insert("brand".to_string(), FilterValue::Term("Nike".into()));
    options.highlight = search_gateway::models::Highlight::Enabled(true);
    let result = engine.search("shoe", &options).await.unwrap();

    assert_eq!(result.total_hits, 1);
    let hit = &result.hits[0];
    assert_eq!(hit.object_id, "S1", "primary key field becomes objectID");
    assert_eq!(hit.index, "products");
    assert_eq!(hit.score, None);
    assert_eq!(hit.highlights["name"], vec!["<mark>Shoe</mark>".to_string()]);
    assert!(!hit.source.contains_key("_formatted"));
    assert_eq!(result.facets["brand"].len(), 2);
    assert!(result.suggestions.is_empty());
}

#[tokio::test]
async fn meilisearch_document_not_found_maps_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/products/documents/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Document `9` not found.",
            "code": "document_not_found"
        })))
        .mount(&server)
        .await;
    let config = index_config(format!(
        r#"
engine: meilisearch
host: {}
index: products
"#,
        server.uri()
    ));
    let engine = Engine::from_config(&config).unwrap();
    assert!(engine.get_document("9").await.unwrap().is_none());
}

#[tokio::test]
async fn meilisearch_facet_values_use_the_facet_search_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/products/facet-search"))
        .and(body_partial_json(json!({ "facetName": "brand", "facetQuery": "ni" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "facetHits": [{ "value": "Nike", "count": 7 }],
            "facetQuery": "ni"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let config = index_config(format!(
        r#"
engine: meilisearch
host: {}
index: products
"#,
        server.uri()
    ));
    let engine = Engine::from_config(&config).unwrap();
    let values = engine.search_facet_values("brand", "ni", None, 10).await.unwrap();
    assert_eq!(values, vec![search_gateway::models::FacetValue { value: "Nike".into(), count: 7 }]);
}

// ---------------------------------------------------------------------------
// Typesense engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typesense_search_translates_params_and_rewrites_dates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/events/documents/search"))
        .and(query_param("q", "gig"))
        .and(query_param("query_by", "name"))
        .and(query_param("query_by_weights", "10"))
        .and(query_param("filter_by", "venue:=`Main Hall`"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": 1,
            "hits": [{
                "document": { "id": "e1", "name": "Gig", "starts_at": 0 },
                "text_match": 578730,
                "highlight": { "name": { "snippet": "<mark>Gig</mark>" } }
            }],
            "facet_counts": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = index_config(format!(
        r#"
engine: typesense
host: {}
index: events
fields:
  starts_at: {{ date: true }}
"#,
        server.uri()
    ));
    let engine = Engine::from_config(&config).unwrap();
    let mut options = SearchOptions::default();
    options.boosts.insert("name".to_string(), 10.0);
    options.filters.insert("venue".to_string(), FilterValue::Term("Main Hall".into()));
    let result = engine.search("gig", &options).await.unwrap();

    let hit = &result.hits[0];
    assert_eq!(hit.object_id, "e1");
    assert_eq!(hit.index, "events");
    assert_eq!(hit.score, Some(578730.0));
    assert_eq!(hit.source["starts_at"], json!("1970-01-01T00:00:00Z"));
    assert_eq!(hit.highlights["name"], vec!["<mark>Gig</mark>".to_string()]);
}

#[tokio::test]
async fn typesense_empty_query_becomes_star() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/events/documents/search"))
        .and(query_param("q", "*"))
        .and(query_param("query_by", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": 0, "hits": [], "facet_counts": []
        })))
        .expect(1)
        .mount(&server)
        .await;
    let config = index_config(format!(
        r#"
engine: typesense
host: {}
index: events
"#,
        server.uri()
    ));
    let engine = Engine::from_config(&config).unwrap();
    let result = engine.search("", &SearchOptions::default()).await.unwrap();
    assert_eq!(result.total_hits, 0);
}

#[tokio::test]
async fn typesense_document_not_found_maps_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/events/documents/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Could not find a document with id: 9"
        })))
        .mount(&server)
        .await;
    let config = index_config(format!(
        r#"
engine: typesense
host: {}
index: events
"#,
        server.uri()
    ));
    let engine = Engine::from_config(&config).unwrap();
    assert!(engine.get_document("9").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Full handler pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn search_endpoint_emits_weighted_bool_prefix_and_cache_control() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({
            "query": { "bool": { "must": { "multi_match": {
                "query": "castle",
                "type": "bool_prefix",
                "fields": ["title^10", "description^2"]
            }}}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": { "value": 1 }, "hits": [ es_hit("1", json!({ "title": "Castle" })) ] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = router(gateway_state(&server.uri()).await);
    let uri = format!(
        "/catalog/search?q=castle&boosts={}",
        urlencoding::encode(r#"{"title":10,"description":2}"#)
    );
    let resp = app
        .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("public, max-age=10, stale-while-revalidate=50")
    );
    let body = body_json(resp).await;
    assert_eq!(body["totalHits"], json!(1));
    assert_eq!(body["hits"][0]["objectID"], json!("1"));
    assert_eq!(body["hits"][0]["title"], json!("Castle"));
}

#[tokio::test]
async fn document_endpoint_returns_404_for_missing_documents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artworks/_doc/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "found": false })))
        .mount(&server)
        .await;
    let app = router(gateway_state(&server.uri()).await);
    let resp = app
        .oneshot(Request::get("/catalog/documents/9").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body, json!({ "error": "Document not found" }));
}

#[tokio::test]
async fn mapping_endpoint_serves_the_engine_native_mapping_with_cache_control() {
    let server = MockServer::start().await;
    let mapping = json!({ "artworks": { "mappings": { "properties": {} } } });
    Mock::given(method("GET"))
        .and(path("/artworks/_mapping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mapping.clone()))
        .expect(1)
        .mount(&server)
        .await;
    let state = gateway_state(&server.uri()).await;
    let resp = router(state.clone())
        .oneshot(Request::get("/catalog/mapping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("public, max-age=300, stale-while-revalidate=3300")
    );
    assert_eq!(body_json(resp).await, mapping);

    // Second request is served from the engine's memoized mapping.
    let resp = router(state)
        .oneshot(Request::get("/catalog/mapping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn autocomplete_merges_hits_with_facet_lookups_and_omits_empty_facets() {
    let server = MockServer::start().await;
    // Hits query: perPage 5, highlight off.
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({ "size": 5 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": 1, "hits": [ es_hit("1", json!({ "title": "Castle" })) ] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    // Facet-value lookups, one per default facet.
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({
            "size": 0,
            "aggs": { "facet_values": { "terms": { "field": "category" } } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": 0, "hits": [] },
            "aggregations": { "facet_values": { "buckets": [
                { "key": "painting", "doc_count": 3 }
            ]}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({
            "size": 0,
            "aggs": { "facet_values": { "terms": { "field": "period" } } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": 0, "hits": [] },
            "aggregations": { "facet_values": { "buckets": [] } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = router(gateway_state(&server.uri()).await);
    let resp = app
        .oneshot(Request::get("/catalog/autocomplete?q=pa").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["hits"][0]["objectID"], json!("1"));
    assert_eq!(body["facets"]["category"][0]["value"], json!("painting"));
    assert!(body["facets"].get("period").is_none(), "empty facet omitted");
}

#[tokio::test]
async fn instantsearch_endpoint_translates_and_renders_algolia_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .and(body_partial_json(json!({
            "query": { "bool": { "filter": [{ "terms": { "category": ["A", "B"] } }] } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": { "total": { "value": 2 }, "hits": [
                es_hit("1", json!({ "title": "One" })),
                es_hit("2", json!({ "title": "Two" }))
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = router(gateway_state(&server.uri()).await);
    let body = json!({
        "requests": [{
            "indexName": "catalog",
            "params": {
                "query": "",
                "facetFilters": [["category:A", "category:B"]],
                "page": 0,
                "hitsPerPage": 5
            }
        }]
    });
    let resp = app
        .oneshot(
            Request::post("/catalog/instantsearch")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let result = &body["results"][0];
    assert_eq!(result["page"], json!(0));
    assert_eq!(result["hitsPerPage"], json!(5));
    assert_eq!(result["nbHits"], json!(2));
    assert_eq!(result["hits"][0]["objectID"], json!("1"));
    assert_eq!(result["exhaustiveNbHits"], json!(true));
}

#[tokio::test]
async fn backend_failures_surface_as_500_with_the_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/artworks/_search"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "reason": "shard failure" }, "status": 500
        })))
        .mount(&server)
        .await;
    let app = router(gateway_state(&server.uri()).await);
    let resp = app
        .oneshot(Request::get("/catalog/search?q=x").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert_eq!(body, json!({ "error": "shard failure" }));
}
