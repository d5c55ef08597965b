//! The request orchestrator: every REST endpoint, the parameter-to-options
//! pipeline, inbound/outbound alias translation, cache coordination, and
//! engine dispatch. Per request the sequence is strict: parse → defaults →
//! alias-in → cache-lookup → engine → alias-out → cache-put → respond.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::try_join_all;
use serde_json::{json, Map, Value};

use crate::alias::FieldAliasMap;
use crate::auth;
use crate::cache::{self, ResultCache, MAPPING_TTL_SECS, SEARCH_TTL_SECS};
use crate::engines::IndexContext;
use crate::error::{GatewayError, Result};
use crate::instantsearch::{self, MultiQueryBody};
use crate::models::{Highlight, SearchOptions, SearchResult};
use crate::params;

const SEARCH_CACHE_CONTROL: &str = "public, max-age=10, stale-while-revalidate=50";
const MAPPING_CACHE_CONTROL: &str = "public, max-age=300, stale-while-revalidate=3300";

const AUTOCOMPLETE_PER_PAGE: u32 = 5;
const AUTOCOMPLETE_FACET_VALUES: usize = 5;

pub struct AppState {
    pub indexes: HashMap<String, IndexContext>,
    pub cache: ResultCache,
    pub api_key: Option<String>,
}

impl AppState {
    fn index(&self, handle: &str) -> Result<&IndexContext> {
        self.indexes
            .get(handle)
            .ok_or_else(|| GatewayError::IndexNotFound(handle.to_string()))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cache/clear", post(cache_clear))
        .route("/indexes", get(list_indexes))
        .route("/{handle}/search", get(search))
        .route("/{handle}/autocomplete", get(autocomplete))
        .route("/{handle}/documents/{id}", get(get_document))
        .route("/{handle}/mapping", get(mapping))
        .route("/{handle}/query", post(raw_query))
        .route("/{handle}/facets/{field}", get(facet_values))
        .route("/{handle}/instantsearch", post(instantsearch_multi))
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer))
        .with_state(state)
}

/// Build normalized options from query parameters. Precedence per setting:
/// query-string value, then index defaults, then values derived from field
/// config, then the engine default.
pub fn build_options(
    ctx: &IndexContext,
    query_params: &HashMap<String, String>,
) -> Result<(String, SearchOptions)> {
    let q = query_params.get("q").cloned().unwrap_or_default();
    let mut options = SearchOptions::default();

    if let Some(raw) = query_params.get("page") {
        options.page = params::parse_int("page", raw)?.max(1) as u32;
    }
    let per_page = match query_params.get("perPage") {
        Some(raw) => params::parse_int("perPage", raw)?,
        None => ctx.config.defaults.per_page.unwrap_or(options.per_page) as i64,
    };
    options.per_page = per_page.clamp(1, 100) as u32;

    if let Some(raw) = query_params.get("sort") {
        options.sort = params::parse_sort(raw)?;
    }
    options.facets = query_params
        .get("facets")
        .map(|raw| params::parse_comma_list(raw))
        .or_else(|| ctx.config.defaults.facets.clone())
        .unwrap_or_default();
    if let Some(raw) = query_params.get("filters") {
        options.filters = params::parse_filters(raw)?;
    }
    options.highlight = match query_params.get("highlight") {
        Some(raw) => {
            if params::parse_bool("highlight", raw)? {
                // A configured list default refines the boolean toggle.
                match &ctx.config.defaults.highlight {
                    Some(Highlight::Fields(list)) => Highlight::Fields(list.clone()),
                    _ => Highlight::Enabled(true),
                }
            } else {
                Highlight::Enabled(false)
            }
        }
        None => ctx.config.defaults.highlight.clone().unwrap_or_default(),
    };
    if let Some(raw) = query_params.get("fields") {
        options.attributes_to_retrieve = Some(params::parse_comma_list(raw));
    }
    if let Some(raw) = query_params.get("suggest") {
        options.suggest = params::parse_bool("suggest", raw)?;
    }
    options.boosts = match query_params.get("boosts") {
        Some(raw) => params::parse_boosts(raw)?,
        None => ctx.boosts.clone(),
    };
    options.searchable_fields = ctx.searchable_fields.clone();
    if let Some(raw) = query_params.get("histogram") {
        options.histogram = params::parse_histogram(raw)?;
    }
    if let Some(raw) = query_params.get("geoGrid") {
        options.geo_grid = Some(params::parse_geo_grid(raw)?);
    }

    Ok((q, options))
}

pub fn apply_alias_inbound(options: &mut SearchOptions, aliases: &FieldAliasMap) {
    if aliases.is_empty() {
        return;
    }
    options.sort = aliases.keys_to_backend(std::mem::take(&mut options.sort));
    options.facets = aliases.array_to_backend(std::mem::take(&mut options.facets));
    options.filters = aliases.keys_to_backend(std::mem::take(&mut options.filters));
    options.boosts = aliases.keys_to_backend(std::mem::take(&mut options.boosts));
    if let Highlight::Fields(list) = &mut options.highlight {
        *list = aliases.array_to_backend(std::mem::take(list));
    }
    if let Some(attributes) = options.attributes_to_retrieve.take() {
        options.attributes_to_retrieve = Some(aliases.array_to_backend(attributes));
    }
    options.histogram = aliases.keys_to_backend(std::mem::take(&mut options.histogram));
    if let Some(grid) = &mut options.geo_grid {
        grid.field = aliases.to_backend(&grid.field).to_string();
    }
}

pub fn apply_alias_outbound(result: &mut SearchResult, aliases: &FieldAliasMap) {
    if aliases.is_empty() {
        return;
    }
    result.facets = aliases.keys_from_backend(std::mem::take(&mut result.facets));
    if let Some(histograms) = result.histograms.take() {
        result.histograms = Some(aliases.keys_from_backend(histograms));
    }
    for hit in &mut result.hits {
        hit.highlights = aliases.keys_from_backend(std::mem::take(&mut hit.highlights));
    }
    if let Some(clusters) = &mut result.geo_clusters {
        for cluster in clusters {
            if let Some(hit) = &mut cluster.hit {
                hit.highlights = aliases.keys_from_backend(std::mem::take(&mut hit.highlights));
            }
        }
    }
}

fn with_cache_control(resp: impl IntoResponse, value: &'static str) -> Response {
    let mut resp = resp.into_response();
    resp.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static(value));
    resp
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "status": "ok", "cache": state.cache.status() }))
}

async fn cache_clear(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cleared = state.cache.flush().await;
    Json(json!({ "status": "ok", "cleared": cleared }))
}

async fn list_indexes(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut entries: Vec<Value> = state
        .indexes
        .values()
        .map(|ctx| json!({ "handle": ctx.handle, "engine": ctx.config.engine.as_str() }))
        .collect();
    entries.sort_by(|a, b| a["handle"].as_str().cmp(&b["handle"].as_str()));
    Json(json!(entries))
}

async fn search(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    Query(query_params): Query<HashMap<String, String>>,
) -> Result<Response> {
    let ctx = state.index(&handle)?;
    let (q, mut options) = build_options(ctx, &query_params)?;
    apply_alias_inbound(&mut options, &ctx.aliases);

    let cache_key = cache::search_cache_key(&handle, &q, &options);
    if let Some(cached) = state.cache.get_json::<SearchResult>(&cache_key).await {
        return Ok(with_cache_control(Json(cached), SEARCH_CACHE_CONTROL));
    }

    let mut result = ctx.engine.search(&q, &options).await?;
    apply_alias_outbound(&mut result, &ctx.aliases);

    if state.cache.enabled() {
        let state = state.clone();
        let stored = result.clone();
        tokio::spawn(async move {
            state.cache.set_json(&cache_key, &stored, SEARCH_TTL_SECS).await;
        });
    }
    Ok(with_cache_control(Json(result), SEARCH_CACHE_CONTROL))
}

async fn autocomplete(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    Query(query_params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let ctx = state.index(&handle)?;
    let q = query_params.get("q").cloned().unwrap_or_default();
    let facet_fields: Vec<String> = query_params
        .get("facets")
        .map(|raw| params::parse_comma_list(raw))
        .or_else(|| ctx.config.defaults.facets.clone())
        .unwrap_or_default();
    let facet_fields = ctx.aliases.array_to_backend(facet_fields);

    let mut options = SearchOptions {
        per_page: AUTOCOMPLETE_PER_PAGE,
        highlight: Highlight::Enabled(false),
        boosts: ctx.boosts.clone(),
        searchable_fields: ctx.searchable_fields.clone(),
        ..SearchOptions::default()
    };
    apply_alias_inbound(&mut options, &ctx.aliases);

    // The hits query and every facet prefix lookup run concurrently; the
    // join fails (and drops the siblings) as soon as one of them fails.
    let hits_fut = ctx.engine.search(&q, &options);
    let facets_fut = try_join_all(facet_fields.iter().map(|field| {
        ctx.engine.search_facet_values(field, &q, None, AUTOCOMPLETE_FACET_VALUES)
    }));
    let (mut result, facet_lists) = tokio::try_join!(hits_fut, facets_fut)?;
    apply_alias_outbound(&mut result, &ctx.aliases);

    let mut facets = Map::new();
    for (field, values) in facet_fields.iter().zip(facet_lists) {
        if !values.is_empty() {
            facets.insert(ctx.aliases.from_backend(field).to_string(), json!(values));
        }
    }
    Ok(Json(json!({ "hits": result.hits, "facets": facets })))
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((handle, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let ctx = state.index(&handle)?;
    match ctx.engine.get_document(&id).await? {
        Some(doc) => Ok(Json(doc)),
        None => Err(GatewayError::DocumentNotFound),
    }
}

async fn mapping(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Response> {
    let ctx = state.index(&handle)?;
    let cache_key = cache::mapping_cache_key(&handle);
    if let Some(cached) = state.cache.get_json::<Value>(&cache_key).await {
        return Ok(with_cache_control(Json(cached), MAPPING_CACHE_CONTROL));
    }
    let mapping = ctx.engine.get_mapping().await?;
    if state.cache.enabled() {
        let state = state.clone();
        let stored = mapping.clone();
        tokio::spawn(async move {
            state.cache.set_json(&cache_key, &stored, MAPPING_TTL_SECS).await;
        });
    }
    Ok(with_cache_control(Json(mapping), MAPPING_CACHE_CONTROL))
}

async fn raw_query(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let ctx = state.index(&handle)?;
    Ok(Json(ctx.engine.raw_query(body).await?))
}

async fn facet_values(
    State(state): State<Arc<AppState>>,
    Path((handle, field)): Path<(String, String)>,
    Query(query_params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let ctx = state.index(&handle)?;
    let prefix = query_params.get("q").cloned().unwrap_or_default();
    let max_values = match query_params.get("maxValues") {
        Some(raw) => params::parse_int("maxValues", raw)?.max(1) as usize,
        None => 10,
    };
    let filters = match query_params.get("filters") {
        Some(raw) => Some(ctx.aliases.keys_to_backend(params::parse_facet_filters(raw)?)),
        None => None,
    };
    let backend_field = ctx.aliases.to_backend(&field);
    let values = ctx
        .engine
        .search_facet_values(backend_field, &prefix, filters.as_ref(), max_values)
        .await?;
    Ok(Json(json!(values)))
}

async fn instantsearch_multi(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    Json(body): Json<MultiQueryBody>,
) -> Result<Json<Value>> {
    let ctx = state.index(&handle)?;
    // Sibling requests have no ordering dependency: fan out, join once.
    let results = try_join_all(body.requests.iter().map(|request| async move {
        let translated =
            instantsearch::translate_request(request, ctx.config.defaults.facets.as_deref());
        let mut options = translated.options;
        options.boosts = ctx.boosts.clone();
        options.searchable_fields = ctx.searchable_fields.clone();
        apply_alias_inbound(&mut options, &ctx.aliases);
        let started = Instant::now();
        let mut result = ctx.engine.search(&translated.query, &options).await?;
        apply_alias_outbound(&mut result, &ctx.aliases);
        Ok::<Value, GatewayError>(instantsearch::render_result(
            &result,
            &translated.query,
            &ctx.handle,
            &translated.pre_tag,
            &translated.post_tag,
            started.elapsed().as_millis() as u64,
        ))
    }))
    .await?;
    Ok(Json(json!({ "results": results })))
}
