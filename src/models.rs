//! Normalized request and response shapes. Every engine adapter translates
//! between these types and its backend's native dialect; nothing
//! backend-specific leaks past this module.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One entry of the `filters` map. The accepted JSON shapes are closed:
/// string, list of strings, boolean, or a `{min, max}` range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Term(String),
    Terms(Vec<String>),
    Flag(bool),
    Range {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
}

/// Highlighting request: a boolean toggle or an explicit field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Highlight {
    Enabled(bool),
    Fields(Vec<String>),
}

impl Default for Highlight {
    fn default() -> Self {
        Highlight::Enabled(false)
    }
}

impl Highlight {
    pub fn is_off(&self) -> bool {
        matches!(self, Highlight::Enabled(false))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub top_left: GeoPoint,
    pub bottom_right: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoGrid {
    pub field: String,
    pub precision: u8,
    pub bounds: GeoBounds,
}

/// The normalized search request, after parameter parsing, defaulting and
/// inbound alias translation. Map fields preserve the caller's insertion
/// order; the elastic engine relies on it for boost composition.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOptions {
    pub page: u32,
    #[serde(rename = "perPage")]
    pub per_page: u32,
    pub sort: IndexMap<String, SortOrder>,
    pub facets: Vec<String>,
    pub filters: IndexMap<String, FilterValue>,
    pub highlight: Highlight,
    #[serde(rename = "attributesToRetrieve", skip_serializing_if = "Option::is_none")]
    pub attributes_to_retrieve: Option<Vec<String>>,
    pub suggest: bool,
    pub boosts: IndexMap<String, f64>,
    #[serde(rename = "searchableFields", skip_serializing_if = "Option::is_none")]
    pub searchable_fields: Option<Vec<String>>,
    pub histogram: IndexMap<String, u64>,
    #[serde(rename = "geoGrid", skip_serializing_if = "Option::is_none")]
    pub geo_grid: Option<GeoGrid>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
            sort: IndexMap::new(),
            facets: Vec::new(),
            filters: IndexMap::new(),
            highlight: Highlight::default(),
            attributes_to_retrieve: None,
            suggest: false,
            boosts: IndexMap::new(),
            searchable_fields: None,
            histogram: IndexMap::new(),
            geo_grid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub key: f64,
    pub count: u64,
}

/// One normalized hit. The backend's source fields are flattened into the
/// object; the gateway metadata keys are written after the source so a
/// source field named `objectID` or `_index` can never shadow them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_score")]
    pub score: Option<f64>,
    #[serde(rename = "_highlights")]
    pub highlights: IndexMap<String, Vec<String>>,
    #[serde(flatten)]
    pub source: Map<String, Value>,
}

impl SearchHit {
    pub fn new(
        mut source: Map<String, Value>,
        object_id: String,
        index: String,
        score: Option<f64>,
        highlights: IndexMap<String, Vec<String>>,
    ) -> Self {
        // Metadata wins over same-named source fields.
        source.remove("objectID");
        source.remove("_index");
        source.remove("_score");
        source.remove("_highlights");
        Self { object_id, index, score, highlights, source }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoCluster {
    pub lat: f64,
    pub lng: f64,
    pub count: u64,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit: Option<SearchHit>,
}

/// The normalized search response shared by every engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    #[serde(rename = "totalHits")]
    pub total_hits: u64,
    pub page: u32,
    #[serde(rename = "perPage")]
    pub per_page: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    pub facets: IndexMap<String, Vec<FacetValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histograms: Option<IndexMap<String, Vec<HistogramBucket>>>,
    #[serde(rename = "geoClusters", skip_serializing_if = "Option::is_none")]
    pub geo_clusters: Option<Vec<GeoCluster>>,
    pub suggestions: Vec<String>,
}

/// `ceil(total / per_page)`, saturating on a zero divisor.
pub fn total_pages(total_hits: u64, per_page: u32) -> u32 {
    if per_page == 0 {
        return 0;
    }
    total_hits.div_ceil(per_page as u64) as u32
}
