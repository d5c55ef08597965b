//! Query-parameter parsing. The JSON-encoded parameters (`sort`, `filters`,
//! `boosts`, `histogram`, `geoGrid`) are parsed and then checked against
//! closed schemas; the first violation is reported as `<param>: <message>`.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::models::{FilterValue, GeoBounds, GeoGrid, GeoPoint, SortOrder};

fn bad(param: &str, message: impl Into<String>) -> GatewayError {
    GatewayError::InvalidParameter(param.to_string(), message.into())
}

fn parse_json(param: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|_| bad(param, "invalid JSON"))
}

pub fn parse_sort(raw: &str) -> Result<IndexMap<String, SortOrder>> {
    let value = parse_json("sort", raw)?;
    let obj = value.as_object().ok_or_else(|| bad("sort", "must be an object"))?;
    let mut out = IndexMap::new();
    for (field, dir) in obj {
        let order = match dir.as_str() {
            Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            _ => return Err(bad("sort", format!("\"{field}\" must be \"asc\" or \"desc\""))),
        };
        out.insert(field.clone(), order);
    }
    Ok(out)
}

fn filter_value(param: &str, field: &str, value: &Value) -> Result<FilterValue> {
    match value {
        Value::String(s) => Ok(FilterValue::Term(s.clone())),
        Value::Bool(b) => Ok(FilterValue::Flag(*b)),
        Value::Array(items) => {
            let mut terms = Vec::with_capacity(items.len());
            for item in items {
                let s = item
                    .as_str()
                    .ok_or_else(|| bad(param, format!("\"{field}\" list entries must be strings")))?;
                terms.push(s.to_string());
            }
            Ok(FilterValue::Terms(terms))
        }
        Value::Object(obj) => {
            for key in obj.keys() {
                if key != "min" && key != "max" {
                    return Err(bad(param, format!("\"{field}\" range accepts only min and max")));
                }
            }
            let bound = |key: &str| -> Result<Option<f64>> {
                match obj.get(key) {
                    None => Ok(None),
                    Some(v) => v
                        .as_f64()
                        .map(Some)
                        .ok_or_else(|| bad(param, format!("\"{field}\" {key} must be a number"))),
                }
            };
            Ok(FilterValue::Range { min: bound("min")?, max: bound("max")? })
        }
        _ => Err(bad(
            param,
            format!("\"{field}\" must be a string, list of strings, boolean, or range object"),
        )),
    }
}

pub fn parse_filters(raw: &str) -> Result<IndexMap<String, FilterValue>> {
    let value = parse_json("filters", raw)?;
    let obj = value.as_object().ok_or_else(|| bad("filters", "must be an object"))?;
    let mut out = IndexMap::new();
    for (field, v) in obj {
        out.insert(field.clone(), filter_value("filters", field, v)?);
    }
    Ok(out)
}

/// Facet-narrowing filters accept only the string and list shapes.
pub fn parse_facet_filters(raw: &str) -> Result<IndexMap<String, FilterValue>> {
    let value = parse_json("filters", raw)?;
    let obj = value.as_object().ok_or_else(|| bad("filters", "must be an object"))?;
    let mut out = IndexMap::new();
    for (field, v) in obj {
        let parsed = filter_value("filters", field, v)?;
        match parsed {
            FilterValue::Term(_) | FilterValue::Terms(_) => {
                out.insert(field.clone(), parsed);
            }
            _ => {
                return Err(bad(
                    "filters",
                    format!("\"{field}\" must be a string or list of strings"),
                ))
            }
        }
    }
    Ok(out)
}

pub fn parse_boosts(raw: &str) -> Result<IndexMap<String, f64>> {
    let value = parse_json("boosts", raw)?;
    let obj = value.as_object().ok_or_else(|| bad("boosts", "must be an object"))?;
    let mut out = IndexMap::new();
    for (field, v) in obj {
        let weight = v
            .as_f64()
            .filter(|w| *w >= 0.0)
            .ok_or_else(|| bad("boosts", format!("\"{field}\" must be a non-negative number")))?;
        out.insert(field.clone(), weight);
    }
    Ok(out)
}

pub fn parse_histogram(raw: &str) -> Result<IndexMap<String, u64>> {
    let value = parse_json("histogram", raw)?;
    let obj = value.as_object().ok_or_else(|| bad("histogram", "must be an object"))?;
    let mut out = IndexMap::new();
    for (field, v) in obj {
        let interval = v
            .as_u64()
            .filter(|i| *i >= 1)
            .ok_or_else(|| bad("histogram", format!("\"{field}\" must be an integer >= 1")))?;
        out.insert(field.clone(), interval);
    }
    Ok(out)
}

fn geo_point(param: &str, name: &str, value: Option<&Value>) -> Result<GeoPoint> {
    let obj = value
        .and_then(Value::as_object)
        .ok_or_else(|| bad(param, format!("bounds.{name} must be a {{lat, lon}} object")))?;
    let coord = |key: &str| -> Result<f64> {
        obj.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| bad(param, format!("bounds.{name}.{key} must be a number")))
    };
    Ok(GeoPoint { lat: coord("lat")?, lon: coord("lon")? })
}

pub fn parse_geo_grid(raw: &str) -> Result<GeoGrid> {
    let param = "geoGrid";
    let value = parse_json(param, raw)?;
    let obj = value.as_object().ok_or_else(|| bad(param, "must be an object"))?;
    let field = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| bad(param, "field must be a string"))?
        .to_string();
    let precision = obj
        .get("precision")
        .and_then(Value::as_u64)
        .filter(|p| (1..=29).contains(p))
        .ok_or_else(|| bad(param, "precision must be an integer between 1 and 29"))?;
    let bounds = obj
        .get("bounds")
        .and_then(Value::as_object)
        .ok_or_else(|| bad(param, "bounds must be an object"))?;
    Ok(GeoGrid {
        field,
        precision: precision as u8,
        bounds: GeoBounds {
            top_left: geo_point(param, "top_left", bounds.get("top_left"))?,
            bottom_right: geo_point(param, "bottom_right", bounds.get("bottom_right"))?,
        },
    })
}

pub fn parse_bool(param: &str, raw: &str) -> Result<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(bad(param, "must be \"true\" or \"false\"")),
    }
}

pub fn parse_int(param: &str, raw: &str) -> Result<i64> {
    raw.parse().map_err(|_| bad(param, "must be an integer"))
}

pub fn parse_comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
