//! Geotile key math. A geotile grid key is `"z/x/y"`; the centroid of the
//! tile is the point reported for a map cluster.

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Convert a `"z/x/y"` tile key to the tile's centroid. Returns `None` for
/// keys that are not three slash-separated integers.
pub fn tile_to_lat_lng(key: &str) -> Option<LatLng> {
    let mut parts = key.split('/');
    let z: u32 = parts.next()?.parse().ok()?;
    let x: f64 = parts.next()?.parse::<u64>().ok()? as f64;
    let y: f64 = parts.next()?.parse::<u64>().ok()? as f64;
    if parts.next().is_some() {
        return None;
    }
    let n = 2f64.powi(z as i32);
    let lng = (x + 0.5) / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * (y + 0.5) / n)).sinh().atan() * 180.0 / PI;
    Some(LatLng { lat, lng })
}
