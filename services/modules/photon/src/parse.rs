//! Photon GeoJSON response parsing

use crate::error::{PhotonError, Result};
use serde::Deserialize;
use types::{Address, AddressResponse, Position, Region};

/// Property keys that carry region names, with their admin level
const REGION_LEVELS: [(&str, u32); 4] = [("country", 2), ("state", 4), ("county", 6), ("city", 8)];

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    coordinates: Vec<f64>,
}

/// Map a Photon layer type onto a guess kind
pub fn guess_kind(photon_type: &str) -> &'static str {
    match photon_type {
        "city" => "place",
        "street" => "street",
        _ => "unknown",
    }
}

pub fn parse_response(body: &[u8]) -> Result<AddressResponse> {
    let collection: FeatureCollection = serde_json::from_slice(body).map_err(|e| PhotonError::BadJson {
        message: format!("{} at line {} column {}", e, e.line(), e.column()),
    })?;

    let guesses = collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| to_address(index, feature))
        .collect::<Result<Vec<_>>>()?;

    Ok(AddressResponse { guesses })
}

fn to_address(index: usize, feature: Feature) -> Result<Address> {
    let invalid = |reason: &str| PhotonError::InvalidFeature {
        index,
        reason: reason.to_string(),
    };

    // GeoJSON order is [lng, lat]
    let (lng, lat) = match feature.geometry.coordinates.as_slice() {
        [lng, lat, ..] => (*lng, *lat),
        _ => return Err(invalid("coordinates need longitude and latitude")),
    };

    let props = &feature.properties;
    let name = props
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("missing name"))?
        .to_string();
    let kind = props.get("type").and_then(|v| v.as_str()).map(guess_kind).unwrap_or("unknown");

    let regions = REGION_LEVELS
        .iter()
        .filter_map(|(key, admin_level)| {
            props.get(*key).and_then(|v| v.as_str()).map(|name| Region {
                name: name.to_string(),
                admin_level: *admin_level,
            })
        })
        .collect();

    Ok(Address {
        pos: Position::new(lat, lng),
        name,
        kind: kind.to_string(),
        regions,
    })
}
