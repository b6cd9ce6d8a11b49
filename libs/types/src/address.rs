//! Address lookup payloads
//!
//! Request/response bodies for the `/address` operation. Served either by a
//! schedule-backed station geocoder or by an external typeahead service;
//! both answer with the same [`AddressResponse`].

use serde::{Deserialize, Serialize};

/// WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Free-text address query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRequest {
    pub input: String,
}

impl AddressRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Administrative region an address belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    /// OSM-style admin level (2 = country, 4 = state, 6 = county, 8 = city)
    pub admin_level: u32,
}

/// A single address guess
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub pos: Position,
    pub name: String,
    /// Guess category, e.g. `station`, `place`, `street` or `unknown`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub regions: Vec<Region>,
}

/// Ranked address guesses, best first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressResponse {
    pub guesses: Vec<Address>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_validity() {
        assert!(Position::new(49.87, 8.63).is_valid());
        assert!(!Position::new(91.0, 8.63).is_valid());
        assert!(!Position::new(49.87, -181.0).is_valid());
        assert!(!Position::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_address_kind_serializes_as_type() {
        let address = Address {
            pos: Position::new(1.0, 2.0),
            name: "Hauptbahnhof".to_string(),
            kind: "station".to_string(),
            regions: vec![],
        };
        let json = serde_json::to_value(&address).unwrap();
        assert_eq!(json["type"], "station");
        assert!(json.get("kind").is_none());
    }
}
