//! Schedule data model
//!
//! The in-memory timetable. Constructed once by the loader and never
//! mutated afterwards; consumers hold it behind an `Arc`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::Position;

/// A stop served by at least one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub pos: Position,
}

/// An ordered sequence of stations
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: String,
    pub name: String,
    /// Indices into [`Schedule::stations`]
    pub stops: Vec<usize>,
}

/// Immutable timetable with lookup indices
#[derive(Debug)]
pub struct Schedule {
    name: String,
    stations: Vec<Station>,
    routes: Vec<Route>,
    station_index: HashMap<String, usize>,
}

impl Schedule {
    /// Build the indices over already validated records
    pub fn new(name: impl Into<String>, stations: Vec<Station>, routes: Vec<Route>) -> Self {
        let mut station_index = HashMap::with_capacity(stations.len());
        for (idx, station) in stations.iter().enumerate() {
            station_index.entry(station.id.clone()).or_insert(idx);
        }

        Self {
            name: name.into(),
            stations,
            routes,
            station_index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.station_index.get(id).map(|&idx| &self.stations[idx])
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// Routes stopping at the given station
    pub fn routes_serving<'a>(&'a self, station_id: &str) -> impl Iterator<Item = &'a Route> + 'a {
        let idx = self.station_index.get(station_id).copied();
        self.routes
            .iter()
            .filter(move |route| idx.is_some_and(|idx| route.stops.contains(&idx)))
    }
}

/// Station record as stored in a dataset file
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawStation {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

/// Route record as stored in a dataset file
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawRoute {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Station ids
    pub stops: Vec<String>,
}

/// Top-level dataset document
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawSchedule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stations: Vec<RawStation>,
    #[serde(default)]
    pub routes: Vec<RawRoute>,
}
