//! Dataset loader
//!
//! Maps the dataset file, parses it in one pass and validates every record
//! before a [`Schedule`] is built. Either the whole dataset loads or an
//! error is returned; there is no partially populated result.
//!
//! Strict mode turns every malformed record into an error. Lenient mode
//! drops it with a warning and keeps going.

use crate::error::{Result, ScheduleError};
use crate::model::{RawSchedule, Route, Schedule, Station};
use memmap2::MmapOptions;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use transit_config::{DatasetFormat, LoaderOptions};
use types::Position;

/// Load and validate a schedule
pub fn load(options: &LoaderOptions) -> Result<Schedule> {
    let start = Instant::now();
    let path = options.path.as_path();

    let file = File::open(path).map_err(|e| ScheduleError::io(path, e))?;
    let file_size = file
        .metadata()
        .map_err(|e| ScheduleError::io(path, e))?
        .len();

    if let Some(max) = options.max_file_size {
        if file_size > max {
            return Err(ScheduleError::LimitExceeded {
                limit: "max_file_size",
                limit_value: max,
                actual: file_size,
            });
        }
    }
    if file_size == 0 {
        return Err(ScheduleError::Empty {
            path: path.to_path_buf(),
        });
    }

    // The file must not be modified while mapped; datasets are written once
    // before the controller starts.
    let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| ScheduleError::io(path, e))?;

    let raw = parse(path, options.format, &mmap)?;
    debug!(
        stations = raw.stations.len(),
        routes = raw.routes.len(),
        "Parsed dataset records"
    );

    let schedule = build(raw, options.strict, path)?;

    if let Some(max) = options.max_stations {
        if schedule.station_count() > max {
            return Err(ScheduleError::LimitExceeded {
                limit: "max_stations",
                limit_value: max as u64,
                actual: schedule.station_count() as u64,
            });
        }
    }

    info!(
        name = schedule.name(),
        stations = schedule.station_count(),
        routes = schedule.routes().len(),
        bytes = file_size,
        load_ms = start.elapsed().as_millis() as u64,
        "Schedule loaded"
    );
    Ok(schedule)
}

fn parse(path: &Path, format: DatasetFormat, bytes: &[u8]) -> Result<RawSchedule> {
    match format {
        DatasetFormat::Json => {
            serde_json::from_slice(bytes).map_err(|e| ScheduleError::parse(path, e.to_string()))
        }
        DatasetFormat::Toml => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| ScheduleError::parse(path, format!("invalid UTF-8: {}", e)))?;
            toml::from_str(text).map_err(|e| ScheduleError::parse(path, e.to_string()))
        }
    }
}

fn build(raw: RawSchedule, strict: bool, path: &Path) -> Result<Schedule> {
    let mut stations = Vec::with_capacity(raw.stations.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(raw.stations.len());

    for record in raw.stations {
        let pos = Position::new(record.lat, record.lng);
        let problem = if record.id.is_empty() {
            Some("empty id".to_string())
        } else if !pos.is_valid() {
            Some(format!("invalid coordinates ({}, {})", record.lat, record.lng))
        } else if index.contains_key(&record.id) {
            Some("duplicate id".to_string())
        } else {
            None
        };

        if let Some(reason) = problem {
            if strict {
                return Err(ScheduleError::invalid_record("station", record.id, reason));
            }
            warn!(station = %record.id, %reason, "Skipping station record");
            continue;
        }

        index.insert(record.id.clone(), stations.len());
        stations.push(Station {
            id: record.id,
            name: record.name,
            pos,
        });
    }

    let mut routes = Vec::with_capacity(raw.routes.len());
    for record in raw.routes {
        let stops: Option<Vec<usize>> = record.stops.iter().map(|id| index.get(id).copied()).collect();
        match stops {
            Some(stops) => routes.push(Route {
                id: record.id,
                name: record.name,
                stops,
            }),
            None => {
                let unknown = record
                    .stops
                    .iter()
                    .find(|id| !index.contains_key(*id))
                    .cloned()
                    .unwrap_or_default();
                let reason = format!("unknown station {:?}", unknown);
                if strict {
                    return Err(ScheduleError::invalid_record("route", record.id, reason));
                }
                warn!(route = %record.id, %reason, "Skipping route record");
            }
        }
    }

    let name = if raw.name.is_empty() {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        raw.name
    };

    Ok(Schedule::new(name, stations, routes))
}
