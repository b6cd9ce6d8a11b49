//! # Schedule Dataset
//!
//! The timetable every schedule-dependent module reads. Loaded once per
//! controller from a dataset file, then shared read-only behind an `Arc`.
//!
//! ## Dataset Format
//!
//! ```json
//! {
//!   "name": "rhein-main",
//!   "stations": [{"id": "da", "name": "Darmstadt Hbf", "lat": 49.872, "lng": 8.630}],
//!   "routes": [{"id": "re60", "name": "RE 60", "stops": ["da"]}]
//! }
//! ```
//!
//! The same document may be written as TOML (`[[stations]]`, `[[routes]]`).

pub mod error;
pub mod loader;
pub mod model;

pub use error::{Result, ScheduleError};
pub use loader::load;
pub use model::{Route, Schedule, Station};
