//! # Route Recorder
//!
//! GPS route recording and geospatial analytics for field search teams.
//!
//! This library provides:
//! - A live recording state machine that turns position fixes into route records
//! - Great-circle distance, duration and speed statistics
//! - GPX 1.1 import and export
//! - A repository of saved routes with a visibility set and heatmap point cloud
//! - Lettered/numbered search-grid geometry around a center point
//!
//! Rendering, cloud sync and position acquisition live outside this crate: the
//! core consumes fixes and configuration and produces plain data.
//!
//! ## Features
//!
//! - **`persistence`** (default) - SQLite-backed [`RouteStore`]
//!
//! ## Quick Start
//!
//! ```rust
//! use route_recorder::{ManualClock, RecordingController, StopOutcome};
//!
//! let clock = ManualClock::new(0);
//! let mut recorder = RecordingController::new(clock.clone());
//!
//! recorder.start().unwrap();
//! recorder.ingest_position(5.0000, 52.0, None);
//! clock.advance(5_000);
//! recorder.ingest_position(5.0003, 52.0, Some(4.0));
//!
//! match recorder.stop(Some("Morning sweep")) {
//!     StopOutcome::Saved(route) => assert_eq!(route.point_count(), 2),
//!     StopOutcome::Discarded { .. } => unreachable!(),
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Unified error handling
pub mod error;
pub use error::{ImportError, OptionExt, RecorderError, Result};

// Geographic utilities (distance, speed, degree offsets)
pub mod geo_utils;

// Injectable wall clock for pull-based time accounting
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// Live recording state machine
pub mod recording;
pub use recording::{
    LiveTrack, PauseReason, RecordingConfig, RecordingController, RecordingState, StopOutcome,
};

// Position fix delivery (provider capability + ordered queue)
pub mod location;
pub use location::{
    FixQueue, FixSender, LocationProvider, PositionFix, RecorderEvent, Subscription,
    SyntheticLocationProvider,
};

// Inactivity watchdog driving auto-pause
pub mod auto_pause;
pub use auto_pause::InactivityWatchdog;

// GPX 1.1 import/export
pub mod gpx;
pub use gpx::{export_file_name, parse_gpx, parse_gpx_at, serialize_gpx, ImportOutcome};

// Search grid geometry
pub mod grid;
pub use grid::{
    generate_grid, row_label, GridConfig, GridGeometry, GridLabel, GridLine, LineOrientation,
};

// Heatmap point cloud
pub mod heatmap;
pub use heatmap::{build_heatmap, HeatmapData, HeatmapPoint, HeatmapSettings};

// Persisted document and storage backends
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteRouteStore;
pub use persistence::{migrate_document, PersistedState, CURRENT_SCHEMA_VERSION};

// Saved routes, visibility and derived views
pub mod repository;
pub use repository::{MemoryRouteStore, RouteRepository, RouteStore};

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteRecorder"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 position, serialized as a `[longitude, latitude]` pair.
///
/// # Example
/// ```
/// use route_recorder::Coordinate;
/// let point = Coordinate::new(5.1214, 52.0907); // Utrecht
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Check if the coordinate is finite and within WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self::new(longitude, latitude)
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(c: Coordinate) -> Self {
        [c.longitude, c.latitude]
    }
}

impl From<Coordinate> for geo::Coord<f64> {
    fn from(c: Coordinate) -> Self {
        geo::Coord {
            x: c.longitude,
            y: c.latitude,
        }
    }
}

/// Bounding box of a set of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lng + self.max_lng) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

/// One retained position of a route. Immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePoint {
    pub coordinates: Coordinate,
    /// Unix milliseconds
    pub timestamp_ms: i64,
    /// Horizontal accuracy reported with the fix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
}

impl RoutePoint {
    pub fn new(coordinates: Coordinate, timestamp_ms: i64, accuracy_meters: Option<f64>) -> Self {
        Self {
            coordinates,
            timestamp_ms,
            accuracy_meters,
        }
    }
}

/// A photo attached to a saved route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePhoto {
    pub id: Uuid,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RoutePhoto {
    /// Create a photo record stamped with the current time.
    pub fn new(url: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            caption,
            timestamp: Utc::now(),
        }
    }
}

/// A completed route, produced by stopping a recording or importing a GPX file.
///
/// Geometry, timing and the derived statistics are fixed at construction:
/// `total_duration_ms = end_time_ms - start_time_ms - paused_duration_ms` and
/// `total_distance_meters` is the haversine length of `points`. Only the name,
/// notes and photos change afterwards, through [`RouteRepository`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRoute {
    id: Uuid,
    name: String,
    points: Vec<RoutePoint>,
    start_time_ms: i64,
    end_time_ms: i64,
    total_distance_meters: f64,
    total_duration_ms: i64,
    paused_duration_ms: i64,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    photos: Vec<RoutePhoto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

impl RecordedRoute {
    /// Build a route from its points and timing.
    ///
    /// Returns `None` if fewer than 2 points are given. The duration is clamped
    /// at zero for imported tracks whose timestamps run backwards.
    pub(crate) fn from_parts(
        name: String,
        points: Vec<RoutePoint>,
        start_time_ms: i64,
        end_time_ms: i64,
        paused_duration_ms: i64,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }

        let total_distance_meters = geo_utils::total_distance(&points);
        let total_duration_ms = (end_time_ms - start_time_ms - paused_duration_ms).max(0);

        Some(Self {
            id: Uuid::new_v4(),
            name,
            points,
            start_time_ms,
            end_time_ms,
            total_distance_meters,
            total_duration_ms,
            paused_duration_ms,
            created_at,
            photos: Vec::new(),
            notes: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    pub fn end_time_ms(&self) -> i64 {
        self.end_time_ms
    }

    /// Distance in meters
    pub fn total_distance_meters(&self) -> f64 {
        self.total_distance_meters
    }

    /// Moving time in milliseconds (pauses excluded)
    pub fn total_duration_ms(&self) -> i64 {
        self.total_duration_ms
    }

    pub fn paused_duration_ms(&self) -> i64 {
        self.paused_duration_ms
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn photos(&self) -> &[RoutePhoto] {
        &self.photos
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Average moving speed in km/h.
    pub fn average_speed_kmh(&self) -> f64 {
        geo_utils::average_speed_kmh(self.total_distance_meters, self.total_duration_ms)
    }

    /// Bounding box of the route's points.
    pub fn bounds(&self) -> Option<Bounds> {
        geo_utils::compute_bounds(self.points.iter().map(|p| &p.coordinates))
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }

    pub(crate) fn photos_mut(&mut self) -> &mut Vec<RoutePhoto> {
        &mut self.photos
    }
}

/// Aggregate statistics over all saved routes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTotals {
    pub route_count: usize,
    pub total_distance_meters: f64,
    pub total_duration_ms: i64,
}

// ============================================================================
// Tests
// ============================================================================
