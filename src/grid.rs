//! Search grid generation.
//!
//! Partitions the area around a center point into `cell_count × cell_count`
//! square cells of `cell_size_meters`, labelled by row letter and 1-based
//! column number (`A1` is the north-west cell). Rows past `Z` continue as
//! `AA`, `AB`, … so labels never wrap or collide.
//!
//! [`generate_grid`] trusts its input; [`GridConfig::validate`] is the boundary
//! that rejects degenerate sizes before they reach it.

use geo::{Coord, Line};
use serde::{Deserialize, Serialize};

use crate::{geo_utils, Bounds, Coordinate, RecorderError, Result};

/// Largest accepted `cell_count`.
pub const MAX_CELL_COUNT: i32 = 100;

/// Persisted grid overlay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridConfig {
    pub enabled: bool,
    /// Grid center; the overlay stays hidden until one is chosen
    pub center: Option<Coordinate>,
    /// Edge length of one cell. Default: 100.0 meters
    pub cell_size_meters: f64,
    /// Cells per axis. Default: 10
    pub cell_count: i32,
    /// Stroke color for the renderer. Default: "#ff6b00"
    pub color: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            center: None,
            cell_size_meters: 100.0,
            cell_count: 10,
            color: "#ff6b00".to_string(),
        }
    }
}

impl GridConfig {
    /// Reject configurations the generator cannot handle.
    pub fn validate(&self) -> Result<()> {
        if self.cell_count <= 0 || self.cell_count > MAX_CELL_COUNT {
            return Err(RecorderError::config(format!(
                "cell_count must be between 1 and {}, got {}",
                MAX_CELL_COUNT, self.cell_count
            )));
        }
        if !self.cell_size_meters.is_finite() || self.cell_size_meters <= 0.0 {
            return Err(RecorderError::config(format!(
                "cell_size_meters must be positive, got {}",
                self.cell_size_meters
            )));
        }
        if let Some(center) = &self.center {
            if !center.is_valid() || center.latitude.abs() >= 90.0 {
                return Err(RecorderError::config(format!(
                    "grid center ({}, {}) is not a usable position",
                    center.longitude, center.latitude
                )));
            }
        }
        Ok(())
    }

    /// Geometry for the renderer, `None` while disabled or without a center.
    pub fn geometry(&self) -> Result<Option<GridGeometry>> {
        self.validate()?;
        if !self.enabled {
            return Ok(None);
        }
        Ok(self
            .center
            .map(|center| generate_grid(center, self.cell_size_meters, self.cell_count as u32)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrientation {
    /// Runs north-south (constant longitude)
    Vertical,
    /// Runs east-west (constant latitude)
    Horizontal,
}

/// One grid line as a two-point segment.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLine {
    pub orientation: LineOrientation,
    /// 0 is the westernmost (vertical) or northernmost (horizontal) line
    pub index: u32,
    /// x = longitude, y = latitude
    pub line: Line<f64>,
    /// Passes through the grid center; drawn with a heavier stroke
    pub is_centerline: bool,
}

/// Label placed at a cell centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLabel {
    pub label: String,
    /// 0-based, from the north
    pub row: u32,
    /// 0-based, from the west
    pub column: u32,
    pub position: Coordinate,
}

/// Generated grid lines and cell labels.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    pub center: Coordinate,
    pub cell_count: u32,
    pub lat_offset: f64,
    pub lon_offset: f64,
    pub lines: Vec<GridLine>,
    pub labels: Vec<GridLabel>,
}

impl GridGeometry {
    /// Outer edge of the grid.
    pub fn bounds(&self) -> Bounds {
        let half = self.cell_count as f64 / 2.0;
        Bounds {
            min_lat: self.center.latitude - half * self.lat_offset,
            max_lat: self.center.latitude + half * self.lat_offset,
            min_lng: self.center.longitude - half * self.lon_offset,
            max_lng: self.center.longitude + half * self.lon_offset,
        }
    }

    /// Label of the cell containing `position`, if it lies on the grid.
    pub fn cell_at(&self, position: &Coordinate) -> Option<&GridLabel> {
        let bounds = self.bounds();
        let column = ((position.longitude - bounds.min_lng) / self.lon_offset).floor();
        let row = ((bounds.max_lat - position.latitude) / self.lat_offset).floor();
        let n = self.cell_count as f64;
        if !(0.0..n).contains(&column) || !(0.0..n).contains(&row) {
            return None;
        }
        let index = row as usize * self.cell_count as usize + column as usize;
        self.labels.get(index)
    }
}

/// Row letters: 0 → `A`, 25 → `Z`, 26 → `AA`, 27 → `AB`, …
pub fn row_label(row: u32) -> String {
    let mut n = row as u64 + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Build `N+1` vertical and `N+1` horizontal lines plus `N²` cell labels
/// centered on `center`.
///
/// Assumes `cell_count > 0`, a positive `cell_size_meters` and a center away
/// from the poles. For even `cell_count` one line in each direction passes
/// through the center and is flagged as the centerline; odd counts have none.
pub fn generate_grid(center: Coordinate, cell_size_meters: f64, cell_count: u32) -> GridGeometry {
    let (lat_offset, lon_offset) =
        geo_utils::meters_to_degree_offsets(cell_size_meters, center.latitude);
    let n = cell_count;
    let half = n as f64 / 2.0;

    let north = center.latitude + half * lat_offset;
    let south = center.latitude - half * lat_offset;
    let west = center.longitude - half * lon_offset;
    let east = center.longitude + half * lon_offset;

    let is_centerline = |i: u32| n % 2 == 0 && i == n / 2;

    let mut lines = Vec::with_capacity(2 * (n as usize + 1));
    for i in 0..=n {
        let lon = west + i as f64 * lon_offset;
        lines.push(GridLine {
            orientation: LineOrientation::Vertical,
            index: i,
            line: Line::new(Coord { x: lon, y: north }, Coord { x: lon, y: south }),
            is_centerline: is_centerline(i),
        });
    }
    for i in 0..=n {
        let lat = north - i as f64 * lat_offset;
        lines.push(GridLine {
            orientation: LineOrientation::Horizontal,
            index: i,
            line: Line::new(Coord { x: west, y: lat }, Coord { x: east, y: lat }),
            is_centerline: is_centerline(i),
        });
    }

    let mut labels = Vec::with_capacity((n * n) as usize);
    for row in 0..n {
        let letters = row_label(row);
        let lat = north - (row as f64 + 0.5) * lat_offset;
        for column in 0..n {
            labels.push(GridLabel {
                label: format!("{}{}", letters, column + 1),
                row,
                column,
                position: Coordinate::new(west + (column as f64 + 0.5) * lon_offset, lat),
            });
        }
    }

    GridGeometry {
        center,
        cell_count: n,
        lat_offset,
        lon_offset,
        lines,
        labels,
    }
}
