//! Coverage heatmap point cloud.
//!
//! The renderer draws density itself; this module only collects the point
//! set from the selected routes, weights it, and computes the extent.

use serde::{Deserialize, Serialize};

use crate::{geo_utils, Bounds, Coordinate, RecordedRoute, RecorderError, Result};

/// Persisted heatmap layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeatmapSettings {
    pub enabled: bool,
    /// Only aggregate routes in the visibility set. Default: true
    pub visible_only: bool,
    /// Kernel radius in screen pixels, passed through. Default: 20.0
    pub radius: f64,
    /// Weight given to every point. Default: 1.0
    pub intensity: f64,
}

impl Default for HeatmapSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            visible_only: true,
            radius: 20.0,
            intensity: 1.0,
        }
    }
}

impl HeatmapSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(RecorderError::config(format!(
                "heatmap radius must be positive, got {}",
                self.radius
            )));
        }
        if !self.intensity.is_finite() || self.intensity <= 0.0 {
            return Err(RecorderError::config(format!(
                "heatmap intensity must be positive, got {}",
                self.intensity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapPoint {
    pub coordinates: Coordinate,
    pub weight: f64,
}

/// Heatmap layer contents handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapData {
    pub points: Vec<HeatmapPoint>,
    /// `None` when there are no points
    pub bounds: Option<Bounds>,
    pub radius: f64,
    /// Number of routes that contributed points
    pub route_count: usize,
}

impl HeatmapData {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Union of all points of `routes`, in route then recording order.
///
/// Points are not deduplicated: overlapping passes are what make an area hot.
pub fn build_heatmap<'a, I>(routes: I, settings: &HeatmapSettings) -> HeatmapData
where
    I: IntoIterator<Item = &'a RecordedRoute>,
{
    let weight = if settings.intensity.is_finite() && settings.intensity > 0.0 {
        settings.intensity
    } else {
        1.0
    };

    let mut points = Vec::new();
    let mut route_count = 0;
    for route in routes {
        route_count += 1;
        points.extend(route.points().iter().map(|p| HeatmapPoint {
            coordinates: p.coordinates,
            weight,
        }));
    }

    let bounds = geo_utils::compute_bounds(points.iter().map(|p| &p.coordinates));

    HeatmapData {
        points,
        bounds,
        radius: settings.radius,
        route_count,
    }
}
