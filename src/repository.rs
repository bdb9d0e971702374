//! # Route Repository
//!
//! Owns the saved routes, the visibility set and the overlay settings.
//! Every mutation is written through to a [`RouteStore`] before returning. A
//! mutation whose write fails leaves the repository as it was.
//!
//! The visibility set only records which routes are drawn; toggling it never
//! touches the routes themselves. Routes keep insertion order.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::OptionExt;
use crate::gpx::{self, ImportOutcome};
use crate::grid::{GridConfig, GridGeometry};
use crate::heatmap::{self, HeatmapData, HeatmapSettings};
use crate::persistence::{PersistedState, CURRENT_SCHEMA_VERSION};
use crate::{
    Coordinate, RecordedRoute, RecorderError, RecordingConfig, Result, RoutePhoto, RouteTotals,
};

// ============================================================================
// Storage
// ============================================================================

/// Durable home of the repository document.
pub trait RouteStore: Send {
    /// Stored state, or `None` on first run.
    fn load(&self) -> Result<Option<PersistedState>>;

    /// Replace the stored state.
    fn save(&mut self, state: &PersistedState) -> Result<()>;
}

/// In-process store holding the serialized document.
///
/// Clones share the same document, so a test can keep a handle and reopen
/// a repository from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryRouteStore {
    document: Arc<Mutex<Option<String>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Raw JSON as last saved.
    pub fn document(&self) -> Option<String> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RouteStore for MemoryRouteStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        self.document()
            .map(|json| PersistedState::from_json(&json))
            .transpose()
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        let json = state.to_json()?;
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Everything the repository owns besides its store.
#[derive(Debug, Clone, Default)]
struct Contents {
    routes: Vec<RecordedRoute>,
    visible: BTreeSet<Uuid>,
    grid: GridConfig,
    heatmap: HeatmapSettings,
    recording: RecordingConfig,
}

impl Contents {
    fn to_state(&self) -> PersistedState {
        PersistedState {
            version: CURRENT_SCHEMA_VERSION,
            routes: self.routes.clone(),
            visible_route_ids: self.visible.iter().copied().collect(),
            grid: self.grid.clone(),
            heatmap: self.heatmap.clone(),
            recording: self.recording.clone(),
        }
    }

    fn position(&self, id: Uuid) -> Result<usize> {
        self.routes
            .iter()
            .position(|r| r.id() == id)
            .ok_or_route_not_found(id)
    }

    fn route_mut(&mut self, id: Uuid) -> Result<&mut RecordedRoute> {
        let index = self.position(id)?;
        Ok(&mut self.routes[index])
    }
}

pub struct RouteRepository {
    store: Box<dyn RouteStore>,
    contents: Contents,
}

impl RouteRepository {
    /// Load the repository from `store`, starting empty if nothing is stored.
    pub fn open(store: impl RouteStore + 'static) -> Result<Self> {
        let state = store.load()?.unwrap_or_default();

        let route_ids: BTreeSet<Uuid> = state.routes.iter().map(|r| r.id()).collect();
        let visible: BTreeSet<Uuid> = state
            .visible_route_ids
            .iter()
            .copied()
            .filter(|id| route_ids.contains(id))
            .collect();
        if visible.len() != state.visible_route_ids.len() {
            debug!(
                "[RouteRepository] Dropped {} visibility entries for missing routes",
                state.visible_route_ids.len() - visible.len()
            );
        }

        info!(
            "[RouteRepository] Loaded {} routes ({} visible)",
            state.routes.len(),
            visible.len()
        );

        Ok(Self {
            store: Box::new(store),
            contents: Contents {
                routes: state.routes,
                visible,
                grid: state.grid,
                heatmap: state.heatmap,
                recording: state.recording,
            },
        })
    }

    /// Empty repository over a fresh [`MemoryRouteStore`].
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryRouteStore::new()),
            contents: Contents::default(),
        }
    }

    /// Current state as it would be persisted.
    pub fn snapshot(&self) -> PersistedState {
        self.contents.to_state()
    }

    /// Apply `op` to a copy of the contents, write the copy to the store and
    /// only then adopt it. On any error the repository is left unchanged.
    fn commit<T>(&mut self, op: impl FnOnce(&mut Contents) -> Result<T>) -> Result<T> {
        let mut next = self.contents.clone();
        let value = op(&mut next)?;
        if let Err(e) = self.store.save(&next.to_state()) {
            warn!("[RouteRepository] Write-through failed, change discarded: {}", e);
            return Err(e);
        }
        self.contents = next;
        Ok(value)
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Store a finished route and make it visible.
    ///
    /// Saving a route whose id is already present replaces it in place.
    pub fn save(&mut self, route: RecordedRoute) -> Result<Uuid> {
        let id = route.id();
        let summary = format!(
            "'{}' ({} points, {:.0} m)",
            route.name(),
            route.point_count(),
            route.total_distance_meters()
        );
        self.commit(|c| {
            match c.routes.iter_mut().find(|r| r.id() == id) {
                Some(existing) => *existing = route,
                None => c.routes.push(route),
            }
            c.visible.insert(id);
            Ok(())
        })?;
        info!("[RouteRepository] Saved route {} {}", id, summary);
        Ok(id)
    }

    /// Parse a GPX document and save the result.
    ///
    /// Import failures come back in the outcome; only storage failures are errors.
    pub fn import_gpx(&mut self, xml: &str, fallback_name: Option<&str>) -> Result<ImportOutcome> {
        let parsed = gpx::parse_gpx(xml, fallback_name);
        match &parsed {
            Ok(route) => {
                self.save(route.clone())?;
            }
            Err(e) => warn!("[RouteRepository] GPX import rejected: {}", e),
        }
        Ok(ImportOutcome::from(parsed))
    }

    /// Remove a route and its visibility entry.
    pub fn delete(&mut self, id: Uuid) -> Result<RecordedRoute> {
        let route = self.commit(|c| {
            let index = c.position(id)?;
            c.visible.remove(&id);
            Ok(c.routes.remove(index))
        })?;
        info!("[RouteRepository] Deleted route {}", id);
        Ok(route)
    }

    pub fn rename(&mut self, id: Uuid, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RecorderError::config("route name cannot be empty"));
        }
        self.commit(|c| {
            c.route_mut(id)?.set_name(name.to_string());
            Ok(())
        })
    }

    /// Replace the notes; blank text clears them.
    pub fn update_notes(&mut self, id: Uuid, notes: Option<&str>) -> Result<()> {
        let notes = notes
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self.commit(|c| {
            c.route_mut(id)?.set_notes(notes);
            Ok(())
        })
    }

    pub fn add_photo(&mut self, id: Uuid, photo: RoutePhoto) -> Result<Uuid> {
        self.commit(|c| {
            let photo_id = photo.id;
            c.route_mut(id)?.photos_mut().push(photo);
            Ok(photo_id)
        })
    }

    pub fn remove_photo(&mut self, id: Uuid, photo_id: Uuid) -> Result<RoutePhoto> {
        self.commit(|c| {
            let photos = c.route_mut(id)?.photos_mut();
            let index = photos
                .iter()
                .position(|p| p.id == photo_id)
                .ok_or(RecorderError::PhotoNotFound {
                    route_id: id,
                    photo_id,
                })?;
            Ok(photos.remove(index))
        })
    }

    /// Remove every route together with the visibility set. Settings survive.
    pub fn clear_all(&mut self) -> Result<()> {
        let count = self.commit(|c| {
            let count = c.routes.len();
            c.routes.clear();
            c.visible.clear();
            Ok(count)
        })?;
        info!("[RouteRepository] Cleared {} routes", count);
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get(&self, id: Uuid) -> Option<&RecordedRoute> {
        self.contents.routes.iter().find(|r| r.id() == id)
    }

    /// All routes in insertion order.
    pub fn routes(&self) -> &[RecordedRoute] {
        &self.contents.routes
    }

    pub fn route_count(&self) -> usize {
        self.contents.routes.len()
    }

    pub fn totals(&self) -> RouteTotals {
        let routes = &self.contents.routes;
        RouteTotals {
            route_count: routes.len(),
            total_distance_meters: routes.iter().map(|r| r.total_distance_meters()).sum(),
            total_duration_ms: routes.iter().map(|r| r.total_duration_ms()).sum(),
        }
    }

    // ========================================================================
    // Visibility
    // ========================================================================

    pub fn is_visible(&self, id: Uuid) -> bool {
        self.contents.visible.contains(&id)
    }

    /// Visible routes in insertion order.
    pub fn visible_routes(&self) -> Vec<&RecordedRoute> {
        self.selected_routes(true).collect()
    }

    /// Visible ids in sorted order.
    pub fn visible_route_ids(&self) -> Vec<Uuid> {
        self.contents.visible.iter().copied().collect()
    }

    /// Flip visibility, returning the new state.
    pub fn toggle(&mut self, id: Uuid) -> Result<bool> {
        self.commit(|c| {
            c.position(id)?;
            if c.visible.remove(&id) {
                Ok(false)
            } else {
                c.visible.insert(id);
                Ok(true)
            }
        })
    }

    pub fn show(&mut self, id: Uuid) -> Result<()> {
        self.contents.position(id)?;
        if self.is_visible(id) {
            return Ok(());
        }
        self.commit(|c| {
            c.visible.insert(id);
            Ok(())
        })
    }

    /// Hiding an id that is not visible is a no-op.
    pub fn hide(&mut self, id: Uuid) -> Result<()> {
        if !self.is_visible(id) {
            return Ok(());
        }
        self.commit(|c| {
            c.visible.remove(&id);
            Ok(())
        })
    }

    pub fn show_all(&mut self) -> Result<()> {
        self.commit(|c| {
            c.visible = c.routes.iter().map(|r| r.id()).collect();
            Ok(())
        })
    }

    pub fn hide_all(&mut self) -> Result<()> {
        self.commit(|c| {
            c.visible.clear();
            Ok(())
        })
    }

    // ========================================================================
    // Derived views
    // ========================================================================

    /// Union of the points of the visible routes, or of all routes.
    pub fn heatmap_points(&self, visible_only: bool) -> Vec<Coordinate> {
        self.selected_routes(visible_only)
            .flat_map(|r| r.points().iter().map(|p| p.coordinates))
            .collect()
    }

    /// Heatmap layer for `settings`.
    pub fn heatmap(&self, settings: &HeatmapSettings) -> HeatmapData {
        heatmap::build_heatmap(self.selected_routes(settings.visible_only), settings)
    }

    fn selected_routes(&self, visible_only: bool) -> impl Iterator<Item = &RecordedRoute> + '_ {
        let visible = &self.contents.visible;
        self.contents
            .routes
            .iter()
            .filter(move |r| !visible_only || visible.contains(&r.id()))
    }

    /// Grid overlay for the stored configuration.
    pub fn grid_geometry(&self) -> Result<Option<GridGeometry>> {
        self.contents.grid.geometry()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn grid_config(&self) -> &GridConfig {
        &self.contents.grid
    }

    pub fn set_grid_config(&mut self, config: GridConfig) -> Result<()> {
        config.validate()?;
        self.commit(|c| {
            c.grid = config;
            Ok(())
        })
    }

    pub fn heatmap_settings(&self) -> &HeatmapSettings {
        &self.contents.heatmap
    }

    pub fn set_heatmap_settings(&mut self, settings: HeatmapSettings) -> Result<()> {
        settings.validate()?;
        self.commit(|c| {
            c.heatmap = settings;
            Ok(())
        })
    }

    pub fn recording_config(&self) -> &RecordingConfig {
        &self.contents.recording
    }

    pub fn set_recording_config(&mut self, config: RecordingConfig) -> Result<()> {
        config.validate()?;
        self.commit(|c| {
            c.recording = config;
            Ok(())
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
