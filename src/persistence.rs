//! # Persisted State
//!
//! The repository's durable state is a single versioned JSON document:
//! saved routes, the visibility set (as a sorted id list) and the grid,
//! heatmap and recording settings.
//!
//! ## Schema versions
//!
//! 1. `routes` + `visibleRouteIds` only (documents may lack `version`)
//! 2. adds `grid`, `heatmap` and `recording`
//!
//! Older documents are upgraded on load by [`migrate_document`]; documents
//! written by a newer version are rejected rather than silently truncated.
//!
//! [`SqliteRouteStore`] keeps the document in one row of an SQLite table.

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[cfg(feature = "persistence")]
use rusqlite::{params, Connection, OptionalExtension};

use crate::{GridConfig, HeatmapSettings, RecordedRoute, RecorderError, RecordingConfig, Result};

#[cfg(feature = "persistence")]
use crate::repository::RouteStore;

/// Version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

// ============================================================================
// Document
// ============================================================================

/// Everything the repository persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub version: u32,
    pub routes: Vec<RecordedRoute>,
    /// Sorted and free of duplicates
    pub visible_route_ids: Vec<Uuid>,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub heatmap: HeatmapSettings,
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            routes: Vec::new(),
            visible_route_ids: Vec::new(),
            grid: GridConfig::default(),
            heatmap: HeatmapSettings::default(),
            recording: RecordingConfig::default(),
        }
    }
}

impl PersistedState {
    /// Parse a stored document, migrating it to the current schema.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        migrate_document(value)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn normalize(&mut self) {
        self.visible_route_ids.sort();
        self.visible_route_ids.dedup();
    }
}

// ============================================================================
// Migrations
// ============================================================================

/// Upgrade a raw document of any supported version to [`PersistedState`].
pub fn migrate_document(mut value: Value) -> Result<PersistedState> {
    let object = value
        .as_object_mut()
        .ok_or_else(|| RecorderError::persistence("state document is not a JSON object"))?;

    let version = match object.get("version") {
        None | Some(Value::Null) => 1,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| RecorderError::persistence(format!("invalid schema version {}", v)))?,
    };

    if version == 0 || version > CURRENT_SCHEMA_VERSION as u64 {
        return Err(RecorderError::persistence(format!(
            "unsupported schema version {} (this build reads up to {})",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    if version < 2 {
        migrate_v1_to_v2(object)?;
    }

    let mut state: PersistedState = serde_json::from_value(value)?;
    state.normalize();
    Ok(state)
}

/// v2 adds the overlay and recording settings; v1 users get the defaults.
fn migrate_v1_to_v2(object: &mut serde_json::Map<String, Value>) -> Result<()> {
    info!("[Persistence] Running migration: v1 -> v2");

    object
        .entry("visibleRouteIds")
        .or_insert_with(|| Value::Array(Vec::new()));
    object
        .entry("grid")
        .or_insert(serde_json::to_value(GridConfig::default())?);
    object
        .entry("heatmap")
        .or_insert(serde_json::to_value(HeatmapSettings::default())?);
    object
        .entry("recording")
        .or_insert(serde_json::to_value(RecordingConfig::default())?);
    object.insert("version".to_string(), Value::from(2));

    Ok(())
}

// ============================================================================
// SQLite store
// ============================================================================

/// [`RouteStore`] backed by an SQLite database file.
#[cfg(feature = "persistence")]
pub struct SqliteRouteStore {
    db: Connection,
    db_path: String,
}

#[cfg(feature = "persistence")]
impl SqliteRouteStore {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[Persistence] Opened state database at {}", db_path);

        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            -- Single-row document store
            CREATE TABLE IF NOT EXISTS app_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                document TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
        "#,
        )
    }

    /// Schema version of the stored document, if any.
    pub fn stored_version(&self) -> Result<Option<u32>> {
        let version = self
            .db
            .query_row("SELECT version FROM app_state WHERE id = 1", [], |row| {
                row.get::<_, u32>(0)
            })
            .optional()?;
        Ok(version)
    }
}

#[cfg(feature = "persistence")]
impl RouteStore for SqliteRouteStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        let document: Option<String> = self
            .db
            .query_row("SELECT document FROM app_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        document
            .map(|json| PersistedState::from_json(&json))
            .transpose()
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        let json = state.to_json()?;
        self.db.execute(
            "INSERT OR REPLACE INTO app_state (id, version, document, updated_at)
             VALUES (1, ?, ?, strftime('%s', 'now'))",
            params![state.version, json],
        )?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Coordinate, RoutePoint};
    use chrono::Utc;
    use serde_json::json;

    fn sample_route() -> RecordedRoute {
        let points = vec![
            RoutePoint::new(Coordinate::new(5.0, 52.0), 0, Some(4.0)),
            RoutePoint::new(Coordinate::new(5.001, 52.0), 30_000, None),
        ];
        RecordedRoute::from_parts("Morning".to_string(), points, 0, 30_000, 0, Utc::now()).unwrap()
    }

    #[test]
    fn test_v1_document_migrates() {
        let route = sample_route();
        let doc = json!({
            "routes": [serde_json::to_value(&route).unwrap()],
            "visibleRouteIds": [route.id(), route.id()],
        });

        let state = migrate_document(doc).unwrap();
        assert_eq!(state.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(state.routes, vec![route.clone()]);
        assert_eq!(state.visible_route_ids, vec![route.id()]);
        assert_eq!(state.grid, GridConfig::default());
        assert_eq!(state.heatmap, HeatmapSettings::default());
        assert_eq!(state.recording, RecordingConfig::default());
    }

    #[test]
    fn test_v1_without_visibility() {
        let state = migrate_document(json!({ "version": 1, "routes": [] })).unwrap();
        assert!(state.visible_route_ids.is_empty());
        assert_eq!(state.version, 2);
    }

    #[test]
    fn test_future_version_rejected() {
        let err = migrate_document(json!({ "version": 3, "routes": [], "visibleRouteIds": [] }))
            .unwrap_err();
        assert!(matches!(err, RecorderError::Persistence { .. }));

        assert!(migrate_document(json!({ "version": 0, "routes": [] })).is_err());
        assert!(migrate_document(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_json_roundtrip_sorts_visibility() {
        let a = sample_route();
        let b = sample_route();
        let mut state = PersistedState {
            routes: vec![a.clone(), b.clone()],
            visible_route_ids: vec![a.id().max(b.id()), a.id().min(b.id())],
            ..PersistedState::default()
        };
        state.grid.enabled = true;

        let loaded = PersistedState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(loaded.routes.len(), 2);
        assert!(loaded.grid.enabled);
        assert!(loaded.visible_route_ids[0] < loaded.visible_route_ids[1]);
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let err = PersistedState::from_json("{not json").unwrap_err();
        assert!(matches!(err, RecorderError::Serialization { .. }));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_roundtrip() {
        let mut store = SqliteRouteStore::in_memory().unwrap();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.stored_version().unwrap(), None);

        let route = sample_route();
        let state = PersistedState {
            routes: vec![route.clone()],
            visible_route_ids: vec![route.id()],
            ..PersistedState::default()
        };
        store.save(&state).unwrap();
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), Some(state));
        assert_eq!(store.stored_version().unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_migrates_v1_row() {
        let store = SqliteRouteStore::in_memory().unwrap();
        store
            .db
            .execute(
                "INSERT INTO app_state (id, version, document) VALUES (1, 1, ?)",
                params![r#"{"routes":[],"visibleRouteIds":[]}"#],
            )
            .unwrap();

        let state = store.load().unwrap().unwrap();
        assert_eq!(state.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(state.grid.cell_count, 10);
    }
}
