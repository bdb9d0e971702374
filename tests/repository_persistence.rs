//! Repository persistence integration tests.
//!
//! Tests the full pipeline: record -> save -> reopen from SQLite on disk.
//!
//! Run with: `cargo test --test repository_persistence`
#![cfg(feature = "persistence")]

use tempfile::TempDir;

use route_recorder::{
    Coordinate, GridConfig, HeatmapSettings, ManualClock, RecordedRoute, RecordingController,
    RoutePhoto, RouteRepository, RouteStore, SqliteRouteStore, CURRENT_SCHEMA_VERSION,
};

/// Helper: open a repository over a database file inside `dir`.
fn open_repo(dir: &TempDir) -> RouteRepository {
    let db_path = dir.path().join("routes.db");
    let store = SqliteRouteStore::new(db_path.to_str().unwrap()).expect("failed to open store");
    RouteRepository::open(store).expect("failed to open repository")
}

/// Helper: record a straight walk of `count` fixes 20 m apart.
fn record(name: &str, start_lon: f64, count: usize) -> RecordedRoute {
    let clock = ManualClock::new(1_772_355_600_000);
    let mut rec = RecordingController::new(clock.clone());
    rec.start().unwrap();
    for i in 0..count {
        rec.ingest_position(start_lon + 0.0003 * i as f64, 52.0, Some(4.0));
        clock.advance(10_000);
    }
    rec.stop(Some(name)).into_route().unwrap()
}

// ============================================================================
// Test: Reopen After Mutations
// ============================================================================

#[test]
fn test_state_survives_reopen() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tmp = TempDir::new().expect("failed to create temp dir");

    let (a, b, photo_id) = {
        let mut repo = open_repo(&tmp);
        let a = repo.save(record("North sector", 5.0, 4)).unwrap();
        let b = repo.save(record("South sector", 5.01, 3)).unwrap();

        repo.rename(a, "North sector (dogs)").unwrap();
        repo.update_notes(b, Some("Dense brush past the creek")).unwrap();
        let photo_id = repo
            .add_photo(a, RoutePhoto::new("file:///photos/1.jpg", None))
            .unwrap();
        repo.hide(b).unwrap();
        repo.set_grid_config(GridConfig {
            enabled: true,
            center: Some(Coordinate::new(5.005, 52.0)),
            cell_size_meters: 50.0,
            cell_count: 8,
            ..GridConfig::default()
        })
        .unwrap();
        (a, b, photo_id)
    };

    let repo = open_repo(&tmp);
    assert_eq!(repo.route_count(), 2);
    assert_eq!(repo.routes()[0].id(), a);

    let north = repo.get(a).unwrap();
    assert_eq!(north.name(), "North sector (dogs)");
    assert_eq!(north.point_count(), 4);
    assert_eq!(north.photos()[0].id, photo_id);
    assert_eq!(north.points()[0].accuracy_meters, Some(4.0));

    let south = repo.get(b).unwrap();
    assert_eq!(south.notes(), Some("Dense brush past the creek"));

    assert!(repo.is_visible(a));
    assert!(!repo.is_visible(b));
    assert_eq!(repo.heatmap_points(true).len(), 4);
    assert_eq!(repo.heatmap_points(false).len(), 7);

    let grid = repo.grid_geometry().unwrap().expect("grid enabled");
    assert_eq!(grid.labels.len(), 64);
    assert_eq!(repo.heatmap_settings(), &HeatmapSettings::default());
}

#[test]
fn test_delete_and_clear_persist() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let a = {
        let mut repo = open_repo(&tmp);
        let a = repo.save(record("One", 5.0, 3)).unwrap();
        let b = repo.save(record("Two", 5.1, 3)).unwrap();
        repo.delete(b).unwrap();
        a
    };

    {
        let mut repo = open_repo(&tmp);
        assert_eq!(repo.route_count(), 1);
        assert_eq!(repo.visible_route_ids(), vec![a]);
        repo.clear_all().unwrap();
    }

    let repo = open_repo(&tmp);
    assert_eq!(repo.route_count(), 0);
    assert!(repo.visible_route_ids().is_empty());
    assert_eq!(repo.totals().total_distance_meters, 0.0);
}

#[test]
fn test_totals_match_saved_routes() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let mut repo = open_repo(&tmp);
    let one = record("One", 5.0, 5);
    let two = record("Two", 5.2, 2);
    let expected_distance = one.total_distance_meters() + two.total_distance_meters();
    let expected_duration = one.total_duration_ms() + two.total_duration_ms();
    repo.save(one).unwrap();
    repo.save(two).unwrap();

    let reopened = open_repo(&tmp);
    let totals = reopened.totals();
    assert_eq!(totals.route_count, 2);
    assert_eq!(totals.total_duration_ms, expected_duration);
    assert!((totals.total_distance_meters - expected_distance).abs() < 1e-9);
}

#[test]
fn test_store_writes_current_version() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let db_path = tmp.path().join("routes.db");
    {
        let store = SqliteRouteStore::new(db_path.to_str().unwrap()).unwrap();
        let mut repo = RouteRepository::open(store).unwrap();
        repo.save(record("One", 5.0, 2)).unwrap();
    }

    let store = SqliteRouteStore::new(db_path.to_str().unwrap()).unwrap();
    assert_eq!(store.stored_version().unwrap(), Some(CURRENT_SCHEMA_VERSION));
    let state = store.load().unwrap().expect("state saved");
    assert_eq!(state.routes.len(), 1);
    assert_eq!(state.visible_route_ids, vec![state.routes[0].id()]);
}
