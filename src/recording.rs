//! # Recording Controller
//!
//! Owns the live recording session: the state machine, the buffer of retained
//! points and the pause bookkeeping.
//!
//! ```text
//!          start()            pause()
//!   Idle ───────────▶ Recording ─────────▶ Paused
//!    ▲                 │   ▲               │
//!    │  stop()/cancel()│   └── resume() ───┘
//!    └─────────────────┴───────────────────┘ stop()/cancel()
//! ```
//!
//! Time is pull-based: durations are computed from the injected [`Clock`] when
//! queried, never accumulated on a timer. The controller must be driven from a
//! single execution context; [`crate::FixQueue`] provides the ordered delivery.

use chrono::{DateTime, Local, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::location::{PositionFix, RecorderEvent};
use crate::{geo_utils, Coordinate, RecordedRoute, RecorderError, Result, RoutePoint};

/// Minimum number of points a recording needs to become a route.
pub const MIN_ROUTE_POINTS: usize = 2;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordingState::Idle => "idle",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Why the session is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// `pause()` was called
    Manual,
    /// No fix was accepted for `auto_pause_seconds`
    Auto,
}

/// Configuration for live recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    /// Fixes closer than this to the last retained point are dropped as jitter.
    /// Default: 2.0 meters
    pub min_point_distance_meters: f64,

    /// Pause automatically when no fix is accepted for `auto_pause_seconds`.
    /// Default: false
    pub auto_pause_enabled: bool,

    /// Inactivity window before auto-pause.
    /// Default: 60 seconds
    pub auto_pause_seconds: u32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            min_point_distance_meters: 2.0,
            auto_pause_enabled: false,
            auto_pause_seconds: 60,
        }
    }
}

impl RecordingConfig {
    /// Reject values the controller cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.min_point_distance_meters.is_finite() || self.min_point_distance_meters < 0.0 {
            return Err(RecorderError::config(format!(
                "min_point_distance_meters must be a non-negative number, got {}",
                self.min_point_distance_meters
            )));
        }
        if self.auto_pause_enabled && self.auto_pause_seconds == 0 {
            return Err(RecorderError::config(
                "auto_pause_seconds must be positive when auto-pause is enabled",
            ));
        }
        Ok(())
    }

    pub(crate) fn auto_pause_ms(&self) -> i64 {
        i64::from(self.auto_pause_seconds) * 1000
    }
}

/// Result of [`RecordingController::stop`].
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// A finalized route for the caller to persist.
    Saved(RecordedRoute),
    /// Too few points were recorded; nothing was produced.
    Discarded { point_count: usize },
}

impl StopOutcome {
    pub fn into_route(self) -> Option<RecordedRoute> {
        match self {
            StopOutcome::Saved(route) => Some(route),
            StopOutcome::Discarded { .. } => None,
        }
    }
}

/// Snapshot of the in-progress track for live rendering.
#[derive(Debug, Clone, Copy)]
pub struct LiveTrack<'a> {
    pub state: RecordingState,
    pub points: &'a [RoutePoint],
    pub distance_meters: f64,
    pub duration_ms: i64,
}

// ============================================================================
// Recording Controller
// ============================================================================

/// The live recording session.
pub struct RecordingController<C: Clock = SystemClock> {
    clock: C,
    config: RecordingConfig,

    state: RecordingState,
    points: Vec<RoutePoint>,
    start_time_ms: Option<i64>,
    pause_start_ms: Option<i64>,
    total_paused_ms: i64,
    pause_reason: Option<PauseReason>,

    // Last instant a fix was accepted (or the session started)
    last_activity_ms: Option<i64>,
}

impl RecordingController<SystemClock> {
    /// Controller on the system wall clock.
    pub fn system() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> RecordingController<C> {
    /// Create an idle controller with default configuration.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            config: RecordingConfig::default(),
            state: RecordingState::Idle,
            points: Vec::new(),
            start_time_ms: None,
            pause_start_ms: None,
            total_paused_ms: 0,
            pause_reason: None,
            last_activity_ms: None,
        }
    }

    /// Create an idle controller with validated configuration.
    pub fn with_config(clock: C, config: RecordingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(clock)
        })
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Replace the configuration. Takes effect for the next fix.
    pub fn set_config(&mut self, config: RecordingConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// True while recording or paused.
    pub fn is_active(&self) -> bool {
        self.state != RecordingState::Idle
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause_reason
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    pub fn start_time_ms(&self) -> Option<i64> {
        self.start_time_ms
    }

    /// Paused time already closed by `resume()`.
    pub fn total_paused_ms(&self) -> i64 {
        self.total_paused_ms
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Begin a new session.
    ///
    /// Fails if a session is already active; `stop()` or `cancel()` it first.
    pub fn start(&mut self) -> Result<()> {
        if self.state != RecordingState::Idle {
            return Err(RecorderError::InvalidState {
                operation: "start",
                state: self.state.to_string(),
            });
        }

        let now = self.clock.now_ms();
        self.reset();
        self.start_time_ms = Some(now);
        self.last_activity_ms = Some(now);
        self.state = RecordingState::Recording;

        info!("[Recorder] Started at {}", now);
        Ok(())
    }

    /// Offer a position fix to the session.
    ///
    /// Ignored unless recording. A fix within `min_point_distance_meters` of the
    /// last retained point is dropped. While auto-paused, a fix that passes the
    /// filter resumes the session first. Returns whether the fix was appended.
    pub fn ingest_position(
        &mut self,
        longitude: f64,
        latitude: f64,
        accuracy: Option<f64>,
    ) -> bool {
        let coordinates = Coordinate::new(longitude, latitude);

        match self.state {
            RecordingState::Recording => {}
            RecordingState::Paused if self.pause_reason == Some(PauseReason::Auto) => {
                if !coordinates.is_valid() || !self.passes_filter(&coordinates) {
                    return false;
                }
                info!("[Recorder] Movement detected, resuming from auto-pause");
                self.resume();
            }
            _ => return false,
        }

        if !coordinates.is_valid() {
            warn!(
                "[Recorder] Dropping invalid fix ({}, {})",
                longitude, latitude
            );
            return false;
        }

        if !self.passes_filter(&coordinates) {
            debug!("[Recorder] Dropping jitter fix ({}, {})", longitude, latitude);
            return false;
        }

        let now = self.clock.now_ms();
        self.points.push(RoutePoint::new(coordinates, now, accuracy));
        self.last_activity_ms = Some(now);
        true
    }

    /// [`ingest_position`](Self::ingest_position) for a [`PositionFix`].
    pub fn ingest(&mut self, fix: &PositionFix) -> bool {
        self.ingest_position(fix.longitude, fix.latitude, fix.accuracy_meters)
    }

    /// Pause the session. No-op unless recording.
    pub fn pause(&mut self) -> bool {
        self.pause_for(PauseReason::Manual)
    }

    fn pause_for(&mut self, reason: PauseReason) -> bool {
        if self.state != RecordingState::Recording {
            return false;
        }
        let now = self.clock.now_ms();
        self.pause_start_ms = Some(now);
        self.pause_reason = Some(reason);
        self.state = RecordingState::Paused;

        info!("[Recorder] Paused ({:?})", reason);
        true
    }

    /// Resume a paused session. No-op unless paused.
    pub fn resume(&mut self) -> bool {
        if self.state != RecordingState::Paused {
            return false;
        }
        self.close_pause();
        self.last_activity_ms = Some(self.clock.now_ms());
        self.state = RecordingState::Recording;

        info!(
            "[Recorder] Resumed, {} ms paused in total",
            self.total_paused_ms
        );
        true
    }

    /// Finish the session.
    ///
    /// With at least two points a route is built and returned for the caller to
    /// persist; otherwise the buffer is discarded. Either way the controller
    /// returns to `Idle`.
    pub fn stop(&mut self, name: Option<&str>) -> StopOutcome {
        if self.state == RecordingState::Idle {
            return StopOutcome::Discarded { point_count: 0 };
        }

        let now = self.clock.now_ms();
        if self.state == RecordingState::Paused {
            self.close_pause();
        }

        let point_count = self.points.len();
        if point_count < MIN_ROUTE_POINTS {
            info!("[Recorder] Stopped with {} points, nothing saved", point_count);
            self.reset();
            return StopOutcome::Discarded { point_count };
        }

        let start = self.start_time_ms.unwrap_or(now);
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_route_name(now));

        let points = std::mem::take(&mut self.points);
        let outcome = match RecordedRoute::from_parts(
            name,
            points,
            start,
            now,
            self.total_paused_ms,
            DateTime::from_timestamp_millis(now).unwrap_or_else(Utc::now),
        ) {
            Some(route) => {
                info!(
                    "[Recorder] Stopped: '{}' {} points, {:.0} m, {} ms",
                    route.name(),
                    route.point_count(),
                    route.total_distance_meters(),
                    route.total_duration_ms()
                );
                StopOutcome::Saved(route)
            }
            None => StopOutcome::Discarded { point_count },
        };

        self.reset();
        outcome
    }

    /// Abandon the session, discarding every buffered point.
    pub fn cancel(&mut self) {
        if self.is_active() {
            info!(
                "[Recorder] Cancelled, discarded {} points",
                self.points.len()
            );
        }
        self.reset();
    }

    /// Auto-pause if no fix has been accepted within the configured window.
    ///
    /// Returns true if the session was paused by this call.
    pub fn check_inactivity(&mut self) -> bool {
        if !self.config.auto_pause_enabled || self.state != RecordingState::Recording {
            return false;
        }
        let Some(last) = self.last_activity_ms else {
            return false;
        };
        if self.clock.now_ms() - last < self.config.auto_pause_ms() {
            return false;
        }
        self.pause_for(PauseReason::Auto)
    }

    /// Apply one event from the ordered fix queue.
    ///
    /// Returns true if a fix was appended.
    pub fn handle_event(&mut self, event: RecorderEvent) -> bool {
        match event {
            RecorderEvent::Fix(fix) => self.ingest(&fix),
            RecorderEvent::LocationError(message) => {
                warn!("[Recorder] Location error: {}", message);
                false
            }
            RecorderEvent::InactivityTimeout => {
                self.check_inactivity();
                false
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Distance covered so far in meters.
    pub fn current_distance(&self) -> f64 {
        geo_utils::total_distance(&self.points)
    }

    /// Moving time so far in milliseconds, excluding all pauses including an
    /// open one.
    pub fn current_duration(&self) -> i64 {
        let Some(start) = self.start_time_ms else {
            return 0;
        };
        let now = self.clock.now_ms();
        let open_pause = match (self.state, self.pause_start_ms) {
            (RecordingState::Paused, Some(pause_start)) => now - pause_start,
            _ => 0,
        };
        (now - start - self.total_paused_ms - open_pause).max(0)
    }

    /// Average moving speed so far in km/h, 0 when no time has elapsed.
    pub fn average_speed_kmh(&self) -> f64 {
        geo_utils::average_speed_kmh(self.current_distance(), self.current_duration())
    }

    /// The in-progress track for live rendering.
    pub fn live_track(&self) -> LiveTrack<'_> {
        LiveTrack {
            state: self.state,
            points: &self.points,
            distance_meters: self.current_distance(),
            duration_ms: self.current_duration(),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn passes_filter(&self, coordinates: &Coordinate) -> bool {
        match self.points.last() {
            Some(last) => {
                geo_utils::point_distance(&last.coordinates, coordinates)
                    >= self.config.min_point_distance_meters
            }
            None => true,
        }
    }

    fn close_pause(&mut self) {
        if let Some(pause_start) = self.pause_start_ms.take() {
            self.total_paused_ms += self.clock.now_ms() - pause_start;
        }
        self.pause_reason = None;
    }

    fn reset(&mut self) {
        self.state = RecordingState::Idle;
        self.points.clear();
        self.start_time_ms = None;
        self.pause_start_ms = None;
        self.total_paused_ms = 0;
        self.pause_reason = None;
        self.last_activity_ms = None;
    }
}

/// Default route name: the local date and time the recording stopped.
fn default_route_name(now_ms: i64) -> String {
    match Local.timestamp_millis_opt(now_ms).single() {
        Some(local) => local.format("%Y-%m-%d %H:%M").to_string(),
        None => format!("Route {}", now_ms),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn recorder() -> (RecordingController<ManualClock>, ManualClock) {
        let clock = ManualClock::new(0);
        (RecordingController::new(clock.clone()), clock)
    }

    #[test]
    fn test_start_from_idle_only() {
        let (mut rec, _clock) = recorder();
        assert_eq!(rec.state(), RecordingState::Idle);

        rec.start().unwrap();
        assert_eq!(rec.state(), RecordingState::Recording);

        let err = rec.start().unwrap_err();
        assert!(matches!(err, RecorderError::InvalidState { operation: "start", .. }));

        rec.pause();
        assert!(rec.start().is_err());
    }

    #[test]
    fn test_ingest_ignored_when_not_recording() {
        let (mut rec, _clock) = recorder();
        assert!(!rec.ingest_position(5.0, 52.0, None));
        assert!(rec.points().is_empty());

        rec.start().unwrap();
        rec.pause();
        assert!(!rec.ingest_position(5.0, 52.0, None));
        assert!(rec.points().is_empty());
    }

    #[test]
    fn test_jitter_filter_keeps_only_first_of_close_fixes() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();

        assert!(rec.ingest_position(5.0, 52.0, Some(3.0)));
        clock.advance(1_000);
        // ~0.7 m north
        assert!(!rec.ingest_position(5.0, 52.000_006, None));
        assert_eq!(rec.points().len(), 1);
        assert_eq!(rec.points()[0].timestamp_ms, 0);
        assert_eq!(rec.points()[0].accuracy_meters, Some(3.0));

        // ~11 m north
        assert!(rec.ingest_position(5.0, 52.0001, None));
        assert_eq!(rec.points().len(), 2);
        assert_eq!(rec.points()[1].timestamp_ms, 1_000);
    }

    #[test]
    fn test_invalid_fix_dropped() {
        let (mut rec, _clock) = recorder();
        rec.start().unwrap();
        assert!(!rec.ingest_position(f64::NAN, 52.0, None));
        assert!(!rec.ingest_position(5.0, 95.0, None));
        assert!(rec.points().is_empty());
    }

    #[test]
    fn test_pause_resume_accounts_exact_delta() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();

        clock.set(3_000);
        assert!(rec.pause());
        assert!(!rec.pause());

        clock.set(7_500);
        assert_eq!(rec.current_duration(), 3_000);

        assert!(rec.resume());
        assert!(!rec.resume());
        assert_eq!(rec.total_paused_ms(), 4_500);

        clock.set(10_000);
        assert_eq!(rec.current_duration(), 5_500);
    }

    #[test]
    fn test_pause_and_resume_noop_in_wrong_state() {
        let (mut rec, _clock) = recorder();
        assert!(!rec.pause());
        assert!(!rec.resume());
        rec.start().unwrap();
        assert!(!rec.resume());
        assert_eq!(rec.state(), RecordingState::Recording);
    }

    #[test]
    fn test_stop_with_too_few_points_discards() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();
        rec.ingest_position(5.0, 52.0, None);
        clock.advance(10_000);

        assert_eq!(rec.stop(Some("x")), StopOutcome::Discarded { point_count: 1 });
        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(rec.points().is_empty());
        assert_eq!(rec.start_time_ms(), None);
        assert_eq!(rec.current_duration(), 0);
    }

    #[test]
    fn test_stop_when_idle() {
        let (mut rec, _clock) = recorder();
        assert_eq!(rec.stop(None), StopOutcome::Discarded { point_count: 0 });
    }

    #[test]
    fn test_stop_while_paused_closes_pause() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();
        rec.ingest_position(5.0, 52.0, None);
        clock.set(4_000);
        rec.ingest_position(5.0, 52.001, None);
        rec.pause();
        clock.set(9_000);

        let route = rec.stop(Some("Paused stop")).into_route().unwrap();
        assert_eq!(route.paused_duration_ms(), 5_000);
        assert_eq!(route.total_duration_ms(), 4_000);
        assert_eq!(route.end_time_ms(), 9_000);
        assert_eq!(
            route.total_duration_ms(),
            route.end_time_ms() - route.start_time_ms() - route.paused_duration_ms()
        );
    }

    #[test]
    fn test_created_at_follows_clock() {
        let clock = ManualClock::new(1_772_355_600_000);
        let mut rec = RecordingController::new(clock.clone());
        rec.start().unwrap();
        rec.ingest_position(5.0, 52.0, None);
        clock.advance(30_000);
        rec.ingest_position(5.0, 52.001, None);

        let route = rec.stop(Some("Clocked")).into_route().unwrap();
        assert_eq!(route.created_at().timestamp_millis(), 1_772_355_630_000);
        assert_eq!(route.created_at().timestamp_millis(), route.end_time_ms());
    }

    #[test]
    fn test_stop_default_name_and_blank_name() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();
        rec.ingest_position(5.0, 52.0, None);
        clock.advance(1_000);
        rec.ingest_position(5.0, 52.001, None);

        let route = rec.stop(Some("   ")).into_route().unwrap();
        assert!(!route.name().trim().is_empty());
        assert_eq!(route.name(), default_route_name(1_000));
    }

    #[test]
    fn test_cancel_discards_everything() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();
        for i in 0..5 {
            clock.advance(1_000);
            rec.ingest_position(5.0, 52.0 + i as f64 * 0.001, None);
        }
        rec.pause();
        rec.cancel();

        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(rec.points().is_empty());
        assert_eq!(rec.total_paused_ms(), 0);
        assert!(rec.start().is_ok());
    }

    #[test]
    fn test_average_speed_guarded() {
        let (mut rec, clock) = recorder();
        assert_eq!(rec.average_speed_kmh(), 0.0);

        rec.start().unwrap();
        rec.ingest_position(5.0, 52.0, None);
        assert_eq!(rec.average_speed_kmh(), 0.0);

        clock.set(3_600_000);
        rec.ingest_position(5.0, 52.0 + 1000.0 / 111_194.93, None);
        assert!((rec.average_speed_kmh() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_auto_pause_and_resume() {
        let clock = ManualClock::new(0);
        let config = RecordingConfig {
            auto_pause_enabled: true,
            auto_pause_seconds: 30,
            ..RecordingConfig::default()
        };
        let mut rec = RecordingController::with_config(clock.clone(), config).unwrap();
        rec.start().unwrap();
        rec.ingest_position(5.0, 52.0, None);

        clock.set(29_999);
        assert!(!rec.check_inactivity());

        clock.set(30_000);
        assert!(rec.check_inactivity());
        assert_eq!(rec.state(), RecordingState::Paused);
        assert_eq!(rec.pause_reason(), Some(PauseReason::Auto));

        // Jitter does not wake the session
        clock.set(40_000);
        assert!(!rec.ingest_position(5.0, 52.000_001, None));
        assert_eq!(rec.state(), RecordingState::Paused);

        clock.set(50_000);
        assert!(rec.ingest_position(5.0, 52.001, None));
        assert_eq!(rec.state(), RecordingState::Recording);
        assert_eq!(rec.total_paused_ms(), 20_000);
        assert_eq!(rec.points().len(), 2);
    }

    #[test]
    fn test_manual_pause_never_auto_resumes() {
        let clock = ManualClock::new(0);
        let config = RecordingConfig {
            auto_pause_enabled: true,
            ..RecordingConfig::default()
        };
        let mut rec = RecordingController::with_config(clock.clone(), config).unwrap();
        rec.start().unwrap();
        rec.pause();
        clock.advance(120_000);
        assert!(!rec.ingest_position(5.0, 52.0, None));
        assert!(!rec.check_inactivity());
        assert_eq!(rec.pause_reason(), Some(PauseReason::Manual));
    }

    #[test]
    fn test_inactivity_ignored_when_disabled() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();
        clock.advance(3_600_000);
        assert!(!rec.check_inactivity());
        assert!(!rec.handle_event(RecorderEvent::InactivityTimeout));
        assert_eq!(rec.state(), RecordingState::Recording);
    }

    #[test]
    fn test_config_validation() {
        let bad = RecordingConfig {
            min_point_distance_meters: -1.0,
            ..RecordingConfig::default()
        };
        assert!(RecordingController::with_config(ManualClock::new(0), bad).is_err());

        let bad = RecordingConfig {
            auto_pause_enabled: true,
            auto_pause_seconds: 0,
            ..RecordingConfig::default()
        };
        assert!(matches!(bad.validate(), Err(RecorderError::Config { .. })));
    }

    #[test]
    fn test_live_track_snapshot() {
        let (mut rec, clock) = recorder();
        rec.start().unwrap();
        rec.ingest_position(5.0, 52.0, None);
        clock.set(2_000);
        rec.ingest_position(5.0003, 52.0, None);

        let live = rec.live_track();
        assert_eq!(live.state, RecordingState::Recording);
        assert_eq!(live.points.len(), 2);
        assert_eq!(live.duration_ms, 2_000);
        assert!((live.distance_meters - rec.current_distance()).abs() < 1e-9);
    }
}
