//! Position fix delivery.
//!
//! Fixes arrive from a platform location service at its own cadence. They are
//! funnelled through a single ordered [`FixQueue`] so the controller sees them
//! in arrival order from one execution context. [`SyntheticLocationProvider`]
//! is a deterministic stand-in for the platform service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info};

use crate::auto_pause::InactivityWatchdog;
use crate::clock::Clock;
use crate::recording::{RecordingConfig, RecordingController};
use crate::{geo_utils, Coordinate};

/// One reported device position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub longitude: f64,
    pub latitude: f64,
    /// Horizontal accuracy in meters, if reported
    pub accuracy_meters: Option<f64>,
}

impl PositionFix {
    pub fn new(longitude: f64, latitude: f64, accuracy_meters: Option<f64>) -> Self {
        Self {
            longitude,
            latitude,
            accuracy_meters,
        }
    }
}

/// Events delivered to the controller, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    Fix(PositionFix),
    LocationError(String),
    InactivityTimeout,
}

pub type FixCallback = Box<dyn FnMut(PositionFix) + Send>;
pub type ErrorCallback = Box<dyn FnMut(String) + Send>;

/// Capability for continuous position delivery.
pub trait LocationProvider {
    /// Start delivering fixes until the returned subscription is cancelled or dropped.
    fn subscribe(&self, on_fix: FixCallback, on_error: ErrorCallback) -> Subscription;
}

/// Handle to an active provider subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// A new active subscription and the flag a provider polls to see if it is still wanted.
    pub fn pair() -> (Self, Arc<AtomicBool>) {
        let active = Arc::new(AtomicBool::new(true));
        (
            Self {
                active: Arc::clone(&active),
            },
            active,
        )
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Ordered Queue
// ============================================================================

/// Sending half of a [`FixQueue`]. Cheap to clone into provider callbacks.
#[derive(Debug, Clone)]
pub struct FixSender {
    tx: mpsc::Sender<RecorderEvent>,
}

impl FixSender {
    /// Post an event. Returns false once the queue has been dropped.
    pub fn send(&self, event: RecorderEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn send_fix(&self, fix: PositionFix) -> bool {
        self.send(RecorderEvent::Fix(fix))
    }

    pub fn send_error(&self, message: String) -> bool {
        self.send(RecorderEvent::LocationError(message))
    }

    pub fn send_inactivity(&self) -> bool {
        self.send(RecorderEvent::InactivityTimeout)
    }
}

/// Single ordered channel from location callbacks (and the inactivity
/// watchdog) into the recording controller.
pub struct FixQueue {
    tx: mpsc::Sender<RecorderEvent>,
    rx: mpsc::Receiver<RecorderEvent>,
    watchdog: Option<InactivityWatchdog>,
}

impl FixQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            watchdog: None,
        }
    }

    pub fn sender(&self) -> FixSender {
        FixSender {
            tx: self.tx.clone(),
        }
    }

    /// Subscribe to a provider, forwarding its fixes and errors into this queue.
    pub fn attach<P: LocationProvider + ?Sized>(&self, provider: &P) -> Subscription {
        let fixes = self.sender();
        let errors = self.sender();
        provider.subscribe(
            Box::new(move |fix| {
                fixes.send_fix(fix);
            }),
            Box::new(move |message| {
                errors.send_error(message);
            }),
        )
    }

    /// Start or stop the inactivity watchdog to match `config`.
    pub fn arm_auto_pause(&mut self, config: &RecordingConfig) {
        // Dropping the previous watchdog stops its thread
        self.watchdog = None;
        if config.auto_pause_enabled && config.auto_pause_seconds > 0 {
            let timeout = Duration::from_secs(u64::from(config.auto_pause_seconds));
            info!("[FixQueue] Auto-pause armed ({:?})", timeout);
            self.watchdog = Some(InactivityWatchdog::spawn(timeout, self.sender()));
        }
    }

    pub fn auto_pause_armed(&self) -> bool {
        self.watchdog.is_some()
    }

    /// Apply every pending event to the controller in arrival order.
    ///
    /// Returns the number of fixes appended.
    pub fn drain<C: Clock>(&self, controller: &mut RecordingController<C>) -> usize {
        let mut appended = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.dispatch(controller, event) {
                appended += 1;
            }
        }
        appended
    }

    /// Wait up to `timeout` for the next event and apply it.
    ///
    /// Returns the applied event, or `None` on timeout.
    pub fn process_next<C: Clock>(
        &self,
        controller: &mut RecordingController<C>,
        timeout: Duration,
    ) -> Option<RecorderEvent> {
        let event = self.rx.recv_timeout(timeout).ok()?;
        self.dispatch(controller, event.clone());
        Some(event)
    }

    fn dispatch<C: Clock>(
        &self,
        controller: &mut RecordingController<C>,
        event: RecorderEvent,
    ) -> bool {
        let appended = controller.handle_event(event);
        if appended {
            if let Some(watchdog) = &self.watchdog {
                watchdog.reset();
            }
        }
        appended
    }
}

impl Default for FixQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Synthetic Provider
// ============================================================================

struct Subscriber {
    active: Arc<AtomicBool>,
    on_fix: FixCallback,
    on_error: ErrorCallback,
}

/// Deterministic location provider that replays a scripted list of fixes.
///
/// Fixes are delivered only when [`emit_next`](Self::emit_next) or
/// [`emit_all`](Self::emit_all) is called, so tests control the cadence.
pub struct SyntheticLocationProvider {
    fixes: Vec<PositionFix>,
    inner: Mutex<SyntheticState>,
}

#[derive(Default)]
struct SyntheticState {
    cursor: usize,
    subscribers: Vec<Subscriber>,
}

impl SyntheticLocationProvider {
    pub fn new(fixes: Vec<PositionFix>) -> Self {
        Self {
            fixes,
            inner: Mutex::new(SyntheticState::default()),
        }
    }

    /// `count` fixes heading due east from `start`, `step_meters` apart.
    pub fn eastward(start: Coordinate, step_meters: f64, count: usize) -> Self {
        let (_, lon_step) = geo_utils::meters_to_degree_offsets(step_meters, start.latitude);
        let fixes = (0..count)
            .map(|i| {
                PositionFix::new(
                    start.longitude + lon_step * i as f64,
                    start.latitude,
                    Some(5.0),
                )
            })
            .collect();
        Self::new(fixes)
    }

    pub fn remaining(&self) -> usize {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.fixes.len().saturating_sub(state.cursor)
    }

    /// Deliver the next scripted fix to every active subscriber.
    ///
    /// Returns false when the script is exhausted.
    pub fn emit_next(&self) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(fix) = self.fixes.get(state.cursor).copied() else {
            return false;
        };
        state.cursor += 1;
        state
            .subscribers
            .retain(|s| s.active.load(Ordering::SeqCst));
        for subscriber in state.subscribers.iter_mut() {
            (subscriber.on_fix)(fix);
        }
        true
    }

    /// Deliver every remaining fix. Returns how many were emitted.
    pub fn emit_all(&self) -> usize {
        let mut emitted = 0;
        while self.emit_next() {
            emitted += 1;
        }
        debug!("[SyntheticProvider] Emitted {} fixes", emitted);
        emitted
    }

    /// Report a provider error to every active subscriber.
    pub fn emit_error(&self, message: &str) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .subscribers
            .retain(|s| s.active.load(Ordering::SeqCst));
        for subscriber in state.subscribers.iter_mut() {
            (subscriber.on_error)(message.to_string());
        }
    }
}

impl LocationProvider for SyntheticLocationProvider {
    fn subscribe(&self, on_fix: FixCallback, on_error: ErrorCallback) -> Subscription {
        let (subscription, active) = Subscription::pair();
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribers.push(Subscriber {
            active,
            on_fix,
            on_error,
        });
        subscription
    }
}
