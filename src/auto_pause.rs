//! Inactivity watchdog for auto-pause.
//!
//! A background thread waits for `timeout`; every [`reset`](InactivityWatchdog::reset)
//! restarts the wait. When the wait elapses the watchdog posts
//! [`RecorderEvent::InactivityTimeout`](crate::RecorderEvent::InactivityTimeout)
//! into the fix queue and starts waiting again, so it keeps firing once per
//! `timeout` for as long as no fix is accepted. The controller decides whether
//! to pause when it processes that event; a declined event (session idle,
//! already paused, or recently resumed) is simply followed by the next one.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::location::FixSender;

enum Command {
    Reset,
    Stop,
}

/// Cancellable, resettable inactivity timer. Stops its thread on drop.
pub struct InactivityWatchdog {
    control: mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl InactivityWatchdog {
    /// Spawn a watchdog that posts into `events` after `timeout` without a reset.
    pub fn spawn(timeout: Duration, events: FixSender) -> Self {
        let (control, commands) = mpsc::channel::<Command>();

        let spawned = thread::Builder::new()
            .name("inactivity-watchdog".to_string())
            .spawn(move || run(timeout, commands, events));

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("[Watchdog] Failed to spawn thread, auto-pause disabled: {}", e);
                None
            }
        };

        Self {
            control,
            handle,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Restart the inactivity window.
    pub fn reset(&self) {
        let _ = self.control.send(Command::Reset);
    }

    /// Stop the watchdog and wait for its thread to exit.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.control.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for InactivityWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(timeout: Duration, commands: mpsc::Receiver<Command>, events: FixSender) {
    loop {
        match commands.recv_timeout(timeout) {
            Ok(Command::Reset) => continue,
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                debug!("[Watchdog] No accepted fix for {:?}", timeout);
                if !events.send_inactivity() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::location::{FixQueue, RecorderEvent};
    use crate::recording::{PauseReason, RecordingConfig, RecordingController, RecordingState};

    #[test]
    fn test_keeps_firing_while_quiet() {
        let queue = FixQueue::new();
        let mut rec = RecordingController::new(ManualClock::new(0));
        let watchdog = InactivityWatchdog::spawn(Duration::from_millis(20), queue.sender());

        for _ in 0..3 {
            let event = queue.process_next(&mut rec, Duration::from_secs(5));
            assert_eq!(event, Some(RecorderEvent::InactivityTimeout));
        }

        watchdog.cancel();
    }

    #[test]
    fn test_timeout_event_auto_pauses_controller() {
        let clock = ManualClock::new(0);
        let config = RecordingConfig {
            auto_pause_enabled: true,
            auto_pause_seconds: 1,
            ..RecordingConfig::default()
        };
        let mut rec = RecordingController::with_config(clock.clone(), config).unwrap();
        rec.start().unwrap();

        let queue = FixQueue::new();
        let _watchdog = InactivityWatchdog::spawn(Duration::from_millis(20), queue.sender());

        clock.set(1_000);
        let event = queue.process_next(&mut rec, Duration::from_secs(5));
        assert_eq!(event, Some(RecorderEvent::InactivityTimeout));
        assert_eq!(rec.state(), RecordingState::Paused);
        assert_eq!(rec.pause_reason(), Some(PauseReason::Auto));
    }

    #[test]
    fn test_drop_stops_thread() {
        let queue = FixQueue::new();
        let watchdog = InactivityWatchdog::spawn(Duration::from_secs(3600), queue.sender());
        assert_eq!(watchdog.timeout(), Duration::from_secs(3600));
        drop(watchdog);
    }

    /// Process events until one auto-pauses the controller.
    fn wait_for_auto_pause(queue: &FixQueue, rec: &mut RecordingController<ManualClock>) -> bool {
        for _ in 0..20 {
            queue.process_next(rec, Duration::from_secs(5));
            if rec.pause_reason() == Some(PauseReason::Auto) {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_armed_before_start_still_pauses() {
        let clock = ManualClock::new(0);
        let config = RecordingConfig {
            auto_pause_enabled: true,
            auto_pause_seconds: 1,
            ..RecordingConfig::default()
        };
        let mut rec = RecordingController::with_config(clock.clone(), config).unwrap();
        let queue = FixQueue::new();
        let _watchdog = InactivityWatchdog::spawn(Duration::from_millis(20), queue.sender());

        // Fires while idle and is declined
        let event = queue.process_next(&mut rec, Duration::from_secs(5));
        assert_eq!(event, Some(RecorderEvent::InactivityTimeout));
        assert_eq!(rec.state(), RecordingState::Idle);

        rec.start().unwrap();
        clock.set(1_000);
        assert!(wait_for_auto_pause(&queue, &mut rec));
        assert_eq!(rec.state(), RecordingState::Paused);
    }

    #[test]
    fn test_pauses_after_manual_pause_and_resume() {
        let clock = ManualClock::new(0);
        let config = RecordingConfig {
            auto_pause_enabled: true,
            auto_pause_seconds: 1,
            ..RecordingConfig::default()
        };
        let mut rec = RecordingController::with_config(clock.clone(), config).unwrap();
        rec.start().unwrap();
        assert!(rec.pause());

        let queue = FixQueue::new();
        let _watchdog = InactivityWatchdog::spawn(Duration::from_millis(20), queue.sender());

        // Declined while manually paused
        let event = queue.process_next(&mut rec, Duration::from_secs(5));
        assert_eq!(event, Some(RecorderEvent::InactivityTimeout));
        assert_eq!(rec.pause_reason(), Some(PauseReason::Manual));

        clock.set(500);
        assert!(rec.resume());

        // Declined: less than the window since resuming
        let event = queue.process_next(&mut rec, Duration::from_secs(5));
        assert_eq!(event, Some(RecorderEvent::InactivityTimeout));
        assert_eq!(rec.state(), RecordingState::Recording);

        clock.set(1_600);
        assert!(wait_for_auto_pause(&queue, &mut rec));
        assert_eq!(rec.total_paused_ms(), 500);
    }
}
