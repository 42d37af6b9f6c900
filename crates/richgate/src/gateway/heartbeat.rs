//! Heartbeat scheduling and acknowledgment tracking.
//!
//! The timer task only produces [`Signal::HeartbeatDue`] ticks; whether a
//! tick sends a pulse or declares the connection stale is decided by the
//! [`HeartbeatTracker`] owned by the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session::Signal;

/// Result of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Send a heartbeat now.
    Send,
    /// The previous heartbeat was never acknowledged.
    Stale,
    /// Tick from a cancelled or replaced schedule.
    Ignore,
}

/// Acknowledgment state of the heartbeat schedule.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    interval: Option<Duration>,
    epoch: u64,
    running: bool,
    awaiting_ack: bool,
    last_sent_at: Option<Instant>,
}

impl Default for HeartbeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatTracker {
    /// Create a stopped tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval: None,
            epoch: 0,
            running: false,
            awaiting_ack: false,
            last_sent_at: None,
        }
    }

    /// Begin a new schedule, replacing any previous one.
    ///
    /// Returns the epoch that ticks of the new schedule must carry.
    pub fn start(&mut self, interval: Duration) -> u64 {
        self.epoch += 1;
        self.interval = Some(interval);
        self.running = true;
        self.awaiting_ack = false;
        self.epoch
    }

    /// Stop the schedule. Safe to call when not started.
    pub fn stop(&mut self) {
        self.running = false;
        self.awaiting_ack = false;
    }

    /// Decide what a tick of schedule `epoch` should do.
    pub fn tick(&mut self, epoch: u64) -> Pulse {
        if !self.running || epoch != self.epoch {
            return Pulse::Ignore;
        }
        if self.awaiting_ack {
            self.stop();
            return Pulse::Stale;
        }
        self.mark_sent();
        Pulse::Send
    }

    /// Record a heartbeat sent outside the schedule.
    pub fn mark_sent(&mut self) {
        self.awaiting_ack = true;
        self.last_sent_at = Some(Instant::now());
    }

    /// Record an acknowledgment. Returns the round trip of the last pulse.
    pub fn acknowledge(&mut self) -> Option<Duration> {
        let was_awaiting = std::mem::replace(&mut self.awaiting_ack, false);
        if was_awaiting {
            self.last_sent_at.map(|sent| sent.elapsed())
        } else {
            None
        }
    }

    /// Interval of the current or last schedule.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Whether a schedule is active.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the most recent pulse was acknowledged.
    #[must_use]
    pub const fn last_ack_received(&self) -> bool {
        !self.awaiting_ack
    }

    /// When the most recent pulse was sent.
    #[must_use]
    pub const fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }
}

/// Handle for controlling the heartbeat task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl HeartbeatHandle {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Check if the heartbeat task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the heartbeat task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a periodic heartbeat timer.
///
/// The first tick fires one full `interval` after the call. Ticks carry
/// `epoch` so that ticks from a replaced schedule can be told apart.
pub fn start_heartbeat_task(
    epoch: u64,
    interval: Duration,
    tx: mpsc::Sender<Signal>,
) -> HeartbeatHandle {
    let handle = HeartbeatHandle::new();
    handle.running.store(true, Ordering::SeqCst);

    let running = Arc::clone(&handle.running);
    let cancel = handle.cancel.clone();

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval_at(Instant::now() + interval, interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval_timer.tick() => {
                    if tx.send(Signal::HeartbeatDue { epoch }).await.is_err() {
                        // Session gone, stop the task
                        break;
                    }
                }
            }
        }

        running.store(false, Ordering::SeqCst);
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_initial_state() {
        let tracker = HeartbeatTracker::new();
        assert!(!tracker.is_running());
        assert!(tracker.last_ack_received());
        assert!(tracker.interval().is_none());
        assert!(tracker.last_sent_at().is_none());
    }

    #[test]
    fn test_tick_sends_then_flags_stale() {
        let mut tracker = HeartbeatTracker::new();
        let epoch = tracker.start(Duration::from_millis(41_250));

        assert_eq!(tracker.tick(epoch), Pulse::Send);
        assert!(!tracker.last_ack_received());
        assert!(tracker.last_sent_at().is_some());

        assert_eq!(tracker.tick(epoch), Pulse::Stale);
        assert!(!tracker.is_running());
        // Stopped schedules stay quiet.
        assert_eq!(tracker.tick(epoch), Pulse::Ignore);
    }

    #[test]
    fn test_ack_keeps_schedule_alive() {
        let mut tracker = HeartbeatTracker::new();
        let epoch = tracker.start(Duration::from_secs(1));

        for _ in 0..5 {
            assert_eq!(tracker.tick(epoch), Pulse::Send);
            assert!(tracker.acknowledge().is_some());
            assert!(tracker.last_ack_received());
        }
    }

    #[test]
    fn test_unsolicited_ack_has_no_latency() {
        let mut tracker = HeartbeatTracker::new();
        tracker.start(Duration::from_secs(1));
        assert!(tracker.acknowledge().is_none());
    }

    #[test]
    fn test_restart_replaces_schedule() {
        let mut tracker = HeartbeatTracker::new();
        let first = tracker.start(Duration::from_secs(1));
        assert_eq!(tracker.tick(first), Pulse::Send);

        let second = tracker.start(Duration::from_secs(2));
        assert_ne!(first, second);
        assert_eq!(tracker.interval(), Some(Duration::from_secs(2)));
        assert_eq!(tracker.tick(first), Pulse::Ignore);
        assert_eq!(tracker.tick(second), Pulse::Send);
    }

    #[test]
    fn test_stop_when_not_started() {
        let mut tracker = HeartbeatTracker::new();
        tracker.stop();
        assert!(!tracker.is_running());
    }

    #[tokio::test]
    async fn test_heartbeat_task_sends_ticks() {
        let (tx, mut rx) = mpsc::channel::<Signal>(32);
        let handle = start_heartbeat_task(3, Duration::from_millis(10), tx);

        let signal = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout waiting for heartbeat")
            .expect("channel closed");
        assert_eq!(signal, Signal::HeartbeatDue { epoch: 3 });
        assert!(handle.is_running());

        handle.stop();
    }

    #[tokio::test]
    async fn test_heartbeat_task_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel::<Signal>(32);
        let handle = start_heartbeat_task(1, Duration::from_millis(5), tx);

        handle.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_heartbeat_task_stops_on_channel_close() {
        let (tx, rx) = mpsc::channel::<Signal>(1);
        let handle = start_heartbeat_task(1, Duration::from_millis(5), tx);

        drop(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!handle.is_running());
    }
}
