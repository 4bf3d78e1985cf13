//! Cancellable travel watchdog.
//!
//! Arming spawns a timer thread that waits on a condvar until either the
//! deadline passes or the watchdog is disarmed. On expiry it delivers a
//! [`WatchdogAlarm`] over a channel; the drone checks for it at its own poll
//! points instead of sharing flags with the timer.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::types::{DroneId, EventId};

/// Delivered when a drone has not arrived before its deadline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchdogAlarm {
    pub drone: DroneId,
    pub event: Option<EventId>,
    pub overdue_after: Duration,
}

struct WatchState {
    cancelled: bool,
}

pub struct TravelWatchdog {
    state: Arc<(Mutex<WatchState>, Condvar)>,
    alarms: Receiver<WatchdogAlarm>,
    timer: Option<thread::JoinHandle<()>>,
}

impl TravelWatchdog {
    /// Start a watchdog that fires after `timeout` unless disarmed first.
    pub fn arm(drone: DroneId, event: Option<EventId>, timeout: Duration) -> Self {
        let state = Arc::new((Mutex::new(WatchState { cancelled: false }), Condvar::new()));
        let (tx, rx) = mpsc::channel();
        let timer_state = Arc::clone(&state);
        let timer = thread::Builder::new()
            .name(format!("watchdog-{drone}"))
            .spawn(move || wait_for_deadline(timer_state, tx, drone, event, timeout))
            .map_err(|err| warn!(drone, error = %err, "failed to spawn travel watchdog"))
            .ok();
        debug!(drone, ?event, ?timeout, "travel watchdog armed");
        Self {
            state,
            alarms: rx,
            timer,
        }
    }

    /// Block up to `max_wait` for the alarm.
    pub fn wait_alarm(&self, max_wait: Duration) -> Option<WatchdogAlarm> {
        self.alarms.recv_timeout(max_wait).ok()
    }

    /// Cancel the timer; a disarmed watchdog never delivers an alarm.
    pub fn disarm(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        let (lock, cvar) = &*self.state;
        if let Ok(mut guard) = lock.lock() {
            guard.cancelled = true;
        }
        cvar.notify_all();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

impl Drop for TravelWatchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn wait_for_deadline(
    state: Arc<(Mutex<WatchState>, Condvar)>,
    alarms: Sender<WatchdogAlarm>,
    drone: DroneId,
    event: Option<EventId>,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;
    let (lock, cvar) = &*state;
    let Ok(mut guard) = lock.lock() else {
        return;
    };
    loop {
        if guard.cancelled {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        // Wait releases the lock and re-acquires it before returning.
        guard = match cvar.wait_timeout(guard, remaining) {
            Ok((guard, _)) => guard,
            Err(_) => return,
        };
    }
    drop(guard);
    warn!(target: "telemetry", drone, ?event, "travel watchdog fired, drone did not arrive");
    let _ = alarms.send(WatchdogAlarm {
        drone,
        event,
        overdue_after: timeout,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_timeout() {
        let watchdog = TravelWatchdog::arm(7, Some(3), Duration::from_millis(10));
        let alarm = watchdog.wait_alarm(Duration::from_secs(1)).expect("alarm");
        assert_eq!(alarm.drone, 7);
        assert_eq!(alarm.event, Some(3));
        assert_eq!(alarm.overdue_after, Duration::from_millis(10));
    }

    #[test]
    fn disarm_prevents_alarm() {
        let watchdog = TravelWatchdog::arm(1, None, Duration::from_secs(5));
        assert!(watchdog.wait_alarm(Duration::ZERO).is_none());
        let start = Instant::now();
        watchdog.disarm();
        // Disarming wakes the timer instead of waiting out the deadline.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn alarm_is_delivered_once() {
        let watchdog = TravelWatchdog::arm(2, Some(9), Duration::ZERO);
        assert!(watchdog.wait_alarm(Duration::from_secs(1)).is_some());
        assert!(watchdog.wait_alarm(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn dropping_an_armed_watchdog_stops_the_timer() {
        let watchdog = TravelWatchdog::arm(3, None, Duration::from_secs(30));
        let start = Instant::now();
        drop(watchdog);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
