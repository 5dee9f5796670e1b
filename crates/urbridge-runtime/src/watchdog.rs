//! [`Watchdog`] – heartbeat tracking for long-running bridge tasks.
//!
//! The state monitor loop beats once per received snapshot.  `GET /health`
//! asks the watchdog whether the telemetry feed is fresh or has stalled,
//! which catches a loop that is alive but blocked on a silent controller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Component name the state monitor loop registers under.
pub const STATE_MONITOR: &str = "state_monitor";

/// Health state reported for a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    /// Heartbeat seen within the deadline.
    Healthy,
    /// Registered, but silent for longer than its deadline.
    Stale,
    /// Not registered (the component is not running).
    Inactive,
}

struct Entry {
    last_beat: Instant,
    deadline: Duration,
}

/// Tracks heartbeats from registered components.
///
/// ```
/// use std::time::Duration;
/// use urbridge_runtime::watchdog::{ComponentHealth, Watchdog};
///
/// let mut wd = Watchdog::new();
/// wd.register("state_monitor", Duration::from_secs(1));
/// wd.heartbeat("state_monitor");
/// assert_eq!(wd.health("state_monitor"), ComponentHealth::Healthy);
/// ```
#[derive(Default)]
pub struct Watchdog {
    components: HashMap<String, Entry>,
}

/// Watchdog shared between the monitor task and the health endpoint.
pub type SharedWatchdog = Arc<Mutex<Watchdog>>;

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedWatchdog {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register `component` with a heartbeat `deadline`.  The clock starts
    /// now; re-registering resets it.
    pub fn register(&mut self, component: &str, deadline: Duration) {
        self.components.insert(
            component.to_string(),
            Entry {
                last_beat: Instant::now(),
                deadline,
            },
        );
    }

    /// Forget `component`; its health becomes [`ComponentHealth::Inactive`].
    pub fn deregister(&mut self, component: &str) {
        self.components.remove(component);
    }

    /// No-op for unregistered components.
    pub fn heartbeat(&mut self, component: &str) {
        if let Some(entry) = self.components.get_mut(component) {
            entry.last_beat = Instant::now();
        }
    }

    pub fn health(&self, component: &str) -> ComponentHealth {
        match self.components.get(component) {
            None => ComponentHealth::Inactive,
            Some(entry) if entry.last_beat.elapsed() <= entry.deadline => ComponentHealth::Healthy,
            Some(_) => ComponentHealth::Stale,
        }
    }

    /// Time since `component` last beat, if registered.
    pub fn silence(&self, component: &str) -> Option<Duration> {
        self.components.get(component).map(|e| e.last_beat.elapsed())
    }
}
