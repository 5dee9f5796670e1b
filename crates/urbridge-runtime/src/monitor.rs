//! State monitor: the background polling loop.
//!
//! [`run`] pulls one snapshot per controller cycle from the shared link,
//! hands it to a [`StateDiffer`], merges non-empty diffs into the
//! [`StateStore`] and broadcasts the resulting [`StateMessage`].  The loop
//! never retries: any failure ends it with a [`MonitorExit`] reason that the
//! lifecycle controller keeps for `/health`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use urbridge_hal::SharedLink;
use urbridge_middleware::SubscriberRegistry;
use urbridge_types::{BridgeError, FieldValue, RobotState, StateField, StateMap, StateMessage};

use crate::store::StateStore;
use crate::watchdog::{STATE_MONITOR, SharedWatchdog};

/// Registry type carrying state updates to WebSocket subscribers.
pub type StateRegistry = SubscriberRegistry<Arc<StateMessage>>;

// ────────────────────────────────────────────────────────────────────────────
// Diffing
// ────────────────────────────────────────────────────────────────────────────

/// Field-level change detector.
///
/// Remembers the last value seen for each monitored field; the first
/// observation of a field always counts as a change.
#[derive(Debug, Clone)]
pub struct StateDiffer {
    fields: Vec<StateField>,
    previous: HashMap<StateField, FieldValue>,
}

impl StateDiffer {
    pub fn new(fields: Vec<StateField>) -> Self {
        Self {
            fields,
            previous: HashMap::new(),
        }
    }

    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    /// Compare `state` with the previous snapshot and return the changed
    /// fields.  An empty map means nothing changed.
    ///
    /// Fails with [`BridgeError::FieldMissing`] when a monitored field is
    /// absent from `state`; the recorded previous values are left untouched
    /// in that case.
    pub fn diff(&mut self, state: &RobotState) -> Result<StateMap, BridgeError> {
        let current = self
            .fields
            .iter()
            .map(|&field| state.field(field).map(|v| (field, v)).ok_or(BridgeError::FieldMissing(field)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut changes = StateMap::new();
        for (field, value) in current {
            if self.previous.get(&field) == Some(&value) {
                continue;
            }
            self.previous.insert(field, value.clone());
            changes.insert(field, value);
        }
        Ok(changes)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop
// ────────────────────────────────────────────────────────────────────────────

/// Why a monitor loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorExit {
    /// Stopped through the cancellation signal.
    Cancelled,
    /// The controller stopped producing data or the link disconnected.
    ConnectionLost,
    /// A monitored field is not part of the link's output recipe.
    FieldMissing(StateField),
    LinkError(String),
}

impl fmt::Display for MonitorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorExit::Cancelled => f.write_str("cancelled"),
            MonitorExit::ConnectionLost => f.write_str("connection lost"),
            MonitorExit::FieldMissing(field) => write!(f, "field '{field}' missing from snapshot"),
            MonitorExit::LinkError(msg) => write!(f, "link error: {msg}"),
        }
    }
}

/// Shared sinks the loop writes into.
#[derive(Clone)]
pub struct MonitorSinks {
    pub store: StateStore,
    pub registry: Arc<StateRegistry>,
    pub watchdog: SharedWatchdog,
}

/// Run the monitor loop until cancelled or the link gives out.
///
/// `cancel` is checked before every cycle and raced against both the link
/// lock and the pending receive, so a stop is observed within one cycle even
/// when the controller has gone silent.
pub async fn run(
    link: SharedLink,
    fields: Vec<StateField>,
    sinks: MonitorSinks,
    mut cancel: watch::Receiver<bool>,
) -> MonitorExit {
    let mut differ = StateDiffer::new(fields);
    info!(fields = differ.fields().len(), "state monitor started");

    loop {
        if *cancel.borrow() {
            return MonitorExit::Cancelled;
        }

        let received = {
            let mut session = tokio::select! {
                biased;
                _ = cancel.changed() => return MonitorExit::Cancelled,
                session = link.lock() => session,
            };
            if !session.is_connected() {
                info!("controller link disconnected");
                return MonitorExit::ConnectionLost;
            }
            tokio::select! {
                biased;
                _ = cancel.changed() => return MonitorExit::Cancelled,
                received = session.next_state() => received,
            }
        };

        let state = match received {
            Ok(Some(state)) => state,
            Ok(None) | Err(BridgeError::ConnectionLost) => {
                info!("controller stopped sending data");
                return MonitorExit::ConnectionLost;
            }
            Err(e) => {
                error!(error = %e, "controller link failed");
                return MonitorExit::LinkError(e.to_string());
            }
        };

        if let Ok(mut wd) = sinks.watchdog.lock() {
            wd.heartbeat(STATE_MONITOR);
        }

        let changes = match differ.diff(&state) {
            Ok(changes) => changes,
            Err(BridgeError::FieldMissing(field)) => {
                error!(%field, "monitored field missing from controller snapshot");
                return MonitorExit::FieldMissing(field);
            }
            Err(e) => {
                error!(error = %e, "state diff failed");
                return MonitorExit::LinkError(e.to_string());
            }
        };
        if changes.is_empty() {
            continue;
        }

        let message = Arc::new(sinks.store.merge(changes));
        let report = sinks.registry.broadcast(&message);
        debug!(
            sequence = message.sequence,
            changed = message.changed.len(),
            delivered = report.delivered,
            "state update published"
        );
        if report.removed > 0 {
            warn!(removed = report.removed, "dropped unresponsive subscribers");
        }
    }
}
