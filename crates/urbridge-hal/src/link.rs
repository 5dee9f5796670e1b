//! The Controller Link contract and the serialized session wrapped around it.
//!
//! A [`ControllerLink`] is the synchronous request/response channel to the
//! controller's real-time interface.  It is *not* safe to drive from two call
//! sites at once, so the rest of the bridge only ever touches it through a
//! [`SharedLink`]: a [`LinkSession`] behind an async mutex.  The state monitor
//! takes the lock once per cycle; the command path holds it for the whole
//! read → encode → write sequence.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use urbridge_types::{BridgeError, RobotState};

/// Snapshots read by the command path that the monitor has not seen yet.
/// Bounded so a stalled monitor cannot grow it without limit.
const REPLAY_CAPACITY: usize = 64;

/// Connection parameters handed to a [`LinkConnector`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Controller hostname or IP address.
    pub host: String,
    /// Real-time interface port (RTDE listens on 30004).
    pub port: u16,
    /// Recipe file declaring which fields the controller emits.
    pub recipe_file: String,
    /// Requested output frequency in Hz.
    pub frequency_hz: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "urcontrol-rtde".to_string(),
            port: 30004,
            recipe_file: "rtdeIO.xml".to_string(),
            frequency_hz: 10.0,
        }
    }
}

/// One open connection to a controller.
#[async_trait]
pub trait ControllerLink: Send {
    /// Wait for the next cycle's snapshot.
    ///
    /// Returns `Ok(None)` when the controller has stopped producing data
    /// (disconnect, end of stream).
    async fn receive(&mut self) -> Result<Option<RobotState>, BridgeError>;

    /// Write `values` to the input recipe `group`, one value per entry of
    /// `fields`.
    async fn send(&mut self, group: &str, fields: &[&str], values: &[u64]) -> Result<(), BridgeError>;

    /// Pause synchronisation and close the connection.
    async fn shutdown(&mut self) -> Result<(), BridgeError>;

    fn is_connected(&self) -> bool;
}

/// Opens [`ControllerLink`]s.  The lifecycle controller calls
/// [`connect`][Self::connect] once per `start`.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn connect(&self, config: &LinkConfig) -> Result<Box<dyn ControllerLink>, BridgeError>;
}

/// A [`LinkSession`] shared between the monitor loop and command handlers.
pub type SharedLink = Arc<Mutex<LinkSession>>;

/// Single-owner wrapper around a [`ControllerLink`].
///
/// Snapshots pulled by [`read_fresh`][Self::read_fresh] are queued and handed
/// to the next [`next_state`][Self::next_state] call so the monitor observes
/// every cycle the controller produced, in order.
pub struct LinkSession {
    link: Box<dyn ControllerLink>,
    replay: VecDeque<RobotState>,
}

impl LinkSession {
    pub fn new(link: Box<dyn ControllerLink>) -> Self {
        Self {
            link,
            replay: VecDeque::new(),
        }
    }

    /// Wrap `link` in a fresh [`SharedLink`].
    pub fn shared(link: Box<dyn ControllerLink>) -> SharedLink {
        Arc::new(Mutex::new(Self::new(link)))
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Next snapshot for the state monitor.  Queued snapshots come first.
    ///
    /// Cancel-safe as long as the underlying link's `receive` is.
    pub async fn next_state(&mut self) -> Result<Option<RobotState>, BridgeError> {
        if let Some(state) = self.replay.pop_front() {
            return Ok(Some(state));
        }
        self.link.receive().await
    }

    /// Pull a fresh snapshot for a command and queue a copy for the monitor.
    pub async fn read_fresh(&mut self) -> Result<Option<RobotState>, BridgeError> {
        let state = self.link.receive().await?;
        if let Some(ref s) = state {
            if self.replay.len() == REPLAY_CAPACITY {
                warn!("link replay queue full; dropping oldest snapshot");
                self.replay.pop_front();
            }
            self.replay.push_back(s.clone());
        }
        Ok(state)
    }

    pub async fn send(&mut self, group: &str, fields: &[&str], values: &[u64]) -> Result<(), BridgeError> {
        if fields.len() != values.len() {
            return Err(BridgeError::InvalidCommand(format!(
                "{} field(s) but {} value(s) for group '{group}'",
                fields.len(),
                values.len()
            )));
        }
        debug!(group, ?fields, ?values, "link send");
        self.link.send(group, fields, values).await
    }

    pub async fn shutdown(&mut self) -> Result<(), BridgeError> {
        self.replay.clear();
        self.link.shutdown().await
    }

    /// Number of snapshots waiting to be replayed to the monitor.
    pub fn pending(&self) -> usize {
        self.replay.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedLink;

    fn state(ts: f64) -> RobotState {
        RobotState {
            timestamp: ts,
            safety_status: Some(1),
            ..RobotState::default()
        }
    }

    #[tokio::test]
    async fn read_fresh_snapshot_is_replayed_to_monitor() {
        let (link, _probe) = ScriptedLink::new(vec![state(1.0), state(2.0), state(3.0)]);
        let mut session = LinkSession::new(Box::new(link));

        assert_eq!(session.next_state().await.unwrap().unwrap().timestamp, 1.0);
        assert_eq!(session.read_fresh().await.unwrap().unwrap().timestamp, 2.0);
        assert_eq!(session.pending(), 1);

        // The monitor sees the snapshot the command consumed, then carries on.
        assert_eq!(session.next_state().await.unwrap().unwrap().timestamp, 2.0);
        assert_eq!(session.next_state().await.unwrap().unwrap().timestamp, 3.0);
        assert!(session.next_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_rejects_mismatched_lengths() {
        let (link, probe) = ScriptedLink::new(vec![]);
        let mut session = LinkSession::new(Box::new(link));
        let result = session.send("standard_outputs", &["a", "b"], &[1]).await;
        assert!(matches!(result, Err(BridgeError::InvalidCommand(_))));
        assert!(probe.sent().is_empty());
    }

    #[tokio::test]
    async fn shutdown_clears_replay_and_closes_link() {
        let (link, probe) = ScriptedLink::new(vec![state(1.0), state(2.0)]);
        let mut session = LinkSession::new(Box::new(link));
        session.read_fresh().await.unwrap();
        session.shutdown().await.unwrap();
        assert_eq!(session.pending(), 0);
        assert!(!session.is_connected());
        assert_eq!(probe.shutdowns(), 1);
    }

    #[test]
    fn default_link_config_targets_rtde_port() {
        let cfg = LinkConfig::default();
        assert_eq!(cfg.port, 30004);
        assert_eq!(cfg.recipe_file, "rtdeIO.xml");
    }
}
