//! Deterministic, in-memory [`ControllerLink`] that replays a fixed script of
//! snapshots.  Used by tests across the workspace to drive the monitor loop
//! and the lifecycle controller without timing-dependent simulation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use urbridge_types::{BridgeError, RobotState};

use crate::link::{ControllerLink, LinkConfig, LinkConnector};

/// One scripted `receive` outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    State(RobotState),
    /// `receive` returns `Ok(None)` and the link reports disconnected.
    Disconnect,
    /// `receive` fails with [`BridgeError::LinkError`].
    Fail(String),
}

/// What the link does once the script is exhausted.
#[derive(Debug, Clone, Copy)]
pub enum AfterScript {
    Disconnect,
    /// Yield the last scripted snapshot again every period, like a live
    /// controller whose state has settled.
    RepeatLast(Duration),
    /// Block forever in `receive`.
    Hang,
}

/// A write recorded by a [`ScriptedLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub group: String,
    pub fields: Vec<String>,
    pub values: Vec<u64>,
}

#[derive(Default)]
struct ProbeInner {
    sent: Mutex<Vec<SentCommand>>,
    connects: AtomicUsize,
    shutdowns: AtomicUsize,
    receives: AtomicUsize,
}

/// Observation handle shared with every link a script produces.
#[derive(Clone, Default)]
pub struct ScriptProbe(Arc<ProbeInner>);

impl ScriptProbe {
    pub fn sent(&self) -> Vec<SentCommand> {
        self.0.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn connects(&self) -> usize {
        self.0.connects.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.0.shutdowns.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> usize {
        self.0.receives.load(Ordering::SeqCst)
    }
}

pub struct ScriptedLink {
    steps: VecDeque<ScriptStep>,
    after: AfterScript,
    last: Option<RobotState>,
    connected: bool,
    probe: ScriptProbe,
}

impl ScriptedLink {
    /// Replay `states`, then report disconnected.
    pub fn new(states: Vec<RobotState>) -> (Self, ScriptProbe) {
        Self::from_steps(
            states.into_iter().map(ScriptStep::State).collect(),
            AfterScript::Disconnect,
        )
    }

    pub fn from_steps(steps: Vec<ScriptStep>, after: AfterScript) -> (Self, ScriptProbe) {
        let probe = ScriptProbe::default();
        (Self::with_probe(steps, after, probe.clone()), probe)
    }

    fn with_probe(steps: Vec<ScriptStep>, after: AfterScript, probe: ScriptProbe) -> Self {
        Self {
            steps: steps.into(),
            after,
            last: None,
            connected: true,
            probe,
        }
    }
}

#[async_trait]
impl ControllerLink for ScriptedLink {
    async fn receive(&mut self) -> Result<Option<RobotState>, BridgeError> {
        if !self.connected {
            return Ok(None);
        }
        self.probe.0.receives.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(ScriptStep::State(state)) => {
                self.last = Some(state.clone());
                Ok(Some(state))
            }
            Some(ScriptStep::Disconnect) => {
                self.connected = false;
                Ok(None)
            }
            Some(ScriptStep::Fail(msg)) => Err(BridgeError::LinkError(msg)),
            None => match (self.after, &self.last) {
                (AfterScript::RepeatLast(period), Some(last)) => {
                    let last = last.clone();
                    tokio::time::sleep(period).await;
                    Ok(Some(last))
                }
                (AfterScript::Hang, _) => std::future::pending::<Result<Option<RobotState>, BridgeError>>().await,
                _ => {
                    self.connected = false;
                    Ok(None)
                }
            },
        }
    }

    async fn send(&mut self, group: &str, fields: &[&str], values: &[u64]) -> Result<(), BridgeError> {
        if !self.connected {
            return Err(BridgeError::ConnectionLost);
        }
        let cmd = SentCommand {
            group: group.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            values: values.to_vec(),
        };
        if let Ok(mut sent) = self.probe.0.sent.lock() {
            sent.push(cmd);
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BridgeError> {
        self.connected = false;
        self.probe.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Hands out a fresh [`ScriptedLink`] with the same script on every
/// `connect`.  All links share one [`ScriptProbe`].
pub struct ScriptedConnector {
    steps: Vec<ScriptStep>,
    after: AfterScript,
    refuse: bool,
    probe: ScriptProbe,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<ScriptStep>, after: AfterScript) -> (Self, ScriptProbe) {
        let probe = ScriptProbe::default();
        let connector = Self {
            steps,
            after,
            refuse: false,
            probe: probe.clone(),
        };
        (connector, probe)
    }

    /// A connector whose every `connect` fails.
    pub fn refusing() -> (Self, ScriptProbe) {
        let (mut connector, probe) = Self::new(Vec::new(), AfterScript::Disconnect);
        connector.refuse = true;
        (connector, probe)
    }
}

#[async_trait]
impl LinkConnector for ScriptedConnector {
    async fn connect(&self, config: &LinkConfig) -> Result<Box<dyn ControllerLink>, BridgeError> {
        if self.refuse {
            return Err(BridgeError::LinkError(format!(
                "connection refused by {}:{}",
                config.host, config.port
            )));
        }
        self.probe.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedLink::with_probe(
            self.steps.clone(),
            self.after,
            self.probe.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(ts: f64) -> RobotState {
        RobotState {
            timestamp: ts,
            ..RobotState::default()
        }
    }

    #[tokio::test]
    async fn replays_then_disconnects() {
        let (mut link, probe) = ScriptedLink::new(vec![state(1.0)]);
        assert!(link.receive().await.unwrap().is_some());
        assert!(link.receive().await.unwrap().is_none());
        assert!(!link.is_connected());
        assert_eq!(probe.receives(), 2);
    }

    #[tokio::test]
    async fn fail_step_surfaces_link_error() {
        let (mut link, _) = ScriptedLink::from_steps(
            vec![ScriptStep::Fail("checksum".into())],
            AfterScript::Disconnect,
        );
        assert!(matches!(link.receive().await, Err(BridgeError::LinkError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_last_yields_settled_state() {
        let (mut link, _) = ScriptedLink::from_steps(
            vec![ScriptStep::State(state(7.0))],
            AfterScript::RepeatLast(Duration::from_millis(5)),
        );
        link.receive().await.unwrap();
        let again = link.receive().await.unwrap().unwrap();
        assert_eq!(again.timestamp, 7.0);
    }

    #[tokio::test]
    async fn connector_counts_connections() {
        let (connector, probe) = ScriptedConnector::new(vec![], AfterScript::Disconnect);
        let cfg = LinkConfig::default();
        connector.connect(&cfg).await.unwrap();
        connector.connect(&cfg).await.unwrap();
        assert_eq!(probe.connects(), 2);
    }

    #[tokio::test]
    async fn refusing_connector_errors() {
        let (connector, probe) = ScriptedConnector::refusing();
        let result = connector.connect(&LinkConfig::default()).await;
        assert!(matches!(result, Err(BridgeError::LinkError(_))));
        assert_eq!(probe.connects(), 0);
    }

    #[tokio::test]
    async fn send_after_shutdown_fails() {
        let (mut link, probe) = ScriptedLink::new(vec![]);
        link.shutdown().await.unwrap();
        let result = link.send("standard_outputs", &["x"], &[1]).await;
        assert!(matches!(result, Err(BridgeError::ConnectionLost)));
        assert_eq!(probe.shutdowns(), 1);
    }
}
