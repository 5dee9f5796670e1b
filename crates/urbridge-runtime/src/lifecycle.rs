//! [`LifecycleController`] – starts and stops the controller link and the
//! state monitor loop, exactly one instance at a time.
//!
//! Transitions are serialized by an async mutex around the active
//! [`MonitorHandle`], so two concurrent `start` calls can never race into
//! two loops and `stop` always observes the handle `start` stored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use urbridge_hal::{LinkConfig, LinkConnector, LinkSession, SharedLink};
use urbridge_middleware::DEFAULT_QUEUE_CAPACITY;
use urbridge_types::{BridgeError, StateField};

use crate::monitor::{self, MonitorExit, MonitorSinks, StateRegistry};
use crate::store::StateStore;
use crate::watchdog::{ComponentHealth, STATE_MONITOR, SharedWatchdog, Watchdog};

// ────────────────────────────────────────────────────────────────────────────
// Configuration & outcomes
// ────────────────────────────────────────────────────────────────────────────

/// Runtime settings for the monitor and the command path.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub link: LinkConfig,
    /// Fields diffed and published by the monitor.
    pub fields: Vec<StateField>,
    /// Per-subscriber queue depth.
    pub subscriber_queue: usize,
    /// Upper bound on one digital output command, lock wait included.
    pub command_timeout: Duration,
    /// Telemetry silence after which `/health` reports the feed as stale.
    pub stale_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            fields: StateField::ALL.to_vec(),
            subscriber_queue: DEFAULT_QUEUE_CAPACITY,
            command_timeout: Duration::from_secs(2),
            stale_after: Duration::from_secs(2),
        }
    }
}

/// `Running` only while the monitor task is alive.  A loop that ended by
/// itself reads as `Idle`; its handle is reaped by the next `start` or `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(MonitorExit),
    NotRunning,
}

/// Snapshot served by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub phase: LifecyclePhase,
    /// Whether the monitor task is still running.
    pub loop_alive: bool,
    /// Why the most recent loop ended, if one has.
    pub last_exit: Option<String>,
    pub telemetry: ComponentHealth,
    pub subscribers: usize,
    pub sequence: u64,
    pub last_update: Option<DateTime<Utc>>,
    pub monitored_fields: Vec<StateField>,
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

/// One running loop instance.
struct MonitorHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<MonitorExit>,
    link: SharedLink,
}

pub struct LifecycleController {
    connector: Arc<dyn LinkConnector>,
    config: MonitorConfig,
    store: StateStore,
    registry: Arc<StateRegistry>,
    watchdog: SharedWatchdog,
    active: tokio::sync::Mutex<Option<MonitorHandle>>,
    phase: watch::Sender<LifecyclePhase>,
    loop_alive: Arc<AtomicBool>,
    last_exit: Arc<Mutex<Option<MonitorExit>>>,
}

impl LifecycleController {
    pub fn new(connector: Arc<dyn LinkConnector>, config: MonitorConfig) -> Self {
        let registry = Arc::new(StateRegistry::new(config.subscriber_queue));
        Self {
            connector,
            config,
            store: StateStore::new(),
            registry,
            watchdog: Watchdog::shared(),
            active: tokio::sync::Mutex::new(None),
            phase: watch::Sender::new(LifecyclePhase::Idle),
            loop_alive: Arc::new(AtomicBool::new(false)),
            last_exit: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<StateRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn phase(&self) -> LifecyclePhase {
        match *self.phase.borrow() {
            LifecyclePhase::Running if !self.loop_alive.load(Ordering::SeqCst) => LifecyclePhase::Idle,
            phase => phase,
        }
    }

    /// Open a link and spawn the monitor loop.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] while a loop is active.  A
    /// loop that ended on its own is reaped first so its link is closed.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error; the controller stays idle.
    pub async fn start(&self) -> Result<StartOutcome, BridgeError> {
        let mut active = self.active.lock().await;

        if let Some(handle) = active.as_ref() {
            if !handle.task.is_finished() {
                info!("monitoring already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
        }
        if let Some(stale) = active.take() {
            let exit = self.reap(stale).await;
            info!(%exit, "reaped finished monitor loop");
        }

        let link_cfg = &self.config.link;
        info!(host = %link_cfg.host, port = link_cfg.port, "connecting to controller");
        let link = match self.connector.connect(link_cfg).await {
            Ok(link) => LinkSession::shared(link),
            Err(e) => {
                error!(error = %e, "controller connection failed");
                self.phase.send_replace(LifecyclePhase::Idle);
                return Err(e);
            }
        };

        if let Ok(mut wd) = self.watchdog.lock() {
            wd.register(STATE_MONITOR, self.config.stale_after);
        }
        let (cancel, cancel_rx) = watch::channel(false);
        let sinks = MonitorSinks {
            store: self.store.clone(),
            registry: Arc::clone(&self.registry),
            watchdog: Arc::clone(&self.watchdog),
        };
        let loop_alive = Arc::clone(&self.loop_alive);
        let last_exit = Arc::clone(&self.last_exit);
        let fields = self.config.fields.clone();
        let loop_link = Arc::clone(&link);

        loop_alive.store(true, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let exit = monitor::run(loop_link, fields, sinks, cancel_rx).await;
            info!(%exit, "state monitor finished");
            if let Ok(mut slot) = last_exit.lock() {
                *slot = Some(exit.clone());
            }
            loop_alive.store(false, Ordering::SeqCst);
            exit
        });

        *active = Some(MonitorHandle { cancel, task, link });
        self.phase.send_replace(LifecyclePhase::Running);
        info!("monitoring started");
        Ok(StartOutcome::Started)
    }

    /// Cancel the loop, wait for it, and close the link.
    ///
    /// A no-op returning [`StopOutcome::NotRunning`] when idle.
    pub async fn stop(&self) -> StopOutcome {
        let mut active = self.active.lock().await;
        let Some(handle) = active.take() else {
            info!("stop requested while idle");
            return StopOutcome::NotRunning;
        };

        self.phase.send_replace(LifecyclePhase::Stopping);
        let exit = self.reap(handle).await;
        self.phase.send_replace(LifecyclePhase::Idle);
        info!(%exit, "monitoring stopped");
        StopOutcome::Stopped(exit)
    }

    async fn reap(&self, handle: MonitorHandle) -> MonitorExit {
        // The receiver may already be gone if the loop ended by itself.
        let _ = handle.cancel.send(true);
        let exit = match handle.task.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "monitor task aborted");
                self.loop_alive.store(false, Ordering::SeqCst);
                MonitorExit::LinkError(format!("monitor task aborted: {e}"))
            }
        };
        if let Err(e) = handle.link.lock().await.shutdown().await {
            warn!(error = %e, "controller link shutdown failed");
        }
        if let Ok(mut wd) = self.watchdog.lock() {
            wd.deregister(STATE_MONITOR);
        }
        exit
    }

    /// The link session of the running loop, for the command path.  `None`
    /// when idle or when the loop has already ended.
    pub async fn active_link(&self) -> Option<SharedLink> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|h| !h.task.is_finished())
            .map(|h| Arc::clone(&h.link))
    }

    pub fn health(&self) -> HealthReport {
        let telemetry = self
            .watchdog
            .lock()
            .map(|wd| wd.health(STATE_MONITOR))
            .unwrap_or(ComponentHealth::Inactive);
        let last_exit = self
            .last_exit
            .lock()
            .ok()
            .and_then(|e| e.as_ref().map(ToString::to_string));
        HealthReport {
            phase: self.phase(),
            loop_alive: self.loop_alive.load(Ordering::SeqCst),
            last_exit,
            telemetry,
            subscribers: self.registry.len(),
            sequence: self.store.sequence(),
            last_update: self.store.updated_at(),
            monitored_fields: self.config.fields.clone(),
        }
    }
}
