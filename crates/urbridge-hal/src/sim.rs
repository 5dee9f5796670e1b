//! In-process controller simulation for running the bridge without a robot.
//!
//! [`SimConnector`] opens [`SimController`] links that produce one plausible
//! snapshot per cycle at the configured frequency: joints sweep slowly, the
//! pose follows them, an integer register counts seconds and the digital
//! output register reflects every masked write the bridge sends.  The output
//! register lives in the connector, so outputs survive a stop/start just as
//! they would on a real controller.
//!
//! # Example
//!
//! ```rust
//! use urbridge_hal::link::{LinkConfig, LinkConnector};
//! use urbridge_hal::sim::SimConnector;
//!
//! # tokio_test_block(async {
//! let connector = SimConnector::new();
//! let mut link = connector.connect(&LinkConfig::default()).await.unwrap();
//! let state = link.receive().await.unwrap().expect("sim always produces a snapshot");
//! assert_eq!(state.robot_mode, Some(7));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};
use urbridge_types::{BridgeError, OutputBank, RobotState, StateField};

use crate::link::{ControllerLink, LinkConfig, LinkConnector};
use crate::output::MaskedWrite;

/// `ROBOT_MODE_RUNNING` in the controller's robot-mode enumeration.
const ROBOT_MODE_RUNNING: i32 = 7;
/// `NORMAL` safety status.
const SAFETY_STATUS_NORMAL: i32 = 1;
/// Runtime state reported while a program is playing.
const RUNTIME_STATE_PLAYING: u32 = 2;

/// Joint configuration the simulated arm sweeps around.
const HOME_Q: [f64; 6] = [0.0, -1.5708, 1.5708, -1.5708, -1.5708, 0.0];
/// Amplitude of the sweep, radians.
const SWEEP_RAD: f64 = 0.25;
/// Sweep period, seconds.
const SWEEP_PERIOD_S: f64 = 20.0;

// ────────────────────────────────────────────────────────────────────────────
// SimConnector
// ────────────────────────────────────────────────────────────────────────────

/// Opens simulated controller links.
pub struct SimConnector {
    fields: Vec<StateField>,
    outputs: Arc<AtomicU64>,
    connections: AtomicUsize,
}

impl SimConnector {
    /// A simulated controller whose output recipe declares every field.
    pub fn new() -> Self {
        Self::with_recipe(StateField::ALL.to_vec())
    }

    /// A simulated controller that only emits `fields`.  Monitoring a field
    /// outside the recipe reproduces a misconfigured deployment.
    pub fn with_recipe(fields: Vec<StateField>) -> Self {
        Self {
            fields,
            outputs: Arc::new(AtomicU64::new(0)),
            connections: AtomicUsize::new(0),
        }
    }

    /// Current simulated digital output register.
    pub fn outputs(&self) -> u64 {
        self.outputs.load(Ordering::SeqCst)
    }

    /// Number of links opened so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Default for SimConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkConnector for SimConnector {
    async fn connect(&self, config: &LinkConfig) -> Result<Box<dyn ControllerLink>, BridgeError> {
        let period = cycle_period(config.frequency_hz)?;
        let n = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            host = %config.host,
            port = config.port,
            recipe = %config.recipe_file,
            frequency_hz = config.frequency_hz,
            connection = n,
            "simulated controller link opened"
        );
        Ok(Box::new(SimController::new(
            self.fields.clone(),
            Arc::clone(&self.outputs),
            period,
        )))
    }
}

/// Tick period for `frequency_hz`.  Rejects rates whose period is not a
/// positive, representable duration.
fn cycle_period(frequency_hz: f64) -> Result<Duration, BridgeError> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return Err(BridgeError::Config(format!(
            "frequency must be positive, got {frequency_hz}"
        )));
    }
    match Duration::try_from_secs_f64(1.0 / frequency_hz) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(BridgeError::Config(format!(
            "frequency of {frequency_hz} Hz has no usable cycle period"
        ))),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimController
// ────────────────────────────────────────────────────────────────────────────

/// One simulated controller connection.
pub struct SimController {
    fields: Vec<StateField>,
    outputs: Arc<AtomicU64>,
    ticker: Interval,
    started: Instant,
    connected: bool,
}

impl SimController {
    fn new(fields: Vec<StateField>, outputs: Arc<AtomicU64>, period: Duration) -> Self {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            fields,
            outputs,
            ticker,
            started: Instant::now(),
            connected: true,
        }
    }

    fn emits(&self, field: StateField) -> bool {
        self.fields.contains(&field)
    }

    fn snapshot(&self) -> RobotState {
        let t = self.started.elapsed().as_secs_f64();
        let phase = (t / SWEEP_PERIOD_S) * std::f64::consts::TAU;

        let mut q = HOME_Q;
        q[0] += SWEEP_RAD * phase.sin();
        q[5] += SWEEP_RAD * phase.cos();
        let reach = 0.4 + 0.05 * phase.sin();
        let pose = [reach * q[0].cos(), reach * q[0].sin(), 0.3, 0.0, 3.1416, q[5]];

        // Tool input 0 (bit 16) mirrors standard output 0 to give the
        // input register something to show.
        let outputs = self.outputs.load(Ordering::SeqCst);
        let inputs = (outputs & 0x1) << 16;

        RobotState {
            timestamp: t,
            actual_tcp_pose: self.emits(StateField::ActualTcpPose).then_some(pose),
            actual_q: self.emits(StateField::ActualQ).then_some(q),
            robot_mode: self.emits(StateField::RobotMode).then_some(ROBOT_MODE_RUNNING),
            runtime_state: self.emits(StateField::RuntimeState).then_some(RUNTIME_STATE_PLAYING),
            safety_status: self.emits(StateField::SafetyStatus).then_some(SAFETY_STATUS_NORMAL),
            output_int_register_0: self.emits(StateField::OutputIntRegister0).then_some(t as i32),
            actual_digital_input_bits: self.emits(StateField::DigitalInputBits).then_some(inputs),
            actual_digital_output_bits: self.emits(StateField::DigitalOutputBits).then_some(outputs),
        }
    }
}

/// Resolve an input recipe group back to the bank it writes.
fn bank_for_group(group: &str) -> Option<OutputBank> {
    [OutputBank::Standard, OutputBank::Configurable]
        .into_iter()
        .find(|bank| bank.group() == group)
}

#[async_trait]
impl ControllerLink for SimController {
    async fn receive(&mut self) -> Result<Option<RobotState>, BridgeError> {
        if !self.connected {
            return Ok(None);
        }
        self.ticker.tick().await;
        Ok(Some(self.snapshot()))
    }

    async fn send(&mut self, group: &str, fields: &[&str], values: &[u64]) -> Result<(), BridgeError> {
        if !self.connected {
            return Err(BridgeError::ConnectionLost);
        }
        let bank = bank_for_group(group)
            .ok_or_else(|| BridgeError::LinkError(format!("unknown input recipe '{group}'")))?;
        let expected = [bank.mask_field(), bank.value_field()];
        if fields != expected {
            return Err(BridgeError::LinkError(format!(
                "recipe '{group}' expects fields {expected:?}, got {fields:?}"
            )));
        }
        let (mask, value) = match values {
            [mask, value] => (
                u8::try_from(*mask).map_err(|_| BridgeError::LinkError(format!("mask {mask} exceeds 8 bits")))?,
                u8::try_from(*value).map_err(|_| BridgeError::LinkError(format!("value {value} exceeds 8 bits")))?,
            ),
            _ => {
                return Err(BridgeError::LinkError(format!(
                    "recipe '{group}' expects 2 values, got {}",
                    values.len()
                )));
            }
        };

        let write = MaskedWrite { bank, value, mask };
        let before = self
            .outputs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |reg| Some(write.apply(reg)))
            .unwrap_or_else(|reg| reg);
        debug!(
            group,
            before,
            after = write.apply(before),
            "simulated masked write"
        );
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BridgeError> {
        self.connected = false;
        info!("simulated controller link closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::encode;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            frequency_hz: 1000.0,
            ..LinkConfig::default()
        }
    }

    #[tokio::test]
    async fn sim_snapshot_carries_every_recipe_field() {
        let connector = SimConnector::new();
        let mut link = connector.connect(&fast_config()).await.unwrap();
        let state = link.receive().await.unwrap().unwrap();
        for field in StateField::ALL {
            assert!(state.field(field).is_some(), "{field} missing");
        }
        assert_eq!(state.safety_status, Some(SAFETY_STATUS_NORMAL));
    }

    #[tokio::test]
    async fn narrowed_recipe_omits_fields() {
        let connector = SimConnector::with_recipe(vec![StateField::RuntimeState]);
        let mut link = connector.connect(&fast_config()).await.unwrap();
        let state = link.receive().await.unwrap().unwrap();
        assert!(state.runtime_state.is_some());
        assert!(state.safety_status.is_none());
        assert!(state.actual_tcp_pose.is_none());
    }

    #[tokio::test]
    async fn masked_write_updates_output_register() {
        let connector = SimConnector::new();
        let mut link = connector.connect(&fast_config()).await.unwrap();

        let write = encode(0, 3, 1, OutputBank::Configurable).unwrap();
        let bank = OutputBank::Configurable;
        link.send(
            bank.group(),
            &[bank.mask_field(), bank.value_field()],
            &[write.mask.into(), write.value.into()],
        )
        .await
        .unwrap();

        assert_eq!(connector.outputs(), 1 << 11);
        let state = link.receive().await.unwrap().unwrap();
        assert_eq!(state.actual_digital_output_bits, Some(1 << 11));
    }

    #[tokio::test]
    async fn outputs_survive_reconnect() {
        let connector = SimConnector::new();
        let mut first = connector.connect(&fast_config()).await.unwrap();
        let bank = OutputBank::Standard;
        first
            .send(bank.group(), &[bank.mask_field(), bank.value_field()], &[0b1, 0b1])
            .await
            .unwrap();
        first.shutdown().await.unwrap();

        let mut second = connector.connect(&fast_config()).await.unwrap();
        let state = second.receive().await.unwrap().unwrap();
        assert_eq!(state.actual_digital_output_bits, Some(1));
        assert_eq!(connector.connections(), 2);
    }

    #[tokio::test]
    async fn unknown_recipe_group_is_rejected() {
        let connector = SimConnector::new();
        let mut link = connector.connect(&fast_config()).await.unwrap();
        let result = link.send("tool_outputs", &["mask", "value"], &[1, 1]).await;
        assert!(matches!(result, Err(BridgeError::LinkError(_))));
        assert_eq!(connector.outputs(), 0);
    }

    #[tokio::test]
    async fn shut_down_link_yields_none() {
        let connector = SimConnector::new();
        let mut link = connector.connect(&fast_config()).await.unwrap();
        link.shutdown().await.unwrap();
        assert!(!link.is_connected());
        assert!(link.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_frequency_is_a_config_error() {
        let connector = SimConnector::new();
        let cfg = LinkConfig {
            frequency_hz: 0.0,
            ..LinkConfig::default()
        };
        assert!(matches!(connector.connect(&cfg).await, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn frequency_too_high_for_a_tick_is_a_config_error() {
        let connector = SimConnector::new();
        for frequency_hz in [1e10, f64::MAX, f64::INFINITY] {
            let cfg = LinkConfig {
                frequency_hz,
                ..LinkConfig::default()
            };
            assert!(
                matches!(connector.connect(&cfg).await, Err(BridgeError::Config(_))),
                "{frequency_hz}"
            );
        }
        assert_eq!(connector.connections(), 0);
    }

    #[test]
    fn cycle_period_matches_frequency() {
        assert_eq!(cycle_period(500.0).unwrap(), Duration::from_millis(2));
        assert_eq!(cycle_period(125.0).unwrap(), Duration::from_millis(8));
        assert!(cycle_period(-1.0).is_err());
        assert!(cycle_period(f64::NAN).is_err());
    }
}
