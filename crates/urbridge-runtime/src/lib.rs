//! `urbridge-runtime` – the moving parts between the controller link and the
//! outside world.
//!
//! # Modules
//!
//! - [`monitor`] – the state monitor loop and its synchronous
//!   [`StateDiffer`][monitor::StateDiffer].
//! - [`store`] – [`StateStore`][store::StateStore], the last-known state
//!   served by `/state` and pushed to new subscribers.
//! - [`lifecycle`] – [`LifecycleController`][lifecycle::LifecycleController]:
//!   one link and one loop at a time, started and stopped on request.
//! - [`command`] – masked read-modify-write of a single digital output.
//! - [`watchdog`] – heartbeat tracking behind the telemetry staleness flag.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: log
//!   formatting and optional OTLP span export.

pub mod command;
pub mod lifecycle;
pub mod monitor;
pub mod store;
pub mod telemetry;
pub mod watchdog;

pub use command::set_digital_output;
pub use lifecycle::{
    HealthReport, LifecycleController, LifecyclePhase, MonitorConfig, StartOutcome, StopOutcome,
};
pub use monitor::{MonitorExit, StateDiffer, StateRegistry};
pub use store::StateStore;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use watchdog::ComponentHealth;
