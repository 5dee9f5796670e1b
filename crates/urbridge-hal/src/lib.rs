//! `urbridge-hal` – the controller side of the bridge.
//!
//! - [`link`] – the [`ControllerLink`] / [`LinkConnector`] contract and the
//!   serialized [`LinkSession`] every other component goes through.
//! - [`output`] – masked digital output encoder.
//! - [`sim`] – simulated controller for running without a robot.
//! - [`scripted`] – deterministic replay link for tests.

pub mod link;
pub mod output;
pub mod scripted;
pub mod sim;

pub use link::{ControllerLink, LinkConfig, LinkConnector, LinkSession, SharedLink};
pub use output::{MaskedWrite, encode};
pub use sim::SimConnector;
