//! `urbridge-cockpit` – the bridge's network front end.
//!
//! One port serves both:
//!
//! - HTTP control and query endpoints: `POST /start`, `POST /stop`,
//!   `GET /state`, `GET /health`, `POST /set-digital-output` (JSON in and
//!   out, permissive CORS for browser front ends).
//! - `WS /ws`: the current state on connect, then one JSON state message per
//!   change published by the state monitor.

mod http;
pub mod server;

pub use server::{CockpitServer, DEFAULT_PORT, DEFAULT_SEND_TIMEOUT};
