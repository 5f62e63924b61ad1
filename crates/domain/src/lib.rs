//! Domain-level building blocks for the counter service: configuration,
//! the store traits, per-client rate limiting and telemetry bootstrap.
//!
//! Nothing in here talks to Redis directly; `counter_storage` provides the
//! adapters and `counter_api` wires everything into the HTTP surface.

pub mod clock;
pub mod config;
pub mod credentials;
pub mod model;
pub mod rate_limit;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use model::*;
pub use storage::*;
