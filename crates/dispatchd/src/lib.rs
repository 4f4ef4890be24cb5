//! Dispatch daemon crate: storage, state machine, claiming and fan-out.

pub mod bootstrap;
pub mod claim;
pub mod event_bus;
pub mod persistence;
pub mod service;
pub mod state_machine;
pub mod telemetry;

pub use bootstrap::*;
pub use claim::*;
pub use event_bus::*;
pub use persistence::*;
pub use service::*;
pub use state_machine::*;
pub use telemetry::*;
