//! Reactive layer — status notifications from the coordinator to fields.
//!
//! - [`event`] — [`StatusEvent`].
//! - [`status_bus`] — per-key pub/sub ([`StatusBus`]).

pub mod event;
pub mod status_bus;

pub use event::StatusEvent;
pub use status_bus::{ListenerId, StatusBus};
