//! Field bindings used by application code.
//!
//! - [`controller`] — one debounced, synced string field.
//! - [`array`] — a JSON list of items on top of a controller.
//! - [`group`] — several fields of one user managed together.

pub mod array;
pub mod controller;
pub mod group;

pub use array::ArrayField;
pub use controller::{FieldController, FieldPhase, RefreshOutcome};
pub use group::{FieldGroup, FieldSpec};
