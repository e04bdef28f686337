//! Step collection, ordering and built-in step resolution.

pub mod action;
pub mod collector;
pub mod scheduler;

pub use action::{is_reserved_name, StepAction};
pub use collector::{StepCollector, StepSource};
pub use scheduler::{interface_order, order_explicit, schedule};
