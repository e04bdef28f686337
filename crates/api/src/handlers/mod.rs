//! Route handlers, one module per resource.

pub mod heartbeat;
pub mod nodes;
pub mod runbooks;
