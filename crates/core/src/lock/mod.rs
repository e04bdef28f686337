//! Node reservations and conductor-to-node mapping.

pub mod manager;
pub mod ring;

pub use manager::{LockManager, NodeReservation, ReconcileReport, RESTART_ERROR};
pub use ring::{HashRing, RingRefresher};
