//! Provisioning state transition table.
//!
//! The table is a closed `match` over `(state, event)`. Anything not listed
//! is an invalid transition.

use crate::error::{ConductorError, ConductorResult};
use mk_protocol::ProvisionState;
use mk_protocol::ProvisionState::*;
use std::fmt;

/// Events that drive the provisioning state machine.
///
/// The first group are operator verbs; the rest are raised by the conductor
/// while work is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionEvent {
    Manage,
    Provide,
    Clean,
    Deploy,
    Rebuild,
    Delete,
    Rescue,
    Unrescue,
    Adopt,
    Service,
    Abort,
    Unhold,

    /// A `hold` step was reached.
    Hold,
    /// A heartbeat resumed work after a wait.
    Resume,
    /// An asynchronous step was started.
    Wait,
    Done,
    Fail,
}

impl ProvisionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionEvent::Manage => "manage",
            ProvisionEvent::Provide => "provide",
            ProvisionEvent::Clean => "clean",
            ProvisionEvent::Deploy => "deploy",
            ProvisionEvent::Rebuild => "rebuild",
            ProvisionEvent::Delete => "delete",
            ProvisionEvent::Rescue => "rescue",
            ProvisionEvent::Unrescue => "unrescue",
            ProvisionEvent::Adopt => "adopt",
            ProvisionEvent::Service => "service",
            ProvisionEvent::Abort => "abort",
            ProvisionEvent::Unhold => "unhold",
            ProvisionEvent::Hold => "hold",
            ProvisionEvent::Resume => "resume",
            ProvisionEvent::Wait => "wait",
            ProvisionEvent::Done => "done",
            ProvisionEvent::Fail => "fail",
        }
    }
}

impl fmt::Display for ProvisionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the next state for `event` in `current`.
///
/// `target` is the node's target provision state. It only matters when
/// cleaning finishes: manual cleaning returns to `manageable`, automated
/// cleaning ends in `available`.
///
/// # Errors
///
/// Returns `ConductorError::InvalidState` when the transition is not in the
/// table. `node` is only used for the error message.
pub fn next_state(
    node: &str,
    current: ProvisionState,
    event: ProvisionEvent,
    target: Option<ProvisionState>,
) -> ConductorResult<ProvisionState> {
    use ProvisionEvent as E;

    let next = match (current, event) {
        (Enroll, E::Manage) => Verifying,
        (Verifying, E::Done) => Manageable,
        (Verifying, E::Fail) => Enroll,

        (Manageable, E::Provide) => Cleaning,
        (Manageable, E::Clean) => Cleaning,
        (Manageable, E::Adopt) => Adopting,

        (Cleaning, E::Done) => {
            if target == Some(Manageable) {
                Manageable
            } else {
                Available
            }
        }
        (Cleaning, E::Fail) => CleanFailed,
        (Cleaning, E::Wait) => CleanWait,
        (Cleaning, E::Hold) => CleanHold,
        (CleanWait, E::Resume) => Cleaning,
        (CleanWait, E::Fail | E::Abort) => CleanFailed,
        (CleanWait, E::Hold) => CleanHold,
        (CleanHold, E::Unhold) => CleanWait,
        (CleanFailed, E::Manage) => Manageable,

        (Available, E::Deploy) => Deploying,
        (Available, E::Manage) => Manageable,

        (Deploying, E::Done) => Active,
        (Deploying, E::Fail) => DeployFailed,
        (Deploying, E::Wait) => DeployWait,
        (Deploying, E::Hold) => DeployHold,
        (DeployWait, E::Resume) => Deploying,
        (DeployWait, E::Fail | E::Abort) => DeployFailed,
        (DeployWait, E::Hold) => DeployHold,
        (DeployHold, E::Unhold) => DeployWait,
        (DeployFailed, E::Deploy | E::Rebuild) => Deploying,
        (DeployFailed, E::Delete) => Deleting,

        (Active, E::Delete) => Deleting,
        (Active, E::Rebuild) => Deploying,
        (Active, E::Rescue) => Rescuing,
        (Active, E::Service) => Servicing,

        (Deleting, E::Clean) => Cleaning,
        (Deleting, E::Fail) => Error,
        (Error, E::Delete) => Deleting,
        (Error, E::Rebuild) => Deploying,

        (Adopting, E::Done) => Active,
        (Adopting, E::Fail) => AdoptFailed,
        (AdoptFailed, E::Adopt) => Adopting,
        (AdoptFailed, E::Manage) => Manageable,

        (Rescuing, E::Done) => Rescue,
        (Rescuing, E::Fail) => RescueFailed,
        (Rescuing, E::Wait) => RescueWait,
        (RescueWait, E::Done) => Rescue,
        (RescueWait, E::Fail | E::Abort) => RescueFailed,
        (Rescue, E::Unrescue) => Unrescuing,
        (Rescue, E::Rescue) => Rescuing,
        (RescueFailed, E::Rescue) => Rescuing,
        (RescueFailed, E::Unrescue) => Unrescuing,
        (Unrescuing, E::Done) => Active,
        (Unrescuing, E::Fail) => UnrescueFailed,
        (UnrescueFailed, E::Unrescue) => Unrescuing,
        (UnrescueFailed, E::Rescue) => Rescuing,

        (Servicing, E::Done) => Active,
        (Servicing, E::Fail) => ServiceFailed,
        (Servicing, E::Wait) => ServiceWait,
        (Servicing, E::Hold) => ServiceHold,
        (ServiceWait, E::Resume) => Servicing,
        (ServiceWait, E::Fail | E::Abort) => ServiceFailed,
        (ServiceWait, E::Hold) => ServiceHold,
        (ServiceHold, E::Unhold) => ServiceWait,
        (ServiceFailed, E::Service) => Servicing,
        (ServiceFailed, E::Abort) => Active,

        _ => {
            return Err(ConductorError::invalid_state(node, current, event.as_str()));
        }
    };

    Ok(next)
}

/// The state an operation starting in `state` with `event` is heading for.
///
/// Stored as `target_provision_state` while the operation is in flight.
pub fn target_for(state: ProvisionState, event: ProvisionEvent) -> Option<ProvisionState> {
    use ProvisionEvent as E;

    match event {
        E::Manage => Some(Manageable),
        E::Provide => Some(Available),
        E::Clean => match state {
            Deleting => Some(Available),
            _ => Some(Manageable),
        },
        E::Deploy | E::Rebuild | E::Adopt | E::Service | E::Unrescue => Some(Active),
        E::Delete => Some(Available),
        E::Rescue => Some(Rescue),
        _ => None,
    }
}

/// States from which a node record may be deleted without maintenance mode.
pub fn is_deletable(state: ProvisionState) -> bool {
    matches!(
        state,
        Enroll | Manageable | Available | CleanFailed | AdoptFailed | Error
    )
}
