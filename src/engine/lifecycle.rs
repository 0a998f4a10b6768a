//! The rental state machine, in one table.
//!
//! Every state change in the engine goes through [`transition`]. A pair
//! missing from the table is an illegal move and is rejected before anything
//! is written.

use crate::model::RentalState;

use super::EngineError;

/// What is being done to a rental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Owner accepts a request.
    Confirm,
    /// Owner refuses a request.
    Deny,
    OwnerCancel,
    TenantCancel,
    /// Cascade: a competing rental was confirmed.
    Restrain,
    /// Cascade: the confirmed rental that blocked this one was cancelled.
    Release,
    /// Externally triggered lapse of an unresolved request.
    Expire,
}

/// Follow-up applied to overlapping siblings in the same atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    None,
    /// Every overlapping PENDING sibling becomes RESTRAINED.
    RestrainPending,
    /// Every overlapping RESTRAINED sibling goes back to PENDING.
    ReleaseRestrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: RentalState,
    pub cascade: Cascade,
}

const fn to(next: RentalState, cascade: Cascade) -> Option<Transition> {
    Some(Transition { next, cascade })
}

pub fn transition(from: RentalState, action: Action) -> Option<Transition> {
    use Action::*;
    use RentalState::*;
    match (from, action) {
        (Pending, Confirm) => to(Confirmed, Cascade::RestrainPending),
        (Pending, Deny) | (Restrained, Deny) => to(Denied, Cascade::None),
        (Pending, Restrain) => to(Restrained, Cascade::None),
        (Restrained, Release) => to(Pending, Cascade::None),
        (Confirmed, OwnerCancel) | (Confirmed, TenantCancel) => {
            to(Cancelled, Cascade::ReleaseRestrained)
        }
        (Pending, Expire) | (Restrained, Expire) => to(Expired, Cascade::None),
        _ => None,
    }
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Confirm => "confirm",
            Action::Deny => "deny",
            Action::OwnerCancel => "owner_cancel",
            Action::TenantCancel => "tenant_cancel",
            Action::Restrain => "restrain",
            Action::Release => "release",
            Action::Expire => "expire",
        }
    }

    /// Error reported when `from` has no entry for this action.
    /// Cancelling anything but a confirmed rental is a precondition failure;
    /// every other illegal move is a state conflict.
    pub fn rejection(&self, from: RentalState) -> EngineError {
        match self {
            Action::Confirm => EngineError::conflict(format!(
                "rental must be PENDING to be confirmed, is {from}"
            )),
            Action::Deny => EngineError::conflict(format!("cannot deny a rental that is {from}")),
            Action::OwnerCancel | Action::TenantCancel => EngineError::validation(format!(
                "only CONFIRMED rentals can be cancelled, rental is {from}"
            )),
            Action::Restrain => {
                EngineError::conflict(format!("cannot restrain a rental that is {from}"))
            }
            Action::Release => {
                EngineError::conflict(format!("cannot release a rental that is {from}"))
            }
            Action::Expire => {
                EngineError::conflict(format!("cannot expire a rental that is {from}"))
            }
        }
    }

    /// Look up the move or produce the uniform rejection.
    pub fn apply(&self, from: RentalState) -> Result<Transition, EngineError> {
        transition(from, *self).ok_or_else(|| self.rejection(from))
    }
}
