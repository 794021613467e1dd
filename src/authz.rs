//! Authorization policy: a pure decision table over (actor, resource, action).
//!
//! Two denial flavours are kept apart because callers surface them differently:
//! [`Decision::Forbidden`] when the actor is authenticated but its roles do not
//! cover the action, [`Decision::Unauthorized`] when the actor is neither the
//! resource's own actor nor privileged.

use ulid::Ulid;

use crate::engine::BookingError;
use crate::model::{Actor, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateRental,
    UpdateRental,
    ViewRental,
    ConfirmRental,
    RejectRental,
    CompleteRental,
    /// Hard delete. Rentals in a terminal status may only be removed by ADMIN.
    RemoveRental { terminal: bool },
    /// Declare or lift blackout windows on a vehicle.
    ManageVehicle,
    UpdateProfile,
    DeleteProfile,
    PromoteRole(Role),
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::CreateRental => "create rental",
            Action::UpdateRental => "update rental",
            Action::ViewRental => "view rental",
            Action::ConfirmRental => "confirm rental",
            Action::RejectRental => "reject rental",
            Action::CompleteRental => "complete rental",
            Action::RemoveRental { .. } => "remove rental",
            Action::ManageVehicle => "manage vehicle",
            Action::UpdateProfile => "update profile",
            Action::DeleteProfile => "delete profile",
            Action::PromoteRole(_) => "promote role",
        }
    }
}

/// Identities attached to the resource being acted on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resource {
    /// Vehicle owner, when the resource hangs off a vehicle.
    pub owner_id: Option<Ulid>,
    /// Renting client, or the target user of a profile/role action.
    pub subject_id: Option<Ulid>,
}

impl Resource {
    pub fn rental(client_id: Ulid, owner_id: Option<Ulid>) -> Self {
        Self {
            owner_id,
            subject_id: Some(client_id),
        }
    }

    pub fn vehicle(owner_id: Option<Ulid>) -> Self {
        Self {
            owner_id,
            subject_id: None,
        }
    }

    pub fn user(user_id: Ulid) -> Self {
        Self {
            owner_id: None,
            subject_id: Some(user_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Forbidden(String),
    Unauthorized(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), BookingError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Forbidden(reason) => Err(BookingError::Forbidden(reason)),
            Decision::Unauthorized(reason) => Err(BookingError::Unauthorized(reason)),
        }
    }
}

pub fn decide(actor: &Actor, resource: &Resource, action: Action) -> Decision {
    if actor.has(Role::Admin) {
        return Decision::Allow;
    }
    let is_subject = resource.subject_id == Some(actor.id);
    let is_owner = resource.owner_id == Some(actor.id);

    match action {
        Action::CreateRental
        | Action::UpdateRental
        | Action::UpdateProfile
        | Action::DeleteProfile => self_only(is_subject, action),
        Action::ViewRental => {
            if is_subject || is_owner {
                Decision::Allow
            } else {
                Decision::Unauthorized(format!(
                    "only the renting client or the vehicle owner may {}",
                    action.as_str()
                ))
            }
        }
        Action::ConfirmRental
        | Action::RejectRental
        | Action::CompleteRental
        | Action::RemoveRental { terminal: false }
        | Action::ManageVehicle => owner_of_vehicle(actor, is_owner, action),
        Action::RemoveRental { terminal: true } => Decision::Forbidden(
            "only an administrator may remove a rental in a terminal status".into(),
        ),
        Action::PromoteRole(Role::Admin) => {
            Decision::Forbidden("only an administrator may grant ADMIN".into())
        }
        Action::PromoteRole(_) => self_only(is_subject, action),
    }
}

fn self_only(is_subject: bool, action: Action) -> Decision {
    if is_subject {
        Decision::Allow
    } else {
        Decision::Unauthorized(format!("only the user itself may {}", action.as_str()))
    }
}

fn owner_of_vehicle(actor: &Actor, is_owner: bool, action: Action) -> Decision {
    if !actor.has(Role::Owner) {
        return Decision::Forbidden(format!("OWNER role required to {}", action.as_str()));
    }
    if !is_owner {
        return Decision::Unauthorized(format!(
            "{} is not the owner of this vehicle",
            actor.id
        ));
    }
    Decision::Allow
}
