use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::directory::DirectoryError;
use crate::model::{DateRange, RentalStatus};

/// What a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Rental,
    Vehicle,
    Client,
    Window,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Rental => "rental",
            Entity::Vehicle => "vehicle",
            Entity::Client => "client",
            Entity::Window => "unavailability window",
        })
    }
}

/// A record that blocks a requested window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictRecord {
    Rental {
        id: Ulid,
        range: DateRange,
        status: RentalStatus,
    },
    Blackout {
        id: Ulid,
        range: DateRange,
    },
}

impl ConflictRecord {
    pub fn id(&self) -> Ulid {
        match self {
            ConflictRecord::Rental { id, .. } | ConflictRecord::Blackout { id, .. } => *id,
        }
    }

    pub fn range(&self) -> &DateRange {
        match self {
            ConflictRecord::Rental { range, .. } | ConflictRecord::Blackout { range, .. } => range,
        }
    }
}

#[derive(Debug, Error)]
pub enum BookingError {
    /// Malformed input: date order, non-positive cost, an empty patch, or a
    /// value outside the deployment limits in [`crate::limits`].
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: Ulid },

    #[error("vehicle {vehicle_id} already reserved for {range}")]
    Conflict {
        vehicle_id: Ulid,
        range: DateRange,
        conflicts: Vec<ConflictRecord>,
    },

    #[error("rental {id} {reason}")]
    InvalidStateTransition {
        id: Ulid,
        status: RentalStatus,
        reason: &'static str,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Detail is logged when the error is built and never rendered.
    #[error("unexpected error")]
    Unexpected { detail: String },
}

/// Fieldless mirror of [`BookingError`] for transport mapping and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvalidStateTransition,
    Unauthorized,
    Forbidden,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::Validation(_) => ErrorKind::Validation,
            BookingError::NotFound { .. } => ErrorKind::NotFound,
            BookingError::Conflict { .. } => ErrorKind::Conflict,
            BookingError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            BookingError::Unauthorized(_) => ErrorKind::Unauthorized,
            BookingError::Forbidden(_) => ErrorKind::Forbidden,
            BookingError::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    pub fn not_found(entity: Entity, id: Ulid) -> Self {
        BookingError::NotFound { entity, id }
    }

    pub fn conflict(vehicle_id: Ulid, range: DateRange, conflicts: Vec<ConflictRecord>) -> Self {
        BookingError::Conflict {
            vehicle_id,
            range,
            conflicts,
        }
    }

    pub fn unexpected(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!("unexpected booking failure: {detail}");
        BookingError::Unexpected { detail }
    }
}

impl From<DirectoryError> for BookingError {
    fn from(e: DirectoryError) -> Self {
        BookingError::unexpected(format!("directory: {e}"))
    }
}
