//! Rental state machine.
//!
//! ```text
//!            confirm            complete
//! pending ───────────▶ confirmed ─────────▶ completed
//!    │  └──────────────────────────────────▶ (complete)
//!    │ reject
//!    ▼
//! canceled
//! ```
//!
//! `canceled` and `completed` are terminal. Date and cost edits are only
//! allowed while `pending`.

use rust_decimal::Decimal;

use crate::engine::BookingError;
use crate::model::{Rental, RentalStatus};

const NOT_PENDING: &str = "not in pending status";
const ALREADY_TERMINAL: &str = "already in a terminal status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Confirm,
    Reject,
    Complete,
}

impl Transition {
    pub fn target(self) -> RentalStatus {
        match self {
            Transition::Confirm => RentalStatus::Confirmed,
            Transition::Reject => RentalStatus::Canceled,
            Transition::Complete => RentalStatus::Completed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Reject => "reject",
            Transition::Complete => "complete",
        }
    }
}

/// True if the edge `from -> to` exists in the graph.
pub fn can_transition(from: RentalStatus, to: RentalStatus) -> bool {
    use RentalStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed) | (Pending, Canceled) | (Pending, Completed) | (Confirmed, Completed)
    )
}

/// Status the rental moves to under `transition`, or the guard that failed.
pub fn next_status(rental: &Rental, transition: Transition) -> Result<RentalStatus, BookingError> {
    let target = transition.target();
    if can_transition(rental.status, target) {
        return Ok(target);
    }
    let reason = match transition {
        Transition::Confirm | Transition::Reject => NOT_PENDING,
        Transition::Complete => ALREADY_TERMINAL,
    };
    Err(BookingError::InvalidStateTransition {
        id: rental.id,
        status: rental.status,
        reason,
    })
}

/// Date/cost fields may only change while the rental is pending.
pub fn ensure_editable(rental: &Rental) -> Result<(), BookingError> {
    if rental.status == RentalStatus::Pending {
        return Ok(());
    }
    Err(BookingError::InvalidStateTransition {
        id: rental.id,
        status: rental.status,
        reason: NOT_PENDING,
    })
}

pub fn validate_cost(cost: Decimal) -> Result<(), BookingError> {
    if cost <= Decimal::ZERO {
        return Err(BookingError::Validation("total cost must be positive".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use ulid::Ulid;

    use super::*;
    use crate::engine::ErrorKind;
    use crate::model::DateRange;

    fn rental(status: RentalStatus) -> Rental {
        Rental {
            id: Ulid::new(),
            client_id: Ulid::new(),
            vehicle_id: Ulid::new(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2030, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2030, 3, 4).unwrap(),
            )
            .unwrap(),
            total_cost: Decimal::new(120, 0),
            status,
        }
    }

    #[test]
    fn pending_moves_forward() {
        let r = rental(RentalStatus::Pending);
        assert_eq!(next_status(&r, Transition::Confirm).unwrap(), RentalStatus::Confirmed);
        assert_eq!(next_status(&r, Transition::Reject).unwrap(), RentalStatus::Canceled);
        assert_eq!(next_status(&r, Transition::Complete).unwrap(), RentalStatus::Completed);
    }

    #[test]
    fn confirm_requires_pending() {
        for status in [RentalStatus::Confirmed, RentalStatus::Canceled, RentalStatus::Completed] {
            let err = next_status(&rental(status), Transition::Confirm).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
            assert!(err.to_string().contains("not in pending status"));
        }
    }

    #[test]
    fn reject_requires_pending() {
        let err = next_status(&rental(RentalStatus::Confirmed), Transition::Reject).unwrap_err();
        assert!(err.to_string().contains("not in pending status"));
    }

    #[test]
    fn complete_from_confirmed_only_until_terminal() {
        assert!(next_status(&rental(RentalStatus::Confirmed), Transition::Complete).is_ok());
        let err = next_status(&rental(RentalStatus::Canceled), Transition::Complete).unwrap_err();
        assert!(err.to_string().contains("terminal"));
        assert!(next_status(&rental(RentalStatus::Completed), Transition::Complete).is_err());
    }

    #[test]
    fn no_edge_leaves_a_terminal_state() {
        for from in [RentalStatus::Canceled, RentalStatus::Completed] {
            for to in [
                RentalStatus::Pending,
                RentalStatus::Confirmed,
                RentalStatus::Canceled,
                RentalStatus::Completed,
            ] {
                assert!(!can_transition(from, to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn edits_only_while_pending() {
        assert!(ensure_editable(&rental(RentalStatus::Pending)).is_ok());
        assert!(ensure_editable(&rental(RentalStatus::Confirmed)).is_err());
    }

    #[test]
    fn cost_must_be_positive() {
        assert!(validate_cost(Decimal::new(1, 2)).is_ok());
        assert!(validate_cost(Decimal::ZERO).is_err());
        assert!(validate_cost(Decimal::new(-5, 0)).is_err());
    }
}
