use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::BookingError;

/// Closed date range `[start, end]`. Both ends are booked days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Rental window: the first day must strictly precede the last.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if start >= end {
            return Err(BookingError::Validation(
                "start date must be earlier than the end date".into(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Blackout window: a single day (`start == end`) is allowed.
    pub fn blackout(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if start > end {
            return Err(BookingError::Validation(
                "unavailable_from must not be after unavailable_to".into(),
            ));
        }
        Ok(Self { start, end })
    }

    pub(crate) fn closed(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Inclusive overlap: ranges sharing a single boundary day conflict.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Number of days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RentalStatus {
    Pending,
    Confirmed,
    Canceled,
    Completed,
}

impl RentalStatus {
    /// Active rentals count toward availability conflicts.
    pub fn is_active(self) -> bool {
        matches!(self, RentalStatus::Pending | RentalStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RentalStatus::Pending => "pending",
            RentalStatus::Confirmed => "confirmed",
            RentalStatus::Canceled => "canceled",
            RentalStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rental {
    pub id: Ulid,
    pub client_id: Ulid,
    pub vehicle_id: Ulid,
    pub range: DateRange,
    pub total_cost: Decimal,
    pub status: RentalStatus,
}

impl Rental {
    pub fn initial_date(&self) -> NaiveDate {
        self.range.start
    }

    pub fn final_date(&self) -> NaiveDate {
        self.range.end
    }
}

/// Owner-declared block on a vehicle (maintenance, personal use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityWindow {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub range: DateRange,
    pub reason: Option<String>,
}

impl UnavailabilityWindow {
    pub fn unavailable_from(&self) -> NaiveDate {
        self.range.start
    }

    pub fn unavailable_to(&self) -> NaiveDate {
        self.range.end
    }
}

/// Anything stored on a vehicle's date line.
pub trait Dated {
    fn id(&self) -> Ulid;
    fn range(&self) -> &DateRange;
}

impl Dated for Rental {
    fn id(&self) -> Ulid {
        self.id
    }

    fn range(&self) -> &DateRange {
        &self.range
    }
}

impl Dated for UnavailabilityWindow {
    fn id(&self) -> Ulid {
        self.id
    }

    fn range(&self) -> &DateRange {
        &self.range
    }
}

/// Insert maintaining sort order by `range.start`.
fn insert_sorted<T: Dated>(items: &mut Vec<T>, item: T) {
    let start = item.range().start;
    let pos = items
        .binary_search_by_key(&start, |i| i.range().start)
        .unwrap_or_else(|e| e);
    items.insert(pos, item);
}

fn remove_by_id<T: Dated>(items: &mut Vec<T>, id: Ulid) -> Option<T> {
    let pos = items.iter().position(|i| i.id() == id)?;
    Some(items.remove(pos))
}

/// Items whose range overlaps `query`, using binary search to skip everything
/// starting after `query.end`.
fn overlapping<'a, T: Dated>(items: &'a [T], query: &DateRange) -> impl Iterator<Item = &'a T> {
    let right_bound = items.partition_point(|i| i.range().start <= query.end);
    let query_start = query.start;
    items[..right_bound]
        .iter()
        .filter(move |i| i.range().end >= query_start)
}

// ── Roles & actors ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Tenant,
    Owner,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Tenant, Role::Owner, Role::Admin];

    fn bit(self) -> u8 {
        match self {
            Role::Tenant => 0b001,
            Role::Owner => 0b010,
            Role::Admin => 0b100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Tenant => "TENANT",
            Role::Owner => "OWNER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TENANT" => Ok(Role::Tenant),
            "OWNER" => Ok(Role::Owner),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(BookingError::Validation(format!("unknown role: {s}"))),
        }
    }
}

/// Closed, additive set of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(roles: &[Role]) -> Self {
        roles.iter().copied().collect()
    }

    pub fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn with(self, role: Role) -> Self {
        Self(self.0 | role.bit())
    }

    /// Adds `role`; returns false if it was already present.
    pub fn insert(&mut self, role: Role) -> bool {
        let had = self.contains(role);
        self.0 |= role.bit();
        !had
    }

    pub fn union(self, other: RoleSet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |r| self.contains(*r))
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        iter.into_iter().fold(RoleSet::empty(), RoleSet::with)
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Role::as_str).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Authenticated requester, supplied by the caller on every core call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub roles: RoleSet,
}

impl Actor {
    pub fn new(id: Ulid, roles: RoleSet) -> Self {
        Self { id, roles }
    }

    /// Internal actor used by background jobs.
    pub fn system() -> Self {
        Self {
            id: Ulid::nil(),
            roles: RoleSet::of(&[Role::Admin]),
        }
    }

    pub fn has(&self, role: Role) -> bool {
        self.roles.contains(role)
    }
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRental {
    pub client_id: Ulid,
    pub vehicle_id: Ulid,
    pub initial_date: NaiveDate,
    pub final_date: NaiveDate,
    pub total_cost: Decimal,
}

/// Partial update of a pending rental. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RentalPatch {
    pub initial_date: Option<NaiveDate>,
    pub final_date: Option<NaiveDate>,
    pub total_cost: Option<Decimal>,
}

impl RentalPatch {
    pub fn is_empty(&self) -> bool {
        self.initial_date.is_none() && self.final_date.is_none() && self.total_cost.is_none()
    }

    pub fn touches_dates(&self) -> bool {
        self.initial_date.is_some() || self.final_date.is_some()
    }

    /// Merge the patched dates over `current` and re-check ordering.
    pub fn apply_range(&self, current: &DateRange) -> Result<DateRange, BookingError> {
        if !self.touches_dates() {
            return Ok(*current);
        }
        DateRange::new(
            self.initial_date.unwrap_or(current.start),
            self.final_date.unwrap_or(current.end),
        )
    }
}

// ── Per-vehicle state ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    /// All rentals on the vehicle (any status), sorted by `range.start`.
    pub rentals: Vec<Rental>,
    /// Blackout windows, sorted by `range.start`.
    pub windows: Vec<UnavailabilityWindow>,
}

impl VehicleState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            rentals: Vec::new(),
            windows: Vec::new(),
        }
    }

    pub fn rental(&self, id: &Ulid) -> Option<&Rental> {
        self.rentals.iter().find(|r| r.id == *id)
    }

    pub fn window(&self, id: &Ulid) -> Option<&UnavailabilityWindow> {
        self.windows.iter().find(|w| w.id == *id)
    }

    pub fn insert_rental(&mut self, rental: Rental) {
        insert_sorted(&mut self.rentals, rental);
    }

    pub fn remove_rental(&mut self, id: Ulid) -> Option<Rental> {
        remove_by_id(&mut self.rentals, id)
    }

    pub fn insert_window(&mut self, window: UnavailabilityWindow) {
        insert_sorted(&mut self.windows, window);
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<UnavailabilityWindow> {
        remove_by_id(&mut self.windows, id)
    }

    /// Rentals (any status) whose range overlaps the query.
    pub fn overlapping_rentals(&self, query: &DateRange) -> impl Iterator<Item = &Rental> {
        overlapping(&self.rentals, query)
    }

    pub fn overlapping_windows(&self, query: &DateRange) -> impl Iterator<Item = &UnavailabilityWindow> {
        overlapping(&self.windows, query)
    }

    /// Apply a vehicle-scoped event. Index bookkeeping is the engine's job.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::RentalCreated { rental } => self.insert_rental(rental.clone()),
            Event::RentalUpdated {
                id,
                range,
                total_cost,
                ..
            } => {
                // Re-insert so the sort order follows the new start date.
                if let Some(mut rental) = self.remove_rental(*id) {
                    rental.range = *range;
                    rental.total_cost = *total_cost;
                    self.insert_rental(rental);
                }
            }
            Event::RentalStatusChanged { id, status, .. } => {
                if let Some(rental) = self.rentals.iter_mut().find(|r| r.id == *id) {
                    rental.status = *status;
                }
            }
            Event::RentalRemoved { id, .. } => {
                self.remove_rental(*id);
            }
            Event::WindowAdded { window } => self.insert_window(window.clone()),
            Event::WindowRemoved { id, .. } => {
                self.remove_window(*id);
            }
            Event::RoleGranted { .. } => {}
        }
    }
}

/// The event types. A WAL record is the list of events of one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RentalCreated {
        rental: Rental,
    },
    RentalUpdated {
        id: Ulid,
        vehicle_id: Ulid,
        range: DateRange,
        total_cost: Decimal,
    },
    RentalStatusChanged {
        id: Ulid,
        vehicle_id: Ulid,
        status: RentalStatus,
    },
    RentalRemoved {
        id: Ulid,
        vehicle_id: Ulid,
        client_id: Ulid,
    },
    WindowAdded {
        window: UnavailabilityWindow,
    },
    WindowRemoved {
        id: Ulid,
        vehicle_id: Ulid,
    },
    RoleGranted {
        user_id: Ulid,
        role: Role,
    },
}

impl Event {
    /// The vehicle this event belongs to; `None` for account events.
    pub fn vehicle_id(&self) -> Option<Ulid> {
        match self {
            Event::RentalCreated { rental } => Some(rental.vehicle_id),
            Event::WindowAdded { window } => Some(window.vehicle_id),
            Event::RentalUpdated { vehicle_id, .. }
            | Event::RentalStatusChanged { vehicle_id, .. }
            | Event::RentalRemoved { vehicle_id, .. }
            | Event::WindowRemoved { vehicle_id, .. } => Some(*vehicle_id),
            Event::RoleGranted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, d).unwrap()
    }

    fn range(a: u32, b: u32) -> DateRange {
        DateRange::closed(day(a), day(b))
    }

    fn rental(a: u32, b: u32, status: RentalStatus) -> Rental {
        Rental {
            id: Ulid::new(),
            client_id: Ulid::new(),
            vehicle_id: Ulid::new(),
            range: range(a, b),
            total_cost: Decimal::new(10000, 2),
            status,
        }
    }

    #[test]
    fn range_requires_strict_order() {
        assert!(DateRange::new(day(1), day(2)).is_ok());
        let err = DateRange::new(day(2), day(1)).unwrap_err();
        assert_eq!(err.to_string(), "start date must be earlier than the end date");
        assert!(DateRange::new(day(3), day(3)).is_err());
    }

    #[test]
    fn blackout_allows_single_day() {
        let r = DateRange::blackout(day(5), day(5)).unwrap();
        assert_eq!(r.days(), 1);
        assert!(DateRange::blackout(day(6), day(5)).is_err());
    }

    #[test]
    fn range_overlap_is_inclusive() {
        let a = range(1, 3);
        assert!(a.overlaps(&range(3, 5))); // same-day handoff conflicts
        assert!(a.overlaps(&range(2, 2)));
        assert!(!a.overlaps(&range(4, 6)));
        assert!(range(4, 6).overlaps(&range(1, 10)));
    }

    #[test]
    fn range_days_and_display() {
        let r = range(1, 10);
        assert_eq!(r.days(), 10);
        assert_eq!(r.to_string(), "[2030-01-01, 2030-01-10]");
    }

    #[test]
    fn rentals_kept_sorted() {
        let mut vs = VehicleState::new(Ulid::new());
        vs.insert_rental(rental(20, 22, RentalStatus::Pending));
        vs.insert_rental(rental(1, 3, RentalStatus::Pending));
        vs.insert_rental(rental(10, 12, RentalStatus::Confirmed));
        let starts: Vec<_> = vs.rentals.iter().map(|r| r.range.start).collect();
        assert_eq!(starts, vec![day(1), day(10), day(20)]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut vs = VehicleState::new(Ulid::new());
        vs.insert_rental(rental(1, 3, RentalStatus::Pending));
        vs.insert_rental(rental(8, 12, RentalStatus::Pending));
        vs.insert_rental(rental(20, 25, RentalStatus::Pending));

        let hits: Vec<_> = vs.overlapping_rentals(&range(10, 15)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range, range(8, 12));
    }

    #[test]
    fn overlapping_includes_boundary_days() {
        let mut vs = VehicleState::new(Ulid::new());
        vs.insert_rental(rental(1, 5, RentalStatus::Pending));
        vs.insert_rental(rental(10, 12, RentalStatus::Pending));
        let hits: Vec<_> = vs.overlapping_rentals(&range(5, 10)).collect();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn overlapping_long_rental_spanning_query() {
        let mut vs = VehicleState::new(Ulid::new());
        vs.insert_rental(rental(1, 28, RentalStatus::Confirmed));
        assert_eq!(vs.overlapping_rentals(&range(10, 11)).count(), 1);
    }

    #[test]
    fn apply_update_resorts() {
        let mut vs = VehicleState::new(Ulid::new());
        let first = rental(1, 3, RentalStatus::Pending);
        let second = rental(10, 12, RentalStatus::Pending);
        let first_id = first.id;
        vs.insert_rental(first);
        vs.insert_rental(second);

        vs.apply(&Event::RentalUpdated {
            id: first_id,
            vehicle_id: vs.id,
            range: range(15, 16),
            total_cost: Decimal::new(5000, 2),
        });
        assert_eq!(vs.rentals[1].id, first_id);
        assert_eq!(vs.rentals[1].total_cost, Decimal::new(5000, 2));
    }

    #[test]
    fn apply_status_and_remove() {
        let mut vs = VehicleState::new(Ulid::new());
        let r = rental(1, 3, RentalStatus::Pending);
        let id = r.id;
        let client_id = r.client_id;
        vs.apply(&Event::RentalCreated { rental: r });
        vs.apply(&Event::RentalStatusChanged {
            id,
            vehicle_id: vs.id,
            status: RentalStatus::Confirmed,
        });
        assert_eq!(vs.rental(&id).unwrap().status, RentalStatus::Confirmed);
        vs.apply(&Event::RentalRemoved {
            id,
            vehicle_id: vs.id,
            client_id,
        });
        assert!(vs.rentals.is_empty());
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut vs = VehicleState::new(Ulid::new());
        vs.insert_rental(rental(1, 3, RentalStatus::Pending));
        assert!(vs.remove_rental(Ulid::new()).is_none());
        assert_eq!(vs.rentals.len(), 1);
    }

    #[test]
    fn status_classification() {
        assert!(RentalStatus::Pending.is_active());
        assert!(RentalStatus::Confirmed.is_active());
        assert!(RentalStatus::Canceled.is_terminal());
        assert!(RentalStatus::Completed.is_terminal());
    }

    #[test]
    fn role_set_is_additive() {
        let mut roles = RoleSet::of(&[Role::Tenant]);
        assert!(roles.insert(Role::Owner));
        assert!(!roles.insert(Role::Owner));
        assert!(roles.contains(Role::Tenant));
        assert!(roles.contains(Role::Owner));
        assert!(!roles.contains(Role::Admin));
        assert_eq!(roles.to_string(), "{TENANT,OWNER}");
        assert_eq!(roles.union(RoleSet::of(&[Role::Admin])).iter().count(), 3);
    }

    #[test]
    fn role_parse() {
        assert_eq!("owner".parse::<Role>().unwrap(), Role::Owner);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn patch_merges_dates() {
        let current = range(5, 10);
        let patch = RentalPatch {
            final_date: Some(day(12)),
            ..Default::default()
        };
        assert_eq!(patch.apply_range(&current).unwrap(), range(5, 12));

        let bad = RentalPatch {
            initial_date: Some(day(11)),
            ..Default::default()
        };
        assert!(bad.apply_range(&current).is_err());
        assert!(RentalPatch::default().is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RentalCreated {
            rental: rental(1, 4, RentalStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
