use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::mutations::validate_years;
use super::{Availability, BookingError, Engine, Entity, find_conflicts};

impl Engine {
    /// Is `range` free on the vehicle? Blackouts count as busy. `exclude`
    /// skips one rental, so a rental can be checked against its own new dates.
    pub async fn check_availability(
        &self,
        vehicle_id: Ulid,
        range: DateRange,
        exclude: Option<Ulid>,
    ) -> Result<Availability, BookingError> {
        self.resolve_vehicle(vehicle_id).await?;
        check_query_window(&range)?;

        let conflicts = match self.get_vehicle(&vehicle_id) {
            Some(vs) => find_conflicts(&*vs.read().await, &range, exclude),
            None => Vec::new(),
        };
        Ok(Availability {
            vehicle_id,
            range,
            conflicts,
        })
    }

    /// Bookable sub-ranges of `query` on the vehicle.
    pub async fn free_ranges(
        &self,
        vehicle_id: Ulid,
        query: DateRange,
    ) -> Result<Vec<DateRange>, BookingError> {
        self.resolve_vehicle(vehicle_id).await?;
        check_query_window(&query)?;

        Ok(match self.get_vehicle(&vehicle_id) {
            Some(vs) => super::free_ranges(&*vs.read().await, &query),
            None => vec![query],
        })
    }

    pub async fn find_rental(&self, id: Ulid) -> Result<Rental, BookingError> {
        let not_found = || BookingError::not_found(Entity::Rental, id);
        let vehicle_id = self.get_vehicle_for_entity(&id).ok_or_else(not_found)?;
        let vs = self.get_vehicle(&vehicle_id).ok_or_else(not_found)?;
        let guard = vs.read().await;
        guard.rental(&id).cloned().ok_or_else(not_found)
    }

    /// All rentals of a client, any status, ordered by first day.
    pub async fn find_rentals_by_client(&self, client_id: Ulid) -> Vec<Rental> {
        let ids: Vec<Ulid> = self
            .indexes
            .client_rentals
            .get(&client_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        let mut rentals = Vec::with_capacity(ids.len());
        for id in ids {
            // Removed between the index read and the lookup.
            if let Ok(rental) = self.find_rental(id).await {
                rentals.push(rental);
            }
        }
        rentals.sort_by_key(|r| (r.range.start, r.id));
        rentals
    }

    pub async fn rentals_for_vehicle(&self, vehicle_id: Ulid) -> Vec<Rental> {
        match self.get_vehicle(&vehicle_id) {
            Some(vs) => vs.read().await.rentals.clone(),
            None => vec![],
        }
    }

    pub async fn unavailability_for_vehicle(&self, vehicle_id: Ulid) -> Vec<UnavailabilityWindow> {
        match self.get_vehicle(&vehicle_id) {
            Some(vs) => vs.read().await.windows.clone(),
            None => vec![],
        }
    }

    /// Effective roles: those the client directory reports plus grants.
    pub async fn roles_of(&self, user_id: Ulid) -> Result<RoleSet, BookingError> {
        let client = self.resolve_client(user_id).await?;
        let granted = match self.grants.get(&user_id).map(|e| e.value().clone()) {
            Some(ledger) => *ledger.read().await,
            None => RoleSet::empty(),
        };
        Ok(client.roles.union(granted))
    }
}

fn check_query_window(range: &DateRange) -> Result<(), BookingError> {
    validate_years(range)?;
    if range.days() > MAX_QUERY_WINDOW_DAYS {
        return Err(BookingError::Validation("query window too wide".into()));
    }
    Ok(())
}
