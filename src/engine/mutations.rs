use chrono::{Datelike, NaiveDate};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::authz::{self, Action, Resource};
use crate::lifecycle::{self, Transition};
use crate::limits::*;
use crate::model::*;
use crate::observability::track;
use crate::wal::Record;

use super::{
    BookingError, ConflictRecord, Engine, Entity, WalCommand, append_record, find_conflicts,
    find_rental_conflicts, join_commit,
};

/// Dates must fall inside the supported calendar.
pub(super) fn validate_years(range: &DateRange) -> Result<(), BookingError> {
    let in_bounds = |d: NaiveDate| (MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&d.year());
    if !in_bounds(range.start) || !in_bounds(range.end) {
        return Err(BookingError::Validation(format!(
            "dates must be between years {MIN_VALID_YEAR} and {MAX_VALID_YEAR}"
        )));
    }
    Ok(())
}

fn validate_rental_range(range: &DateRange) -> Result<(), BookingError> {
    validate_years(range)?;
    if range.days() > MAX_RENTAL_DAYS {
        return Err(BookingError::Validation(format!(
            "rental may not exceed {MAX_RENTAL_DAYS} days"
        )));
    }
    Ok(())
}

fn ensure_free(
    vehicle_id: Ulid,
    range: DateRange,
    conflicts: Vec<ConflictRecord>,
) -> Result<(), BookingError> {
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(BookingError::conflict(vehicle_id, range, conflicts))
    }
}

impl Engine {
    /// Book `req.vehicle_id` for the client. The rental starts out `pending`.
    pub async fn create_rental(
        &self,
        actor: &Actor,
        req: NewRental,
    ) -> Result<Rental, BookingError> {
        track("create_rental", async {
            let range = DateRange::new(req.initial_date, req.final_date)?;
            validate_rental_range(&range)?;
            lifecycle::validate_cost(req.total_cost)?;

            self.resolve_client(req.client_id).await?;
            let vehicle = self.resolve_vehicle(req.vehicle_id).await?;
            authz::decide(
                actor,
                &Resource::rental(req.client_id, Some(vehicle.owner_id)),
                Action::CreateRental,
            )
            .into_result()?;

            let id = Ulid::new();
            let vehicle_id = vehicle.id;
            let rental = Rental {
                id,
                client_id: req.client_id,
                vehicle_id,
                range,
                total_cost: req.total_cost,
                status: RentalStatus::Pending,
            };

            let ((), state) = self
                .with_transaction(vehicle_id, |tx| {
                    if tx.state().rentals.len() >= MAX_RENTALS_PER_VEHICLE {
                        return Err(BookingError::Validation(
                            "too many rentals on vehicle".into(),
                        ));
                    }
                    ensure_free(vehicle_id, range, find_conflicts(tx.state(), &range, None))?;
                    tx.stage(Event::RentalCreated { rental })
                })
                .await?;

            let created = state
                .rental(&id)
                .cloned()
                .ok_or_else(|| BookingError::unexpected(format!("rental {id} missing after commit")))?;
            tracing::info!("rental {id} created on vehicle {vehicle_id} for {range}");
            Ok(created)
        })
        .await
    }

    /// Change the dates and/or cost of a pending rental. Returns the
    /// post-commit record.
    pub async fn update_rental(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: RentalPatch,
    ) -> Result<Rental, BookingError> {
        track("update_rental", async {
            if patch.is_empty() {
                return Err(BookingError::Validation("nothing to update".into()));
            }
            if let Some(cost) = patch.total_cost {
                lifecycle::validate_cost(cost)?;
            }

            let vehicle_id = self.vehicle_of(Entity::Rental, id)?;
            let owner_id = self.vehicle_owner(vehicle_id).await?;

            let (range, state) = self
                .with_transaction(vehicle_id, |tx| {
                    let current = tx
                        .state()
                        .rental(&id)
                        .cloned()
                        .ok_or(BookingError::not_found(Entity::Rental, id))?;
                    authz::decide(
                        actor,
                        &Resource::rental(current.client_id, owner_id),
                        Action::UpdateRental,
                    )
                    .into_result()?;

                    let range = patch.apply_range(&current.range)?;
                    lifecycle::ensure_editable(&current)?;
                    if range != current.range {
                        validate_rental_range(&range)?;
                        ensure_free(vehicle_id, range, find_conflicts(tx.state(), &range, Some(id)))?;
                    }

                    tx.stage(Event::RentalUpdated {
                        id,
                        vehicle_id,
                        range,
                        total_cost: patch.total_cost.unwrap_or(current.total_cost),
                    })?;
                    Ok(range)
                })
                .await?;

            let updated = state
                .rental(&id)
                .cloned()
                .ok_or_else(|| BookingError::unexpected(format!("rental {id} missing after commit")))?;
            tracing::info!("rental {id} updated on vehicle {vehicle_id} to {range}");
            Ok(updated)
        })
        .await
    }

    pub async fn confirm_rental(&self, actor: &Actor, id: Ulid) -> Result<Rental, BookingError> {
        track("confirm_rental", self.transition_rental(actor, id, Transition::Confirm)).await
    }

    /// Reject a pending rental; it moves to `canceled`.
    pub async fn reject_rental(&self, actor: &Actor, id: Ulid) -> Result<Rental, BookingError> {
        track("reject_rental", self.transition_rental(actor, id, Transition::Reject)).await
    }

    pub async fn complete_rental(&self, actor: &Actor, id: Ulid) -> Result<Rental, BookingError> {
        track("complete_rental", self.transition_rental(actor, id, Transition::Complete)).await
    }

    async fn transition_rental(
        &self,
        actor: &Actor,
        id: Ulid,
        transition: Transition,
    ) -> Result<Rental, BookingError> {
        let action = match transition {
            Transition::Confirm => Action::ConfirmRental,
            Transition::Reject => Action::RejectRental,
            Transition::Complete => Action::CompleteRental,
        };
        let vehicle_id = self.vehicle_of(Entity::Rental, id)?;
        let owner_id = self.vehicle_owner(vehicle_id).await?;

        let (status, state) = self
            .with_transaction(vehicle_id, |tx| {
                let current = tx
                    .state()
                    .rental(&id)
                    .ok_or(BookingError::not_found(Entity::Rental, id))?;
                authz::decide(actor, &Resource::rental(current.client_id, owner_id), action)
                    .into_result()?;
                let status = lifecycle::next_status(current, transition)?;
                tx.stage(Event::RentalStatusChanged {
                    id,
                    vehicle_id,
                    status,
                })?;
                Ok(status)
            })
            .await?;

        tracing::info!("rental {id} {status} ({}) by {}", transition.as_str(), actor.id);
        state
            .rental(&id)
            .cloned()
            .ok_or_else(|| BookingError::unexpected(format!("rental {id} missing after commit")))
    }

    /// Hard delete, whatever the status. Returns the removed record.
    pub async fn remove_rental(&self, actor: &Actor, id: Ulid) -> Result<Rental, BookingError> {
        track("remove_rental", async {
            let vehicle_id = self.vehicle_of(Entity::Rental, id)?;
            let owner_id = self.vehicle_owner(vehicle_id).await?;

            let (removed, _) = self
                .with_transaction(vehicle_id, |tx| {
                    let current = tx
                        .state()
                        .rental(&id)
                        .cloned()
                        .ok_or(BookingError::not_found(Entity::Rental, id))?;
                    authz::decide(
                        actor,
                        &Resource::rental(current.client_id, owner_id),
                        Action::RemoveRental {
                            terminal: current.status.is_terminal(),
                        },
                    )
                    .into_result()?;
                    tx.stage(Event::RentalRemoved {
                        id,
                        vehicle_id,
                        client_id: current.client_id,
                    })?;
                    Ok(current)
                })
                .await?;

            tracing::info!("rental {id} removed from vehicle {vehicle_id} by {}", actor.id);
            Ok(removed)
        })
        .await
    }

    /// Block `[from, to]` on a vehicle. Refused if an active rental overlaps.
    pub async fn add_unavailability(
        &self,
        actor: &Actor,
        vehicle_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        reason: Option<String>,
    ) -> Result<UnavailabilityWindow, BookingError> {
        track("add_unavailability", async {
            let range = DateRange::blackout(from, to)?;
            validate_years(&range)?;
            if let Some(ref r) = reason
                && r.len() > MAX_REASON_LEN
            {
                return Err(BookingError::Validation("reason too long".into()));
            }

            let vehicle = self.resolve_vehicle(vehicle_id).await?;
            authz::decide(
                actor,
                &Resource::vehicle(Some(vehicle.owner_id)),
                Action::ManageVehicle,
            )
            .into_result()?;

            let window = UnavailabilityWindow {
                id: Ulid::new(),
                vehicle_id,
                range,
                reason,
            };
            let created = window.clone();

            self.with_transaction(vehicle_id, |tx| {
                if tx.state().windows.len() >= MAX_WINDOWS_PER_VEHICLE {
                    return Err(BookingError::Validation(
                        "too many unavailability windows on vehicle".into(),
                    ));
                }
                ensure_free(vehicle_id, range, find_rental_conflicts(tx.state(), &range, None))?;
                tx.stage(Event::WindowAdded { window })
            })
            .await?;

            tracing::info!("vehicle {vehicle_id} unavailable for {range}");
            Ok(created)
        })
        .await
    }

    pub async fn remove_unavailability(
        &self,
        actor: &Actor,
        window_id: Ulid,
    ) -> Result<UnavailabilityWindow, BookingError> {
        track("remove_unavailability", async {
            let vehicle_id = self.vehicle_of(Entity::Window, window_id)?;
            let owner_id = self.vehicle_owner(vehicle_id).await?;

            let (removed, _) = self
                .with_transaction(vehicle_id, |tx| {
                    let window = tx
                        .state()
                        .window(&window_id)
                        .cloned()
                        .ok_or(BookingError::not_found(Entity::Window, window_id))?;
                    authz::decide(actor, &Resource::vehicle(owner_id), Action::ManageVehicle)
                        .into_result()?;
                    tx.stage(Event::WindowRemoved {
                        id: window_id,
                        vehicle_id,
                    })?;
                    Ok(window)
                })
                .await?;

            tracing::info!("vehicle {vehicle_id} available again for {}", removed.range);
            Ok(removed)
        })
        .await
    }

    /// Grant `role` to `user_id`. Returns the user's effective roles afterwards.
    pub async fn promote_role(
        &self,
        actor: &Actor,
        user_id: Ulid,
        role: Role,
    ) -> Result<RoleSet, BookingError> {
        track("promote_role", async {
            let client = self.resolve_client(user_id).await?;
            authz::decide(actor, &Resource::user(user_id), Action::PromoteRole(role))
                .into_result()?;

            let gate = self.commit_gate.clone().read_owned().await;
            let mut granted = self.grant_ledger(user_id).write_owned().await;
            let effective = client.roles.union(*granted);
            if effective.contains(role) {
                return Err(BookingError::Validation(format!(
                    "user {user_id} already has role {role}"
                )));
            }

            let wal_tx = self.wal_tx.clone();
            let notify = self.notify.clone();
            let tail = tokio::spawn(async move {
                let _gate = gate;
                let event = Event::RoleGranted { user_id, role };
                append_record(&wal_tx, vec![event.clone()]).await?;
                granted.insert(role);
                notify.send(user_id, &event);
                Ok::<_, BookingError>(())
            });
            join_commit(tail).await?;

            tracing::info!("user {user_id} granted {role} by {}", actor.id);
            Ok(effective.with(role))
        })
        .await
    }

    /// Confirmed rentals whose last day is before `today`.
    pub fn collect_overdue(&self, today: NaiveDate) -> Vec<Ulid> {
        let mut overdue = Vec::new();
        for entry in self.vehicles.iter() {
            let vs = entry.value().clone();
            // Busy vehicles are picked up on the next sweep.
            if let Ok(guard) = vs.try_read() {
                overdue.extend(
                    guard
                        .rentals
                        .iter()
                        .filter(|r| r.status == RentalStatus::Confirmed && r.final_date() < today)
                        .map(|r| r.id),
                );
            }
        }
        overdue
    }

    /// Rewrite the WAL with only the records needed to rebuild current state:
    /// one record per vehicle plus one for all role grants.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        // Exclusive: no commit is in flight while the snapshot is taken and swapped.
        let _gate = self.commit_gate.write().await;

        let vehicles: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        let mut records: Vec<Record> = Vec::with_capacity(vehicles.len() + 1);
        for vs in vehicles {
            let guard = vs.read().await;
            let mut record: Record = guard
                .windows
                .iter()
                .map(|w| Event::WindowAdded { window: w.clone() })
                .collect();
            record.extend(guard.rentals.iter().map(|r| Event::RentalCreated { rental: r.clone() }));
            if !record.is_empty() {
                records.push(record);
            }
        }

        let ledgers: Vec<_> = self
            .grants
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut grants: Record = Vec::new();
        for (user_id, ledger) in ledgers {
            let roles = *ledger.read().await;
            grants.extend(roles.iter().map(|role| Event::RoleGranted { user_id, role }));
        }
        if !grants.is_empty() {
            records.push(grants);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                records,
                response: tx,
            })
            .await
            .map_err(|_| BookingError::unexpected("WAL writer shut down"))?;
        rx.await
            .map_err(|_| BookingError::unexpected("WAL writer dropped response"))?
            .map_err(|e| BookingError::unexpected(format!("WAL compaction failed: {e}")))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Vehicle holding a rental or window, or NotFound for `entity`.
    fn vehicle_of(&self, entity: Entity, id: Ulid) -> Result<Ulid, BookingError> {
        self.get_vehicle_for_entity(&id)
            .ok_or(BookingError::not_found(entity, id))
    }
}
