use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::model::{Event, VehicleState};

use super::availability::exclusion_violation;
use super::{BookingError, Engine, append_record, join_commit};

/// Work in progress on one vehicle inside a commit boundary.
///
/// Holds the vehicle's write lock for its whole life. Staged events are applied
/// to a private copy of the state; nothing is visible to other callers until
/// the boundary commits. Dropping the transaction discards the copy.
pub struct VehicleTx {
    guard: OwnedRwLockWriteGuard<VehicleState>,
    scratch: Option<VehicleState>,
    staged: Vec<Event>,
}

impl VehicleTx {
    fn new(guard: OwnedRwLockWriteGuard<VehicleState>) -> Self {
        Self {
            guard,
            scratch: None,
            staged: Vec::new(),
        }
    }

    pub fn vehicle_id(&self) -> Ulid {
        self.guard.id
    }

    /// Current view: committed state plus everything staged so far.
    pub fn state(&self) -> &VehicleState {
        self.scratch.as_ref().unwrap_or(&*self.guard)
    }

    /// Stage an event. Writes that would leave two active reservations (or a
    /// reservation and a blackout) overlapping are refused here regardless of
    /// what the caller checked before.
    pub fn stage(&mut self, event: Event) -> Result<(), BookingError> {
        debug_assert_eq!(event.vehicle_id(), Some(self.guard.id));
        let conflicts = exclusion_violation(self.state(), &event);
        if let Some(first) = conflicts.first() {
            let range = *first.range();
            tracing::warn!(
                "exclusion check refused write on vehicle {}: {} conflicting record(s)",
                self.guard.id,
                conflicts.len()
            );
            return Err(BookingError::conflict(self.guard.id, range, conflicts));
        }

        let scratch = self.scratch.get_or_insert_with(|| (*self.guard).clone());
        scratch.apply(&event);
        self.staged.push(event);
        Ok(())
    }

    pub fn staged(&self) -> &[Event] {
        &self.staged
    }
}

impl Engine {
    /// Run `f` inside a serializable commit boundary on `vehicle_id`.
    ///
    /// The vehicle's write lock is held from before `f` runs until the staged
    /// events are durable and published. If `f` fails, panics, or the WAL
    /// append fails, the staged copy is dropped and the vehicle is untouched.
    /// On success returns `f`'s value and a read guard on the post-commit state.
    ///
    /// Once `f` has succeeded the append, publish and notify steps run on their
    /// own task: dropping the returned future cannot leave a record in the WAL
    /// that the in-memory state never saw.
    pub async fn with_transaction<T, F>(
        &self,
        vehicle_id: Ulid,
        f: F,
    ) -> Result<(T, OwnedRwLockReadGuard<VehicleState>), BookingError>
    where
        F: FnOnce(&mut VehicleTx) -> Result<T, BookingError>,
    {
        let gate = self.commit_gate.clone().read_owned().await;
        let vs = self.vehicle_state(vehicle_id);
        let mut tx = VehicleTx::new(vs.write_owned().await);

        let value = match f(&mut tx) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("rolled back transaction on vehicle {vehicle_id}: {e}");
                return Err(e);
            }
        };

        let VehicleTx {
            mut guard,
            scratch,
            staged,
        } = tx;
        let Some(next) = scratch else {
            return Ok((value, guard.downgrade()));
        };

        let wal_tx = self.wal_tx.clone();
        let indexes = self.indexes.clone();
        let notify = self.notify.clone();
        let tail = tokio::spawn(async move {
            let _gate = gate;
            if let Err(e) = append_record(&wal_tx, staged.clone()).await {
                tracing::debug!("rolled back transaction on vehicle {vehicle_id}: {e}");
                return Err(e);
            }
            *guard = next;
            for event in &staged {
                indexes.apply(event);
                notify.send(vehicle_id, event);
            }
            Ok(guard.downgrade())
        });

        Ok((value, join_commit(tail).await?))
    }
}
