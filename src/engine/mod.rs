mod availability;
mod error;
mod mutations;
mod queries;
mod transaction;

pub use availability::{
    Availability, busy_ranges, find_conflicts, find_rental_conflicts, free_ranges,
    merge_overlapping, subtract_ranges,
};
pub use error::{BookingError, ConflictRecord, Entity, ErrorKind};
pub use transaction::VehicleTx;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::directory::{ClientRecord, Directories, VehicleRecord};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{Record, Wal};

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;
pub type SharedRoleSet = Arc<RwLock<RoleSet>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        records: Vec<Record>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (Record, oneshot::Sender<io::Result<()>>);

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking coordinator. Owns per-vehicle state, the WAL writer and the
/// role-grant ledger; every mutation goes through a commit boundary.
pub struct Engine {
    pub(super) vehicles: DashMap<Ulid, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) indexes: Arc<Indexes>,
    /// Roles granted through promotion, on top of directory roles.
    pub(super) grants: DashMap<Ulid, SharedRoleSet>,
    pub(super) directories: Directories,
    /// Shared by every commit, exclusive for compaction, so a snapshot never
    /// races a commit that is between its WAL append and its publish.
    pub(super) commit_gate: Arc<RwLock<()>>,
}

/// Secondary lookups maintained from committed events.
#[derive(Default)]
pub(super) struct Indexes {
    /// Reverse lookup: entity (rental/window) id → vehicle id
    pub(super) entity_to_vehicle: DashMap<Ulid, Ulid>,
    /// Client → rental ids, for the secondary lookup.
    pub(super) client_rentals: DashMap<Ulid, Vec<Ulid>>,
}

impl Indexes {
    pub(super) fn apply(&self, event: &Event) {
        match event {
            Event::RentalCreated { rental } => {
                self.entity_to_vehicle.insert(rental.id, rental.vehicle_id);
                self.client_rentals
                    .entry(rental.client_id)
                    .or_default()
                    .push(rental.id);
            }
            Event::RentalRemoved { id, client_id, .. } => {
                self.entity_to_vehicle.remove(id);
                if let Some(mut ids) = self.client_rentals.get_mut(client_id) {
                    ids.retain(|r| r != id);
                }
            }
            Event::WindowAdded { window } => {
                self.entity_to_vehicle.insert(window.id, window.vehicle_id);
            }
            Event::WindowRemoved { id, .. } => {
                self.entity_to_vehicle.remove(id);
            }
            Event::RentalUpdated { .. }
            | Event::RentalStatusChanged { .. }
            | Event::RoleGranted { .. } => {}
        }
    }
}

/// Write one committed record to the WAL via the background group-commit writer.
pub(super) async fn append_record(
    wal_tx: &mpsc::Sender<WalCommand>,
    record: Record,
) -> Result<(), BookingError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            record,
            response: tx,
        })
        .await
        .map_err(|_| BookingError::unexpected("WAL writer shut down"))?;
    rx.await
        .map_err(|_| BookingError::unexpected("WAL writer dropped response"))?
        .map_err(|e| BookingError::unexpected(format!("WAL append failed: {e}")))
}

/// Await a detached commit tail. The task keeps running if this future is dropped.
pub(super) async fn join_commit<T>(
    handle: JoinHandle<Result<T, BookingError>>,
) -> Result<T, BookingError> {
    handle
        .await
        .map_err(|e| BookingError::unexpected(format!("commit task failed: {e}")))?
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directories: Directories,
    ) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            vehicles: DashMap::new(),
            wal_tx,
            notify,
            indexes: Arc::new(Indexes::default()),
            grants: DashMap::new(),
            directories,
            commit_gate: Arc::new(RwLock::new(())),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside a runtime.
        let mut replayed = 0usize;
        let mut skipped = 0usize;
        for record in &records {
            if engine.replay_record(record) {
                replayed += record.len();
            } else {
                skipped += 1;
            }
        }
        if replayed > 0 {
            tracing::info!(
                "replayed {replayed} events from {} ({} vehicles)",
                wal_path.display(),
                engine.vehicles.len()
            );
        }
        if skipped > 0 {
            tracing::warn!("skipped {skipped} conflicting records in {}", wal_path.display());
        }

        Ok(engine)
    }

    /// Apply one record, or none of it if it would break reservation exclusion
    /// (a write whose failure was reported to its caller but whose bytes hit disk).
    fn replay_record(&self, record: &Record) -> bool {
        let Some(vehicle_id) = record.iter().find_map(Event::vehicle_id) else {
            for event in record {
                if let Event::RoleGranted { user_id, role } = event {
                    let grants = self.grant_ledger(*user_id);
                    let mut guard = grants.try_write().expect("replay: uncontended write");
                    guard.insert(*role);
                }
            }
            return true;
        };

        let vs = self.vehicle_state(vehicle_id);
        let mut guard = vs.try_write().expect("replay: uncontended write");
        let refuse = |state: &VehicleState, event: &Event| {
            let conflicts = availability::exclusion_violation(state, event);
            if let Some(first) = conflicts.first() {
                tracing::warn!(
                    "replay: dropping record on vehicle {vehicle_id}: overlaps {} committed record(s), first at {}",
                    conflicts.len(),
                    first.range()
                );
                return true;
            }
            false
        };

        if let [event] = record.as_slice() {
            if refuse(&guard, event) {
                return false;
            }
            guard.apply(event);
        } else {
            let mut scratch = (*guard).clone();
            for event in record {
                if refuse(&scratch, event) {
                    return false;
                }
                scratch.apply(event);
            }
            *guard = scratch;
        }
        for event in record {
            self.indexes.apply(event);
        }
        true
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn get_vehicle_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.indexes.entity_to_vehicle.get(entity_id).map(|e| *e.value())
    }

    /// Vehicle state, created empty on first use.
    pub(super) fn vehicle_state(&self, id: Ulid) -> SharedVehicleState {
        self.vehicles
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(VehicleState::new(id))))
            .clone()
    }

    pub(super) fn grant_ledger(&self, user_id: Ulid) -> SharedRoleSet {
        self.grants
            .entry(user_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoleSet::empty())))
            .clone()
    }

    // ── Collaborators ────────────────────────────────────────
    // Called before any commit boundary is opened; no lock is held across them.

    pub(super) async fn resolve_vehicle(&self, id: Ulid) -> Result<VehicleRecord, BookingError> {
        self.directories
            .vehicles
            .resolve_vehicle(id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Vehicle, id))
    }

    /// Owner of a vehicle that may have been delisted since it was booked.
    pub(super) async fn vehicle_owner(&self, id: Ulid) -> Result<Option<Ulid>, BookingError> {
        Ok(self
            .directories
            .vehicles
            .resolve_vehicle(id)
            .await?
            .map(|v| v.owner_id))
    }

    pub(super) async fn resolve_client(&self, id: Ulid) -> Result<ClientRecord, BookingError> {
        self.directories
            .clients
            .resolve_client(id)
            .await?
            .ok_or_else(|| BookingError::not_found(Entity::Client, id))
    }
}
