use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::engine::Engine;
use crate::model::Actor;

/// Background task that completes confirmed rentals whose last day has passed.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        sweep_overdue(&engine, Utc::now().date_naive()).await;
    }
}

/// One sweep. Returns how many rentals were completed.
pub async fn sweep_overdue(engine: &Engine, today: NaiveDate) -> usize {
    let system = Actor::system();
    let mut completed = 0;
    for rental_id in engine.collect_overdue(today) {
        match engine.complete_rental(&system, rental_id).await {
            Ok(_) => {
                completed += 1;
                metrics::counter!(crate::observability::SWEEPER_COMPLETIONS_TOTAL).increment(1);
                info!("completed overdue rental {rental_id}");
            }
            // Removed or completed by someone else since it was collected.
            Err(e) => tracing::debug!("sweeper skip {rental_id}: {e}"),
        }
    }
    completed
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2031, m, d).unwrap()
    }

    #[tokio::test]
    async fn sweeper_completes_only_past_confirmed_rentals() {
        let dir = Arc::new(InMemoryDirectory::new());
        let engine = Engine::new(
            test_wal_path("sweeper.wal"),
            Arc::new(NotifyHub::new()),
            dir.directories(),
        )
        .unwrap();

        let owner = Ulid::new();
        let client = Ulid::new();
        let vehicle = Ulid::new();
        dir.register_vehicle(vehicle, owner);
        dir.register_client(client, RoleSet::of(&[Role::Tenant]));
        let tenant = Actor::new(client, RoleSet::of(&[Role::Tenant]));
        let owner_actor = Actor::new(owner, RoleSet::of(&[Role::Owner]));

        let book = |from, to| NewRental {
            client_id: client,
            vehicle_id: vehicle,
            initial_date: from,
            final_date: to,
            total_cost: Decimal::new(300, 0),
        };
        let past = engine.create_rental(&tenant, book(day(1, 1), day(1, 3))).await.unwrap();
        let pending = engine.create_rental(&tenant, book(day(1, 5), day(1, 7))).await.unwrap();
        let future = engine.create_rental(&tenant, book(day(3, 1), day(3, 3))).await.unwrap();
        engine.confirm_rental(&owner_actor, past.id).await.unwrap();
        engine.confirm_rental(&owner_actor, future.id).await.unwrap();

        assert_eq!(engine.collect_overdue(day(2, 1)), vec![past.id]);
        assert_eq!(sweep_overdue(&engine, day(2, 1)).await, 1);

        assert_eq!(
            engine.find_rental(past.id).await.unwrap().status,
            RentalStatus::Completed
        );
        assert_eq!(
            engine.find_rental(pending.id).await.unwrap().status,
            RentalStatus::Pending
        );
        assert_eq!(
            engine.find_rental(future.id).await.unwrap().status,
            RentalStatus::Confirmed
        );
        assert_eq!(sweep_overdue(&engine, day(2, 1)).await, 0);
    }
}
