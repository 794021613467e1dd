use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::directory::Directories;
use crate::engine::Engine;
use crate::notify::NotifyHub;
use crate::reaper;

/// A running engine plus its background sweeper and compactor.
/// Dropping the service stops the background tasks.
pub struct Service {
    engine: Arc<Engine>,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Stop background tasks. Committed state is already durable.
    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Open (or recover) the engine under `config.data_dir` and start its
/// background tasks. Must be called from inside a tokio runtime.
pub fn launch(config: &EngineConfig, directories: Directories) -> std::io::Result<Service> {
    std::fs::create_dir_all(&config.data_dir)?;

    let wal_path = config.wal_path();
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(wal_path.clone(), notify, directories)?);

    let sweeper = tokio::spawn(reaper::run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    tracing::info!("rentbook engine ready (wal: {})", wal_path.display());
    Ok(Service {
        engine,
        tasks: vec![sweeper, compactor],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    use crate::directory::InMemoryDirectory;
    use crate::model::*;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentbook_test_service").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn config(dir: PathBuf) -> EngineConfig {
        EngineConfig {
            data_dir: dir,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn launch_creates_data_dir_and_wal() {
        let dir = test_data_dir("creates_dir");
        let service = launch(&config(dir.clone()), Arc::new(InMemoryDirectory::new()).directories())
            .unwrap();
        assert!(dir.join("rentals.wal").exists());
        service.shutdown();
    }

    #[tokio::test]
    async fn relaunch_recovers_committed_rentals() {
        let dir = test_data_dir("recover");
        let directory = Arc::new(InMemoryDirectory::new());
        let client = Ulid::new();
        let vehicle = Ulid::new();
        directory.register_client(client, RoleSet::of(&[Role::Tenant]));
        directory.register_vehicle(vehicle, Ulid::new());
        let actor = Actor::new(client, RoleSet::of(&[Role::Tenant]));

        let created = {
            let service = launch(&config(dir.clone()), directory.directories()).unwrap();
            let rental = service
                .engine()
                .create_rental(
                    &actor,
                    NewRental {
                        client_id: client,
                        vehicle_id: vehicle,
                        initial_date: NaiveDate::from_ymd_opt(2032, 6, 1).unwrap(),
                        final_date: NaiveDate::from_ymd_opt(2032, 6, 4).unwrap(),
                        total_cost: Decimal::new(45000, 2),
                    },
                )
                .await
                .unwrap();
            service.shutdown();
            rental
        };

        let service = launch(&config(dir), directory.directories()).unwrap();
        let found = service.engine().find_rental(created.id).await.unwrap();
        assert_eq!(found, created);
        assert_eq!(
            service.engine().find_rentals_by_client(client).await,
            vec![created]
        );
    }
}
