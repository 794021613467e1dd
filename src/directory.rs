use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use ulid::Ulid;

use crate::model::RoleSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleRecord {
    pub id: Ulid,
    pub owner_id: Ulid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: Ulid,
    /// Roles the user holds outside of grants recorded by the engine.
    pub roles: RoleSet,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves vehicles and their owners. `Ok(None)` means the vehicle does not exist.
#[async_trait]
pub trait VehicleDirectory: Send + Sync {
    async fn resolve_vehicle(&self, id: Ulid) -> Result<Option<VehicleRecord>, DirectoryError>;
}

/// Resolves clients (users). `Ok(None)` means the client does not exist.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn resolve_client(&self, id: Ulid) -> Result<Option<ClientRecord>, DirectoryError>;
}

/// The collaborators an engine is wired to.
#[derive(Clone)]
pub struct Directories {
    pub vehicles: Arc<dyn VehicleDirectory>,
    pub clients: Arc<dyn ClientDirectory>,
}

/// Directory backed by in-process maps. Used for embedding and tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    vehicles: DashMap<Ulid, VehicleRecord>,
    clients: DashMap<Ulid, ClientRecord>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_vehicle(&self, id: Ulid, owner_id: Ulid) {
        self.vehicles.insert(id, VehicleRecord { id, owner_id });
    }

    pub fn remove_vehicle(&self, id: &Ulid) {
        self.vehicles.remove(id);
    }

    pub fn register_client(&self, id: Ulid, roles: RoleSet) {
        self.clients.insert(id, ClientRecord { id, roles });
    }

    /// Wire one shared directory as both collaborators.
    pub fn directories(self: &Arc<Self>) -> Directories {
        Directories {
            vehicles: self.clone(),
            clients: self.clone(),
        }
    }
}

#[async_trait]
impl VehicleDirectory for InMemoryDirectory {
    async fn resolve_vehicle(&self, id: Ulid) -> Result<Option<VehicleRecord>, DirectoryError> {
        Ok(self.vehicles.get(&id).map(|e| *e.value()))
    }
}

#[async_trait]
impl ClientDirectory for InMemoryDirectory {
    async fn resolve_client(&self, id: Ulid) -> Result<Option<ClientRecord>, DirectoryError> {
        Ok(self.clients.get(&id).map(|e| *e.value()))
    }
}
