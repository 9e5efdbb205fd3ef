use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::cache::ContentCache;
use crate::config::Config;
use crate::db::ContentStore;
use crate::services::StorageGateway;
use crate::ws::persistence::{PersistenceCoordinator, PersistenceHandle};
use crate::ws::registry::{ConnectionRegistry, RegistryHandle};
use crate::ws::relay::{SyncBus, SyncRelay};

/// The external collaborators the core runs on
pub struct Backends {
    pub store: Arc<dyn ContentStore>,
    pub cache: Arc<dyn ContentCache>,
    pub bus: Arc<dyn SyncBus>,
}

/// Shared by every request handler
pub struct AppState {
    pub instance_id: Uuid,
    pub registry: RegistryHandle,
    pub relay: Arc<SyncRelay>,
    pub gateway: Arc<StorageGateway>,
    pub persistence: PersistenceHandle,
    pub session_queue_capacity: usize,
}

impl AppState {
    /// Spawn the registry, persistence, bus listener and cleanup loops
    pub fn start(backends: Backends, config: &Config) -> Arc<Self> {
        let relay = Arc::new(SyncRelay::new(backends.bus, Uuid::new_v4()));
        info!("Starting instance {}", relay.instance_id());

        let gateway = Arc::new(StorageGateway::new(backends.store, backends.cache));

        let (coordinator, persistence) = PersistenceCoordinator::new(
            gateway.clone(),
            config.save_queue_capacity,
            config.flush_interval(),
        );
        tokio::spawn(coordinator.run());

        let (registry, registry_handle) = ConnectionRegistry::new(
            persistence.clone(),
            config.registry_queue_capacity,
            config.persist_remote,
        );
        tokio::spawn(registry.run());

        relay.clone().spawn_listener(registry_handle.clone());

        gateway
            .clone()
            .spawn_cleanup_worker(config.cleanup_interval(), config.cleanup_max_age());

        Arc::new(Self {
            instance_id: relay.instance_id(),
            registry: registry_handle,
            relay,
            gateway,
            persistence,
            session_queue_capacity: config.session_queue_capacity,
        })
    }
}
