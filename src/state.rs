//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::{
    BufferScheduler, RefineOrchestrator, SessionRegistry, UpstreamConfig, UpstreamRelay,
};

/// Application state shared by every handler.
///
/// Components are wired acyclically: the relay feeds the registry and the
/// buffer scheduler, the scheduler feeds the registry and the refiner, and
/// the refiner feeds the registry.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<BufferScheduler>,
    pub relay: Arc<UpstreamRelay>,
    pub refiner: Arc<RefineOrchestrator>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let refiner = Arc::new(RefineOrchestrator::from_config(&config, registry.clone()));
        let scheduler = Arc::new(BufferScheduler::new(
            config.buffer_flush_window,
            registry.clone(),
            refiner.clone(),
        ));
        let relay = Arc::new(UpstreamRelay::new(
            UpstreamConfig::from_server_config(&config),
            registry.clone(),
            scheduler.clone(),
        ));

        Arc::new(Self {
            config,
            registry,
            scheduler,
            relay,
            refiner,
        })
    }
}
