use crate::config::{DeliveryConfig, WebSocketConfig};
use crate::dispatcher::Dispatcher;
use crate::lifecycle::SessionLifecycle;
use crate::registry::ConnectionRegistry;
use crate::services::NotificationService;
use crate::store::NotificationStore;
use crate::transport::ChannelTransport;
use std::sync::Arc;

/// Shared handles wired once at startup and cloned into every worker
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub transport: ChannelTransport,
    pub dispatcher: Arc<Dispatcher>,
    pub lifecycle: SessionLifecycle,
    pub notifications: Arc<NotificationService>,
    pub ws_config: WebSocketConfig,
}

impl AppState {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        delivery: &DeliveryConfig,
        ws_config: WebSocketConfig,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let transport = ChannelTransport::new(delivery.session_buffer_capacity);

        let dispatcher = Arc::new(
            Dispatcher::new(registry.clone(), Arc::new(transport.clone()))
                .with_store(store.clone())
                .with_push_timeout(delivery.push_timeout()),
        );

        let lifecycle = SessionLifecycle::with_tombstone_capacity(
            registry.clone(),
            delivery.session_tombstone_capacity,
        )
        .with_transport(transport.clone());

        let notifications = Arc::new(NotificationService::new(store, dispatcher.clone()));

        Self {
            registry,
            transport,
            dispatcher,
            lifecycle,
            notifications,
            ws_config,
        }
    }
}
