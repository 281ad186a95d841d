pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod services;
pub mod state;
pub mod store;
pub mod transport;
pub mod websocket;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{AppError, Result};
pub use lifecycle::SessionLifecycle;
pub use registry::ConnectionRegistry;
pub use services::*;
pub use state::AppState;
pub use store::{InMemoryNotificationStore, NotificationStore, PgNotificationStore};
pub use transport::{ChannelTransport, PushError, SessionTransport};
pub use websocket::WebSocketMessage;
