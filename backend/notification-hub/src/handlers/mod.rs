/// HTTP handlers for the notification hub API
pub mod delivery;
pub mod websocket;

use serde::Serialize;

pub use delivery::register_routes as register_delivery;
pub use websocket::register_routes as register_websocket;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}
