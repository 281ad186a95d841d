/// WebSocket handlers
///
/// Connection status endpoints plus the upgrade route. Live sessions are
/// served by `WsSession` under /ws/{user_id}.
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{RecipientId, SessionHandle};
use crate::state::AppState;
use crate::websocket::WsSession;

/// Upgrade to a WebSocket session for a user
///
/// Endpoint: GET /ws/{user_id}
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    if state.registry.is_shut_down().await {
        return Err(AppError::ShuttingDown.into());
    }

    let recipient = RecipientId::from(path.into_inner());
    let session = SessionHandle::new();
    let outbound = state.transport.attach(session);

    let actor = WsSession::new(session, recipient, state.get_ref().clone(), outbound);
    ws::start(actor, &req, stream).map_err(|e| {
        warn!("WebSocket handshake failed for user {}: {}", recipient, e);
        state.transport.detach(session);
        e
    })
}

/// Get WebSocket connection status for a user
///
/// Endpoint: GET /api/v1/ws/status/{user_id}
pub async fn ws_status(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let user_id = path.into_inner();

    let connection_count = state
        .registry
        .connection_count(RecipientId::from(user_id))
        .await;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": user_id.to_string(),
        "connected": connection_count > 0,
        "connection_count": connection_count
    })))
}

/// Get connection metrics
///
/// Endpoint: GET /api/v1/ws/metrics
pub async fn ws_metrics(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let total_connections = state.registry.total_sessions().await;
    let connected_users = state.registry.connected_recipients_count().await;

    Ok(HttpResponse::Ok().json(json!({
        "total_connections": total_connections,
        "connected_users": connected_users,
        "buffered_sessions": state.transport.attached_count(),
        "average_connections_per_user": if connected_users > 0 {
            total_connections as f64 / connected_users as f64
        } else {
            0.0
        }
    })))
}

/// Get list of all connected user IDs
///
/// Endpoint: GET /api/v1/ws/users
pub async fn list_connected_users(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let mut user_ids: Vec<RecipientId> = state.registry.all_recipients().await.into_iter().collect();
    user_ids.sort();

    Ok(HttpResponse::Ok().json(json!({
        "count": user_ids.len(),
        "users": user_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
    })))
}

/// Register WebSocket routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/{user_id}", web::get().to(ws_connect)).service(
        web::scope("/api/v1/ws")
            .route("/status/{user_id}", web::get().to(ws_status))
            .route("/metrics", web::get().to(ws_metrics))
            .route("/users", web::get().to(list_connected_users)),
    );
}
