/// Delivery handlers
///
/// Entry point for domain services that want a notification persisted and
/// pushed to whoever is online.
use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::models::{DeliveryTarget, NotificationDraft, RecipientId};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliverRequest {
    pub target: DeliveryTarget,
    pub notification: NotificationDraft,
}

#[derive(Debug, Deserialize)]
pub struct UnreadQuery {
    pub limit: Option<usize>,
}

/// Persist and deliver a notification
///
/// POST /api/v1/notifications/deliver
pub async fn deliver_notification(
    state: web::Data<AppState>,
    req: web::Json<DeliverRequest>,
) -> Result<HttpResponse> {
    let DeliverRequest {
        target,
        notification,
    } = req.into_inner();

    if notification.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".to_string()));
    }

    let report = state.notifications.publish(notification, target).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(report)))
}

/// Unread notifications for a user, newest first
///
/// GET /api/v1/notifications/unread/{user_id}?limit=N
pub async fn list_unread(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<UnreadQuery>,
) -> Result<HttpResponse> {
    let recipient = RecipientId::from(path.into_inner());
    let limit = query
        .limit
        .unwrap_or(state.ws_config.unread_backlog_limit)
        .min(500);

    let unread = state.notifications.unread_for(recipient, limit).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(unread)))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/notifications")
            .route("/deliver", web::post().to(deliver_notification))
            .route("/unread/{user_id}", web::get().to(list_unread)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deliver_request_parses_tagged_target() {
        let recipient = Uuid::new_v4();
        let body = json!({
            "target": { "type": "single", "recipient_id": recipient },
            "notification": {
                "notification_type": "REVIEW_COMPLETED",
                "title": "Review done",
                "body": "Your submission was reviewed"
            }
        });

        let req: DeliverRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.target, DeliveryTarget::single(RecipientId::from(recipient)));
        assert!(req.notification.sender_id.is_none());
        assert!(req.notification.correlation.is_none());
    }

    #[test]
    fn test_deliver_request_parses_broadcast() {
        let body = json!({
            "target": { "type": "broadcast" },
            "notification": {
                "notification_type": "SYSTEM",
                "title": "Maintenance",
                "body": "Back soon"
            }
        });

        let req: DeliverRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.target, DeliveryTarget::Broadcast);
    }
}
