use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::models::Notification;
use crate::store::NotificationStore;

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Notifications
// ============================================================

pub async fn list_notifications(State(store): State<NotificationStore>) -> Json<Vec<Notification>> {
    Json(store.list())
}

/// Idempotent: marking an already-read notification succeeds again.
pub async fn mark_read(
    State(store): State<NotificationStore>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if store.mark_read(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        tracing::warn!(%id, "mark-as-read for unknown notification");
        Err((StatusCode::NOT_FOUND, "Notification not found".to_string()))
    }
}
