use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use uuid::Uuid;

use quorum_types::api::{Claims, NotificationQuery, Page, PageRequest, UnreadCount};
use quorum_types::models::Notification;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiResult;

/// Newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Page<Notification>>> {
    let page = PageRequest::new(query.page, query.limit);
    let notifications = blocking(move || {
        state
            .forum
            .notifications()
            .list(claims.sub, page, query.unread_only)
    })
    .await?;
    Ok(Json(notifications))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UnreadCount>> {
    let count = blocking(move || state.forum.notifications().unread_count(claims.sub)).await?;
    Ok(Json(UnreadCount { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Notification>> {
    let notification = blocking(move || {
        state
            .forum
            .notifications()
            .mark_read(notification_id, claims.sub)
    })
    .await?;
    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Value>> {
    let updated = blocking(move || state.forum.notifications().mark_all_read(claims.sub)).await?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    blocking(move || state.forum.notifications().delete(notification_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}
