//! REST surface. Handlers are thin: they extract, hand the work to
//! [`quorum_core::Forum`] on the blocking pool, and map errors to statuses.

pub mod answers;
pub mod auth;
pub mod comments;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod questions;
pub mod votes;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use serde_json::{Value, json};
use tracing::error;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// All REST routes, unprefixed. Reads are public, writes need a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/questions", get(questions::list_questions))
        .route("/questions/{id}", get(questions::get_question))
        .route("/answers/question/{question_id}", get(answers::list_answers))
        .route("/comments", get(comments::list_comments))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/questions", post(questions::create_question))
        .route(
            "/questions/{id}",
            put(questions::update_question).delete(questions::delete_question),
        )
        .route("/questions/{id}/like", post(questions::like_question))
        .route("/answers/question/{question_id}", post(answers::create_answer))
        .route(
            "/answers/{id}",
            put(answers::update_answer).delete(answers::delete_answer),
        )
        .route("/answers/{id}/accept", put(answers::accept_answer))
        .route("/answers/{id}/like", post(answers::like_answer))
        .route("/votes/question/{id}", post(votes::vote_question))
        .route("/votes/answer/{id}", post(votes::vote_answer))
        .route("/comments", post(comments::create_comment))
        .route(
            "/comments/{id}",
            put(comments::update_comment).delete(comments::delete_comment),
        )
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", put(notifications::mark_all_read))
        .route("/notifications/{id}/read", put(notifications::mark_read))
        .route("/notifications/{id}", axum::routing::delete(notifications::delete_notification))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Run store-bound work off the async runtime.
pub(crate) async fn blocking<F, T, E>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("worker task failed"))
        })?
        .map_err(Into::into)
}
