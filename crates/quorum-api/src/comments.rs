use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use quorum_types::api::{
    Claims, CommentQuery, CreateCommentRequest, Page, PageRequest, UpdateCommentRequest,
};
use quorum_types::models::Comment;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiResult;

/// Exactly one of `question_id` / `answer_id` must be given.
pub async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<CommentQuery>,
) -> ApiResult<Json<Page<Comment>>> {
    let page = PageRequest::new(query.page, query.limit);
    let comments = blocking(move || {
        state
            .forum
            .list_comments(query.question_id, query.answer_id, page)
    })
    .await?;
    Ok(Json(comments))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let comment = blocking(move || {
        state
            .forum
            .create_comment(claims.sub, req.question_id, req.answer_id, &req.body)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateCommentRequest>,
) -> ApiResult<Json<Comment>> {
    let comment = blocking(move || state.forum.update_comment(comment_id, claims.sub, &req.body)).await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    blocking(move || state.forum.delete_comment(comment_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}
