use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use uuid::Uuid;

use quorum_types::api::{
    AnswerQuery, Claims, CreateAnswerRequest, LikeResponse, Page, PageRequest, UpdateAnswerRequest,
};
use quorum_types::models::{Answer, TargetRef};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiResult;

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub answer: Answer,
    pub previous_answer_id: Option<Uuid>,
}

pub async fn list_answers(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Query(query): Query<AnswerQuery>,
) -> ApiResult<Json<Page<Answer>>> {
    let page = PageRequest::new(query.page, query.limit);
    let answers = blocking(move || state.forum.list_answers(question_id, page, query.sort)).await?;
    Ok(Json(answers))
}

pub async fn create_answer(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateAnswerRequest>,
) -> ApiResult<impl IntoResponse> {
    let answer = blocking(move || state.forum.create_answer(question_id, claims.sub, &req.body)).await?;
    Ok((StatusCode::CREATED, Json(answer)))
}

pub async fn update_answer(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateAnswerRequest>,
) -> ApiResult<Json<Answer>> {
    let answer = blocking(move || state.forum.update_answer(answer_id, claims.sub, &req.body)).await?;
    Ok(Json(answer))
}

pub async fn delete_answer(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    blocking(move || state.forum.delete_answer(answer_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Question author only. Accepting the already-accepted answer is a no-op.
pub async fn accept_answer(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<AcceptResponse>> {
    let acceptance = blocking(move || state.forum.accept_answer(answer_id, claims.sub)).await?;
    Ok(Json(AcceptResponse {
        answer: acceptance.answer,
        previous_answer_id: acceptance.previous_answer_id,
    }))
}

pub async fn like_answer(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<LikeResponse>> {
    let target = TargetRef::Answer(answer_id);
    let like = blocking(move || state.forum.like(target, claims.sub)).await?;
    Ok(Json(like))
}
