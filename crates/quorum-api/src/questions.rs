use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use quorum_types::api::{
    Claims, CreateQuestionRequest, LikeResponse, Page, PageRequest, QuestionDetail, QuestionQuery,
    UpdateQuestionRequest,
};
use quorum_types::models::{Question, TargetRef};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiResult;

pub async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<QuestionQuery>,
) -> ApiResult<Json<Page<Question>>> {
    let page = PageRequest::new(query.page, query.limit);
    let page = blocking(move || {
        state
            .forum
            .list_questions(page, query.sort, query.order, query.search.as_deref())
    })
    .await?;
    Ok(Json(page))
}

/// Every call counts as a view.
pub async fn get_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
) -> ApiResult<Json<QuestionDetail>> {
    let detail = blocking(move || state.forum.view_question(question_id)).await?;
    Ok(Json(detail))
}

pub async fn create_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateQuestionRequest>,
) -> ApiResult<impl IntoResponse> {
    let question = blocking(move || state.forum.create_question(claims.sub, req)).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn update_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateQuestionRequest>,
) -> ApiResult<Json<Question>> {
    let question = blocking(move || state.forum.update_question(question_id, claims.sub, req)).await?;
    Ok(Json(question))
}

pub async fn delete_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    blocking(move || state.forum.delete_question(question_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn like_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<LikeResponse>> {
    let target = TargetRef::Question(question_id);
    let like = blocking(move || state.forum.like(target, claims.sub)).await?;
    Ok(Json(like))
}
