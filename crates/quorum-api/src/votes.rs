use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use quorum_types::api::{Claims, VoteRequest, VoteResponse};
use quorum_types::models::TargetRef;

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiResult;

pub async fn vote_question(
    state: State<AppState>,
    Path(question_id): Path<Uuid>,
    claims: Extension<Claims>,
    req: Json<VoteRequest>,
) -> ApiResult<Json<VoteResponse>> {
    vote(state, TargetRef::Question(question_id), claims, req).await
}

pub async fn vote_answer(
    state: State<AppState>,
    Path(answer_id): Path<Uuid>,
    claims: Extension<Claims>,
    req: Json<VoteRequest>,
) -> ApiResult<Json<VoteResponse>> {
    vote(state, TargetRef::Answer(answer_id), claims, req).await
}

/// Same vote twice removes it; the opposite vote switches sides.
async fn vote(
    State(state): State<AppState>,
    target: TargetRef,
    Extension(claims): Extension<Claims>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<Json<VoteResponse>> {
    let response = blocking(move || state.forum.vote(target, claims.sub, &req.vote_type)).await?;
    Ok(Json(response))
}
