use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::votes::{self, PollInput};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub author_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub options: Vec<PollOptionInput>,
}

#[derive(Deserialize)]
pub struct PollOptionInput {
    pub text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipateRequest {
    pub user_id: String,
    pub vote_option_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/vote", get(list_polls).post(create_poll))
        .route("/vote/user/created/{userId}", get(polls_created))
        .route("/vote/user/voted/{userId}", get(polls_voted))
        .route("/vote/{id}", get(get_poll).delete(delete_poll))
        .route("/vote/{id}/participateIn", post(participate))
        .route("/vote/{id}/checkUserVoted/{userId}", get(check_user_voted))
}

fn parse_date(raw: &str, field: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::BadRequest(format!("{field} is not a valid RFC 3339 date")))
}

async fn create_poll(
    State(state): State<AppState>,
    Json(req): Json<CreatePollRequest>,
) -> AppResult<Response> {
    let input = PollInput {
        author_id: req.author_id,
        title: req.title,
        description: req.description,
        start_date: parse_date(&req.start_date, "startDate")?,
        end_date: parse_date(&req.end_date, "endDate")?,
        options: req.options.into_iter().map(|o| o.text).collect(),
    };
    let poll = votes::create_poll(&state.db, &input)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": 201,
            "success": true,
            "message": "Vote created",
            "vote": poll,
        })),
    )
        .into_response())
}

/// GET /vote?userId= — all polls; with a userId each carries whether that
/// user has already cast a ballot.
async fn list_polls(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> AppResult<Response> {
    let polls = votes::list_polls(&state.db, query.user_id.as_deref())?;
    Ok(Json(json!({ "status": 200, "votes": polls })).into_response())
}

async fn get_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> AppResult<Response> {
    let poll = votes::get_poll(&state.db, &id, query.user_id.as_deref())?;
    Ok(Json(json!({ "status": 200, "vote": poll })).into_response())
}

async fn delete_poll(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    votes::delete_poll(&state.db, &id)?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Vote deleted",
    }))
    .into_response())
}

/// POST /vote/{id}/participateIn — one ballot per user per poll; a second
/// attempt is a conflict, decided by the storage constraint.
async fn participate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ParticipateRequest>,
) -> AppResult<Response> {
    let user_vote = votes::participate(&state.db, &id, &req.user_id, &req.vote_option_id)?;
    let poll = votes::get_poll(&state.db, &id, Some(&req.user_id))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": 201,
            "success": true,
            "message": "Participation recorded",
            "userVote": user_vote,
            "vote": poll,
        })),
    )
        .into_response())
}

async fn check_user_voted(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let existing = votes::has_participated(&state.db, &id, &user_id)?;
    Ok(Json(json!({
        "status": 200,
        "isVoted": existing.is_some(),
        "existingUserVote": existing,
    }))
    .into_response())
}

async fn polls_created(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Response> {
    let polls = votes::polls_created_by(&state.db, &user_id)?;
    Ok(Json(json!({ "status": 200, "votes": polls })).into_response())
}

async fn polls_voted(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Response> {
    let polls = votes::polls_participated_by(&state.db, &user_id)?;
    Ok(Json(json!({ "status": 200, "votes": polls })).into_response())
}
