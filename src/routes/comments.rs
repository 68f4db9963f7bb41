use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::posts::{self, PostKind};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub author_id: String,
    pub content: String,
}

/// Comment sub-routes shared by the three post kinds, mounted under each
/// kind's prefix: GET/POST {prefix}/comments/{postId}, DELETE
/// {prefix}/comment/{id}.
pub fn comment_routes(prefix: &'static str, kind: PostKind) -> Router<AppState> {
    let list = move |State(state): State<AppState>,
                     Path(post_id): Path<String>| async move {
        let comments = posts::list_comments(&state.db, kind, &post_id)?;
        Ok::<Response, AppError>(Json(comments).into_response())
    };

    let create = move |State(state): State<AppState>,
                       Path(post_id): Path<String>,
                       Json(req): Json<CreateCommentRequest>| async move {
        let comment =
            posts::create_comment(&state.db, kind, &post_id, &req.author_id, &req.content)?;
        Ok::<Response, AppError>(
            (
                StatusCode::CREATED,
                Json(json!({
                    "status": 201,
                    "success": true,
                    "message": "Comment created",
                    "comment": comment,
                })),
            )
                .into_response(),
        )
    };

    let remove = move |State(state): State<AppState>, Path(id): Path<String>| async move {
        posts::delete_comment(&state.db, &id)?;
        Ok::<Response, AppError>(
            Json(json!({
                "status": 200,
                "success": true,
                "message": "Comment deleted",
            }))
            .into_response(),
        )
    };

    Router::new()
        .route(
            &format!("{prefix}/comments/{{postId}}"),
            get(list).post(create),
        )
        .route(&format!("{prefix}/comment/{{id}}"), delete(remove))
}
