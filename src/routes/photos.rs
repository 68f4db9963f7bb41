use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::PhotoPost;
use crate::error::{AppError, AppResult};
use crate::posts::{self, PostKind};
use crate::routes::comments::comment_routes;
use crate::routes::users::fetch_user;
use crate::state::AppState;

const KIND: PostKind = PostKind::Photo;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePhotoPostRequest {
    pub author_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub geometry: Option<serde_json::Value>,
    pub image_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePhotoPostRequest {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub geometry: Option<serde_json::Value>,
    pub image_ids: Option<Vec<String>>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/photoPost", get(list_posts).post(create_post))
        .route("/photoPost/user/{authorId}", get(list_user_posts))
        .route(
            "/photoPost/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/photoPost/{id}/statistics/{action}", put(adjust_stats))
        .merge(comment_routes("/photoPost", KIND))
}

/// POST /photoPost — a photo post is its images; at least one is required.
async fn create_post(
    State(state): State<AppState>,
    Json(req): Json<CreatePhotoPostRequest>,
) -> AppResult<Response> {
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("Title is required".into()));
    }
    if req.image_ids.is_empty() {
        return Err(AppError::BadRequest(
            "At least one image is required".into(),
        ));
    }

    let geometry = match &req.geometry {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };
    let id = uuid::Uuid::now_v7().to_string();
    let conn = state.db.get()?;
    conn.execute(
        "INSERT INTO photo_posts (id, author_id, title, description, location, geometry) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, req.author_id, req.title, req.description, req.location, geometry],
    )?;
    posts::attach_images(&conn, KIND, &id, &req.image_ids)?;

    let post = post_with_images(&conn, &id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": 201,
            "success": true,
            "message": "Photo post created",
            "post": post,
        })),
    )
        .into_response())
}

/// GET /photoPost — gallery listing, newest first. Only the first image per
/// post is sent; the rest load with the detail view.
async fn list_posts(State(state): State<AppState>) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt =
        conn.prepare("SELECT id FROM photo_posts ORDER BY created_at DESC, id DESC")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut posts_json = Vec::with_capacity(ids.len());
    for id in ids {
        let post = fetch_post(&conn, &id)?;
        let images = posts::load_images(&conn, KIND, &id)?;
        let mut body = serde_json::to_value(&post)?;
        body["images"] = serde_json::to_value(images.first().into_iter().collect::<Vec<_>>())?;
        posts_json.push(body);
    }

    Ok(Json(json!({
        "status": 200,
        "success": true,
        "posts": posts_json,
    }))
    .into_response())
}

async fn list_user_posts(
    State(state): State<AppState>,
    Path(author_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(
        "SELECT id FROM photo_posts WHERE author_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let ids = stmt
        .query_map(params![author_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut posts_json = Vec::with_capacity(ids.len());
    for id in ids {
        posts_json.push(post_with_images(&conn, &id)?);
    }
    Ok(Json(posts_json).into_response())
}

async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let mut body = {
        let conn = state.db.get()?;
        let mut body = post_with_images(&conn, &id)?;
        let author_id = body["authorId"]
            .as_str()
            .map(str::to_owned)
            .unwrap_or_default();
        body["author"] = serde_json::to_value(fetch_user(&conn, &author_id)?)?;
        body
    };
    let comments = posts::list_comments(&state.db, KIND, &id)?;
    body["comments"] = serde_json::to_value(comments)?;

    Ok(Json(json!({
        "status": 200,
        "success": true,
        "post": body,
    }))
    .into_response())
}

async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePhotoPostRequest>,
) -> AppResult<Response> {
    let geometry = match &req.geometry {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };
    let conn = state.db.get()?;
    let rows = conn.execute(
        "UPDATE photo_posts SET title = ?1, description = ?2, location = ?3, geometry = ?4, \
         is_edit = 1, updated_at = datetime('now') WHERE id = ?5",
        params![req.title, req.description, req.location, geometry, id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }

    if let Some(ref image_ids) = req.image_ids {
        posts::sync_images(&conn, KIND, &id, image_ids)?;
    }

    let post = post_with_images(&conn, &id)?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Photo post updated",
        "post": post,
    }))
    .into_response())
}

async fn delete_post(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    posts::delete_post_and_orphaned_images(&state.db, state.media.as_ref(), KIND, &id).await?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Photo post and its images deleted",
    }))
    .into_response())
}

async fn adjust_stats(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> AppResult<Response> {
    posts::adjust_stat(&state.db, KIND, &id, &action)?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Statistics updated",
    }))
    .into_response())
}

fn fetch_post(conn: &Connection, id: &str) -> AppResult<PhotoPost> {
    conn.query_row(
        "SELECT id, author_id, title, description, location, geometry, is_edit, views, likes, \
                created_at, updated_at \
         FROM photo_posts WHERE id = ?1",
        params![id],
        |row| {
            Ok(PhotoPost {
                id: row.get(0)?,
                author_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                location: row.get(4)?,
                geometry: row.get(5)?,
                is_edit: row.get(6)?,
                views: row.get(7)?,
                likes: row.get(8)?,
                created_at: row.get(9)?,
                updated_at: row.get(10)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })
}

fn post_with_images(conn: &Connection, id: &str) -> AppResult<serde_json::Value> {
    let post = fetch_post(conn, id)?;
    let images = posts::load_images(conn, KIND, id)?;
    let mut body = serde_json::to_value(&post)?;
    body["images"] = serde_json::to_value(&images)?;
    Ok(body)
}
