use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{tags_from_json, CommunityPost};
use crate::error::{AppError, AppResult};
use crate::posts::{self, PostKind};
use crate::routes::comments::comment_routes;
use crate::routes::users::fetch_user;
use crate::state::AppState;

const KIND: PostKind = PostKind::Community;

/// Page size for the community feed.
const PAGE_SIZE: i64 = 6;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommunityPostRequest {
    pub author_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub image_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommunityPostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    pub image_ids: Option<Vec<String>>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/communityPost", post(create_post))
        .route("/communityPost/all/{startFromLast}", get(list_posts))
        .route("/communityPost/user/{authorId}", get(list_user_posts))
        .route(
            "/communityPost/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/communityPost/{id}/statistics/{action}", put(adjust_stats))
        .merge(comment_routes("/communityPost", KIND))
}

async fn create_post(
    State(state): State<AppState>,
    Json(req): Json<CreateCommunityPostRequest>,
) -> AppResult<Response> {
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("Title is required".into()));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let conn = state.db.get()?;
    conn.execute(
        "INSERT INTO community_posts (id, author_id, title, content, topic_tags, is_edit) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            id,
            req.author_id,
            req.title,
            req.content,
            serde_json::to_string(&req.topic_tags)?,
        ],
    )?;
    posts::attach_images(&conn, KIND, &id, &req.image_ids)?;

    let post = fetch_post(&conn, &id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": 201,
            "success": true,
            "message": "Community post created",
            "post": post,
        })),
    )
        .into_response())
}

/// GET /communityPost/all/{startFromLast} — newest first, six at a time,
/// with the total for the client's pager.
async fn list_posts(
    State(state): State<AppState>,
    Path(start_from_last): Path<i64>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let total_count: i64 =
        conn.query_row("SELECT COUNT(*) FROM community_posts", [], |row| row.get(0))?;

    let mut stmt = conn.prepare(
        "SELECT id FROM community_posts ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
    )?;
    let ids = stmt
        .query_map(params![PAGE_SIZE, start_from_last.max(0)], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut posts_json = Vec::with_capacity(ids.len());
    for id in ids {
        posts_json.push(post_with_author(&conn, &id)?);
    }

    Ok(Json(json!({
        "status": 200,
        "posts": posts_json,
        "totalCount": total_count,
    }))
    .into_response())
}

async fn list_user_posts(
    State(state): State<AppState>,
    Path(author_id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(
        "SELECT id FROM community_posts WHERE author_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let ids = stmt
        .query_map(params![author_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut posts_json = Vec::with_capacity(ids.len());
    for id in ids {
        posts_json.push(post_with_author(&conn, &id)?);
    }
    Ok(Json(posts_json).into_response())
}

async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let body = {
        let conn = state.db.get()?;
        post_with_author(&conn, &id)?
    };
    let comments = posts::list_comments(&state.db, KIND, &id)?;

    let mut body = body;
    body["comments"] = serde_json::to_value(comments)?;
    Ok(Json(body).into_response())
}

/// PUT /communityPost/{id} — field update plus the image-set diff when an id
/// list is supplied; marks the post edited.
async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCommunityPostRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let rows = conn.execute(
        "UPDATE community_posts SET title = ?1, content = ?2, topic_tags = ?3, is_edit = 1, \
         updated_at = datetime('now') WHERE id = ?4",
        params![
            req.title,
            req.content,
            serde_json::to_string(&req.topic_tags)?,
            id,
        ],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }

    if let Some(ref image_ids) = req.image_ids {
        posts::sync_images(&conn, KIND, &id, image_ids)?;
    }

    let post = fetch_post(&conn, &id)?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Community post updated",
        "post": post,
    }))
    .into_response())
}

async fn delete_post(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    posts::delete_post_and_orphaned_images(&state.db, state.media.as_ref(), KIND, &id).await?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Community post and its images deleted",
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

fn fetch_post(conn: &Connection, id: &str) -> AppResult<CommunityPost> {
    conn.query_row(
        "SELECT id, author_id, title, content, topic_tags, is_edit, views, likes, \
                created_at, updated_at \
         FROM community_posts WHERE id = ?1",
        params![id],
        |row| {
            Ok(CommunityPost {
                id: row.get(0)?,
                author_id: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
                topic_tags: tags_from_json(&row.get::<_, String>(4)?),
                is_edit: row.get(5)?,
                views: row.get(6)?,
                likes: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })
}

fn post_with_author(conn: &Connection, id: &str) -> AppResult<serde_json::Value> {
    let post = fetch_post(conn, id)?;
    let author = fetch_user(conn, &post.author_id)?;
    let images = posts::load_images(conn, KIND, id)?;
    let comment_count = posts::comment_count(conn, KIND, id)?;

    let mut body = serde_json::to_value(&post)?;
    body["author"] = serde_json::to_value(&author)?;
    body["images"] = serde_json::to_value(&images)?;
    body["commentCount"] = json!(comment_count);
    Ok(body)
}
