use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{tags_from_json, Article};
use crate::error::{AppError, AppResult};
use crate::posts::{self, PostKind};
use crate::routes::comments::comment_routes;
use crate::state::AppState;

const KIND: PostKind = PostKind::Article;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArticleRequest {
    pub author_id: String,
    pub title: String,
    pub sub_title: Option<String>,
    pub cover_image: Option<String>,
    pub content: String,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub image_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateArticleRequest {
    pub title: String,
    pub sub_title: Option<String>,
    pub cover_image: Option<String>,
    pub content: String,
    #[serde(default)]
    pub topic_tags: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/article", get(list_articles).post(create_article))
        .route(
            "/article/{id}",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route("/article/{id}/statistics/{action}", put(adjust_stats))
        .merge(comment_routes("/article", KIND))
}

async fn create_article(
    State(state): State<AppState>,
    Json(req): Json<CreateArticleRequest>,
) -> AppResult<Response> {
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("Title is required".into()));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let conn = state.db.get()?;
    conn.execute(
        "INSERT INTO articles (id, author_id, title, sub_title, cover_image, content, topic_tags) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            req.author_id,
            req.title,
            req.sub_title,
            req.cover_image,
            req.content,
            serde_json::to_string(&req.topic_tags)?,
        ],
    )?;
    posts::attach_images(&conn, KIND, &id, &req.image_ids)?;

    let article = fetch_article(&conn, &id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": 201,
            "success": true,
            "message": "Article created",
            "article": article,
        })),
    )
        .into_response())
}

/// GET /article — newest first, each with its comment count.
async fn list_articles(State(state): State<AppState>) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt =
        conn.prepare("SELECT id FROM articles ORDER BY created_at DESC, id DESC")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut articles = Vec::with_capacity(ids.len());
    for id in ids {
        let article = fetch_article(&conn, &id)?;
        let comment_count = posts::comment_count(&conn, KIND, &id)?;
        articles.push(json!({
            "id": article.id,
            "title": article.title,
            "topicTags": article.topic_tags,
            "coverImage": article.cover_image,
            "views": article.views,
            "likes": article.likes,
            "createdAt": article.created_at,
            "commentCount": comment_count,
        }));
    }

    Ok(Json(json!({
        "status": 200,
        "success": true,
        "articles": articles,
    }))
    .into_response())
}

async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let article = {
        let conn = state.db.get()?;
        fetch_article(&conn, &id)?
    };
    let comments = posts::list_comments(&state.db, KIND, &id)?;
    let images = {
        let conn = state.db.get()?;
        posts::load_images(&conn, KIND, &id)?
    };

    Ok(Json(json!({
        "status": 200,
        "success": true,
        "article": article,
        "comments": comments,
        "images": images,
    }))
    .into_response())
}

/// PUT /article/{id} — field update only; the article image set is managed
/// through its content, not a separate id list.
async fn update_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateArticleRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let rows = conn.execute(
        "UPDATE articles SET title = ?1, sub_title = ?2, cover_image = ?3, content = ?4, \
         topic_tags = ?5, updated_at = datetime('now') WHERE id = ?6",
        params![
            req.title,
            req.sub_title,
            req.cover_image,
            req.content,
            serde_json::to_string(&req.topic_tags)?,
            id,
        ],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }

    let article = fetch_article(&conn, &id)?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Article updated",
        "article": article,
    }))
    .into_response())
}

async fn delete_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    posts::delete_post_and_orphaned_images(&state.db, state.media.as_ref(), KIND, &id).await?;
    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Article and its images deleted",
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

pub fn fetch_article(conn: &Connection, id: &str) -> AppResult<Article> {
    conn.query_row(
        "SELECT id, author_id, title, sub_title, cover_image, content, topic_tags, \
                views, likes, created_at, updated_at \
         FROM articles WHERE id = ?1",
        params![id],
        |row| {
            Ok(Article {
                id: row.get(0)?,
                author_id: row.get(1)?,
                title: row.get(2)?,
                sub_title: row.get(3)?,
                cover_image: row.get(4)?,
                content: row.get(5)?,
                topic_tags: tags_from_json(&row.get::<_, String>(6)?),
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
