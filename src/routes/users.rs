use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{self, token};
use crate::db::models::{tags_from_json, User};
use crate::error::{on_constraint, AppError, AppResult};
use crate::extractors::MaybeUser;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
    #[serde(default)]
    pub selected_avatar_index: i64,
    #[serde(default)]
    pub selected_tags: Vec<String>,
    pub intro: Option<String>,
    #[serde(default)]
    pub interested_topics: Vec<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    #[serde(default)]
    pub selected_avatar_index: i64,
    #[serde(default)]
    pub selected_tags: Vec<String>,
    pub intro: Option<String>,
    #[serde(default)]
    pub interested_topics: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub email: String,
    pub username: String,
    pub profile: ProfileFields,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub new_password: String,
}

// -- Router --

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/auth/user",
            get(get_user_by_token).post(register).put(update_user),
        )
        .route("/auth/user/login", post(login))
        .route("/auth/user/checkEmail/{email}", get(check_email))
        .route(
            "/auth/user/{id}",
            get(get_user_by_id)
                .put(update_user_by_id)
                .delete(delete_user),
        )
        .route("/auth/user/{id}/password", put(update_password))
        .route("/auth/users", get(list_users))
}

// -- Handlers --

/// POST /auth/user — register a new account. The UNIQUE(email) constraint is
/// what decides duplicates; the insert error maps straight to Conflict.
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Response> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    if req.password.len() < 8 {
        return Err(AppError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }
    if req.username.trim().is_empty() {
        return Err(AppError::BadRequest("Username is required".into()));
    }

    let password_hash = auth::hash_password(&req.password)?;
    let id = uuid::Uuid::now_v7().to_string();

    let conn = state.db.get()?;
    conn.execute(
        "INSERT INTO users (id, email, password_hash, username, avatar_index, tags, intro, interested_topics) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            email,
            password_hash,
            req.username.trim(),
            req.selected_avatar_index,
            serde_json::to_string(&req.selected_tags)?,
            req.intro,
            serde_json::to_string(&req.interested_topics)?,
        ],
    )
    .map_err(|e| on_constraint(e, "Email is already registered"))?;

    let user = fetch_user(&conn, &id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": 201,
            "success": true,
            "message": "User created",
            "user": user,
        })),
    )
        .into_response())
}

/// POST /auth/user/login — verify credentials, issue a 12-hour signed token.
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let email = req.email.trim().to_lowercase();

    let user = {
        let conn = state.db.get()?;
        match conn.query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![email],
            |row| row.get::<_, String>(0),
        ) {
            Ok(id) => fetch_user(&conn, &id)?,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Err(AppError::Unauthorized),
            Err(e) => return Err(e.into()),
        }
    };

    if !auth::verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = token::issue(
        &state.config.auth.token_secret,
        &user.id,
        &user.email,
        state.config.auth.token_hours,
    )?;

    Ok(Json(json!({
        "status": 200,
        "message": "Login successful",
        "token": token,
        "user": user,
    }))
    .into_response())
}

/// GET /auth/user — resolve the caller from their token. A missing header is
/// a 401; a malformed or expired token is anonymous (200, user null), so
/// clients can fall back to the login flow without error handling.
async fn get_user_by_token(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Response> {
    match user {
        Some(current) => {
            let conn = state.db.get()?;
            let user = fetch_user(&conn, &current.id)?;
            Ok(Json(json!({ "status": 200, "user": user })).into_response())
        }
        None => Ok(Json(json!({
            "status": 200,
            "user": null,
            "message": "Invalid or expired token",
        }))
        .into_response()),
    }
}

/// PUT /auth/user — update profile, addressed by email.
async fn update_user(
    State(state): State<AppState>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let rows = conn.execute(
        "UPDATE users SET username = ?1, avatar_index = ?2, tags = ?3, intro = ?4, \
         interested_topics = ?5 WHERE email = ?6",
        params![
            req.username,
            req.profile.selected_avatar_index,
            serde_json::to_string(&req.profile.selected_tags)?,
            req.profile.intro,
            serde_json::to_string(&req.profile.interested_topics)?,
            req.email.trim().to_lowercase(),
        ],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }

    let id: String = conn.query_row(
        "SELECT id FROM users WHERE email = ?1",
        params![req.email.trim().to_lowercase()],
        |row| row.get(0),
    )?;
    let user = fetch_user(&conn, &id)?;
    Ok(Json(json!({ "status": 200, "user": user })).into_response())
}

async fn get_user_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = fetch_user(&conn, &id)?;
    Ok(Json(json!({ "status": 200, "user": user })).into_response())
}

/// GET /auth/user/checkEmail/{email}
async fn check_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
        params![email.trim().to_lowercase()],
        |row| row.get(0),
    )?;
    Ok(Json(json!({ "status": 200, "exists": exists })).into_response())
}

async fn list_users(State(state): State<AppState>) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare("SELECT id FROM users ORDER BY created_at DESC, id DESC")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        users.push(fetch_user(&conn, &id)?);
    }
    Ok(Json(json!({ "status": 200, "users": users })).into_response())
}

/// PUT /auth/user/{id} — admin-side profile update, may change the email.
async fn update_user_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let rows = conn
        .execute(
            "UPDATE users SET email = ?1, username = ?2, avatar_index = ?3, tags = ?4, \
             intro = ?5, interested_topics = ?6 WHERE id = ?7",
            params![
                req.email.trim().to_lowercase(),
                req.username,
                req.profile.selected_avatar_index,
                serde_json::to_string(&req.profile.selected_tags)?,
                req.profile.intro,
                serde_json::to_string(&req.profile.interested_topics)?,
                id,
            ],
        )
        .map_err(|e| on_constraint(e, "Email is already registered"))?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }

    let user = fetch_user(&conn, &id)?;
    Ok(Json(json!({
        "status": 200,
        "user": user,
        "message": "User updated",
    }))
    .into_response())
}

/// PUT /auth/user/{id}/password — re-hash and store.
async fn update_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePasswordRequest>,
) -> AppResult<Response> {
    if req.new_password.len() < 8 {
        return Err(AppError::BadRequest(
            "Password must be at least 8 characters".into(),
        ));
    }
    let password_hash = auth::hash_password(&req.new_password)?;

    let conn = state.db.get()?;
    let rows = conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![password_hash, id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "status": 200, "message": "Password updated" })).into_response())
}

/// DELETE /auth/user/{id} — owned posts, comments, votes and participations
/// go via the schema cascades.
async fn delete_user(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let conn = state.db.get()?;
    let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "status": 200, "message": "User deleted" })).into_response())
}

// -- Row helpers --

pub fn fetch_user(conn: &Connection, id: &str) -> AppResult<User> {
    conn.query_row(
        "SELECT id, email, password_hash, username, avatar_index, tags, intro, \
                interested_topics, created_at \
         FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
                password_hash: row.get(2)?,
                username: row.get(3)?,
                avatar_index: row.get(4)?,
                tags: tags_from_json(&row.get::<_, String>(5)?),
                intro: row.get(6)?,
                interested_topics: tags_from_json(&row.get::<_, String>(7)?),
                created_at: row.get(8)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
        other => other.into(),
    })
}
