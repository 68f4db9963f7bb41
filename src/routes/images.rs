use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use rusqlite::params;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::media::MAX_UPLOAD_BYTES;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub crop: bool,
}

/// Body for DELETE /image. Either the host's public id or the delivery URL;
/// a URL is resolved to the id through the local catalog.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteImageRequest {
    pub public_id: Option<String>,
    pub url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/image/{dir}", post(upload_images))
        .route("/image", delete(delete_image))
        // The framework's default body limit is well below the upload cap;
        // raise it here so `validate_upload` is what decides oversize, with
        // headroom for the multipart framing around the asset bytes.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024))
}

/// POST /image/{dir}?crop=true — multipart upload, "image" field repeatable.
/// Each file goes to the media host first; only a stored asset gets a catalog
/// row, so the catalog never points at bytes the host does not have.
async fn upload_images(
    State(state): State<AppState>,
    Path(dir): Path<String>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut uploaded = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let mime = field
            .content_type()
            .map(str::to_owned)
            .ok_or_else(|| AppError::BadRequest("Missing content type on image field".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read image field: {e}")))?
            .to_vec();

        let asset = state.media.store(bytes, &mime, &dir, query.crop).await?;

        let id = uuid::Uuid::now_v7().to_string();
        let conn = state.db.get()?;
        conn.execute(
            "INSERT INTO images (id, public_id, url) VALUES (?1, ?2, ?3)",
            params![id, asset.public_id, asset.url],
        )?;
        uploaded.push(json!({
            "id": id,
            "publicId": asset.public_id,
            "url": asset.url,
        }));
    }

    if uploaded.is_empty() {
        return Err(AppError::BadRequest("No image field in upload".into()));
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": 201,
            "success": true,
            "message": "Images uploaded",
            "images": uploaded,
        })),
    )
        .into_response())
}

/// DELETE /image — remove from the host, then drop the catalog row. Removal
/// is idempotent; an id the host has already forgotten still succeeds.
async fn delete_image(
    State(state): State<AppState>,
    Json(req): Json<DeleteImageRequest>,
) -> AppResult<Response> {
    let public_id = match (req.public_id, req.url) {
        (Some(id), _) => id,
        (None, Some(url)) => {
            let conn = state.db.get()?;
            conn.query_row(
                "SELECT public_id FROM images WHERE url = ?1",
                params![url],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
                other => other.into(),
            })?
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "Either publicId or url is required".into(),
            ))
        }
    };

    state.media.remove(&public_id).await?;

    let conn = state.db.get()?;
    conn.execute("DELETE FROM images WHERE public_id = ?1", params![public_id])?;

    Ok(Json(json!({
        "status": 200,
        "success": true,
        "message": "Image deleted",
    }))
    .into_response())
}
