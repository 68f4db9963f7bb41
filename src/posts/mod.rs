//! Shared lifecycle machinery for the three post kinds: image attachment
//! (symmetric-difference sync on update), the explicit cascading delete that
//! sweeps orphaned remote assets, counter adjustment, and comments.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::models::Image;
use crate::error::{AppError, AppResult};
use crate::media::{MediaError, MediaStore};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Article,
    Community,
    Photo,
}

impl PostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PostKind::Article => "article",
            PostKind::Community => "community",
            PostKind::Photo => "photo",
        }
    }

    fn table(self) -> &'static str {
        match self {
            PostKind::Article => "articles",
            PostKind::Community => "community_posts",
            PostKind::Photo => "photo_posts",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub created_at: String,
}

pub fn post_exists(conn: &Connection, kind: PostKind, post_id: &str) -> AppResult<bool> {
    let sql = format!("SELECT COUNT(*) > 0 FROM {} WHERE id = ?1", kind.table());
    let exists: bool = conn.query_row(&sql, params![post_id], |row| row.get(0))?;
    Ok(exists)
}

/// Attach pre-existing image records by id. Unknown ids fail the whole call;
/// re-attaching an already attached image is a no-op.
pub fn attach_images(
    conn: &Connection,
    kind: PostKind,
    post_id: &str,
    image_ids: &[String],
) -> AppResult<()> {
    for image_id in image_ids {
        let known: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM images WHERE id = ?1",
            params![image_id],
            |row| row.get(0),
        )?;
        if !known {
            return Err(AppError::NotFound);
        }
        conn.execute(
            "INSERT OR IGNORE INTO post_images (post_kind, post_id, image_id) \
             VALUES (?1, ?2, ?3)",
            params![kind.as_str(), post_id, image_id],
        )?;
    }
    Ok(())
}

pub fn attached_image_ids(
    conn: &Connection,
    kind: PostKind,
    post_id: &str,
) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT image_id FROM post_images WHERE post_kind = ?1 AND post_id = ?2 ORDER BY image_id",
    )?;
    let ids = stmt
        .query_map(params![kind.as_str(), post_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Bring the attached-image set in line with `desired`: attach what is new,
/// detach what is gone. Detaching removes only the join row; the image record
/// survives while any post still references it.
pub fn sync_images(
    conn: &Connection,
    kind: PostKind,
    post_id: &str,
    desired: &[String],
) -> AppResult<()> {
    let current = attached_image_ids(conn, kind, post_id)?;

    let to_attach: Vec<String> = desired
        .iter()
        .filter(|id| !current.contains(id))
        .cloned()
        .collect();
    let to_detach: Vec<&String> = current.iter().filter(|id| !desired.contains(id)).collect();

    attach_images(conn, kind, post_id, &to_attach)?;
    for image_id in to_detach {
        conn.execute(
            "DELETE FROM post_images WHERE post_kind = ?1 AND post_id = ?2 AND image_id = ?3",
            params![kind.as_str(), post_id, image_id],
        )?;
    }
    Ok(())
}

pub fn load_images(conn: &Connection, kind: PostKind, post_id: &str) -> AppResult<Vec<Image>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.public_id, i.url, i.created_at \
         FROM images i JOIN post_images pi ON pi.image_id = i.id \
         WHERE pi.post_kind = ?1 AND pi.post_id = ?2 ORDER BY i.id",
    )?;
    let images = stmt
        .query_map(params![kind.as_str(), post_id], |row| {
            Ok(Image {
                id: row.get(0)?,
                public_id: row.get(1)?,
                url: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

/// Delete a post together with every image only it references.
///
/// Remote assets are removed first; the media host sits outside the local
/// transaction, so a host failure aborts the whole delete and the caller
/// sees `Upstream`. Assets already removed before the failure are covered by
/// the host's idempotent delete on retry. Images still referenced by another
/// post are left alone, as are their remote assets.
pub async fn delete_post_and_orphaned_images(
    pool: &DbPool,
    media: &dyn MediaStore,
    kind: PostKind,
    post_id: &str,
) -> AppResult<()> {
    // Phase 1: figure out which images this delete orphans.
    let orphaned: Vec<Image> = {
        let conn = pool.get()?;
        if !post_exists(&conn, kind, post_id)? {
            return Err(AppError::NotFound);
        }
        let attached = load_images(&conn, kind, post_id)?;
        let mut orphaned = Vec::new();
        for image in attached {
            let refs: i64 = conn.query_row(
                "SELECT COUNT(*) FROM post_images WHERE image_id = ?1",
                params![image.id],
                |row| row.get(0),
            )?;
            if refs == 1 {
                orphaned.push(image);
            }
        }
        orphaned
    };

    // Phase 2: remote removal before any local record goes away.
    for image in &orphaned {
        match media.remove(&image.public_id).await {
            Ok(()) | Err(MediaError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(
                    public_id = %image.public_id,
                    "aborting post delete, media host removal failed: {}",
                    e
                );
                return Err(AppError::Upstream(e.to_string()));
            }
        }
    }

    // Phase 3: one local transaction for the rows.
    let conn = pool.get()?;
    conn.execute("BEGIN IMMEDIATE", [])?;
    let result: AppResult<()> = (|| {
        conn.execute(
            "DELETE FROM post_images WHERE post_kind = ?1 AND post_id = ?2",
            params![kind.as_str(), post_id],
        )?;
        for image in &orphaned {
            // The orphan set was computed before the remote sweep; another
            // post may have attached this image in the meantime. Re-check the
            // reference count under the transaction and keep the row if so.
            let refs: i64 = conn.query_row(
                "SELECT COUNT(*) FROM post_images WHERE image_id = ?1",
                params![image.id],
                |row| row.get(0),
            )?;
            if refs == 0 {
                conn.execute("DELETE FROM images WHERE id = ?1", params![image.id])?;
            }
        }
        conn.execute(
            "DELETE FROM comments WHERE post_kind = ?1 AND post_id = ?2",
            params![kind.as_str(), post_id],
        )?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        conn.execute(&sql, params![post_id])?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

/// like/unlike move the like counter by exactly one (no floor; unlike below
/// zero is allowed), view bumps the view counter unconditionally.
pub fn adjust_stat(pool: &DbPool, kind: PostKind, post_id: &str, action: &str) -> AppResult<()> {
    let assignment = match action {
        "like" => "likes = likes + 1",
        "unlike" => "likes = likes - 1",
        "view" => "views = views + 1",
        other => {
            return Err(AppError::BadRequest(format!("invalid action '{other}'")));
        }
    };

    let conn = pool.get()?;
    let sql = format!("UPDATE {} SET {} WHERE id = ?1", kind.table(), assignment);
    let rows = conn.execute(&sql, params![post_id])?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub fn create_comment(
    pool: &DbPool,
    kind: PostKind,
    post_id: &str,
    author_id: &str,
    content: &str,
) -> AppResult<CommentView> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("Comment cannot be empty".into()));
    }

    let conn = pool.get()?;
    if !post_exists(&conn, kind, post_id)? {
        return Err(AppError::NotFound);
    }

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO comments (id, post_kind, post_id, author_id, content) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, kind.as_str(), post_id, author_id, content],
    )?;

    conn.query_row(
        "SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at \
         FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = ?1",
        params![id],
        map_comment,
    )
    .map_err(AppError::from)
}

/// Comments for a post in creation order (ids are time-ordered).
pub fn list_comments(pool: &DbPool, kind: PostKind, post_id: &str) -> AppResult<Vec<CommentView>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT c.id, c.post_id, c.author_id, u.username, c.content, c.created_at \
         FROM comments c JOIN users u ON u.id = c.author_id \
         WHERE c.post_kind = ?1 AND c.post_id = ?2 ORDER BY c.id",
    )?;
    let comments = stmt
        .query_map(params![kind.as_str(), post_id], map_comment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

pub fn delete_comment(pool: &DbPool, comment_id: &str) -> AppResult<()> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM comments WHERE id = ?1", params![comment_id])?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub fn comment_count(conn: &Connection, kind: PostKind, post_id: &str) -> AppResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE post_kind = ?1 AND post_id = ?2",
        params![kind.as_str(), post_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn map_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentView> {
    Ok(CommentView {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::InMemoryMediaStore;
    use rusqlite::params;

    fn test_pool() -> DbPool {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        crate::db::run_migrations(&pool).unwrap();
        pool
    }

    fn seed_user(pool: &DbPool, id: &str) {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, username) VALUES (?1, ?2, 'h', ?1)",
            params![id, format!("{id}@example.com")],
        )
        .unwrap();
    }

    fn seed_photo_post(pool: &DbPool, id: &str, author: &str) {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO photo_posts (id, author_id, title) VALUES (?1, ?2, 'p')",
            params![id, author],
        )
        .unwrap();
    }

    async fn seed_image(pool: &DbPool, media: &InMemoryMediaStore) -> Image {
        let asset = media
            .store(b"\x89PNG".to_vec(), "image/png", "posts", false)
            .await
            .unwrap();
        let id = uuid::Uuid::now_v7().to_string();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO images (id, public_id, url) VALUES (?1, ?2, ?3)",
            params![id, asset.public_id, asset.url],
        )
        .unwrap();
        Image {
            id,
            public_id: asset.public_id,
            url: asset.url,
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn sync_images_applies_symmetric_difference() {
        let pool = test_pool();
        let media = InMemoryMediaStore::new();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");
        let a = seed_image(&pool, &media).await;
        let b = seed_image(&pool, &media).await;
        let c = seed_image(&pool, &media).await;

        let conn = pool.get().unwrap();
        attach_images(&conn, PostKind::Photo, "p1", &[a.id.clone(), b.id.clone()]).unwrap();

        // Keep a, drop b, add c
        sync_images(&conn, PostKind::Photo, "p1", &[a.id.clone(), c.id.clone()]).unwrap();

        let mut attached = attached_image_ids(&conn, PostKind::Photo, "p1").unwrap();
        attached.sort();
        let mut expected = vec![a.id.clone(), c.id.clone()];
        expected.sort();
        assert_eq!(attached, expected);

        // Detachment is not deletion: b's record is still there
        let b_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM images WHERE id = ?1",
                params![b.id],
                |r| r.get(0),
            )
            .unwrap();
        assert!(b_exists);
    }

    #[tokio::test]
    async fn attach_unknown_image_fails() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");
        let conn = pool.get().unwrap();
        let err =
            attach_images(&conn, PostKind::Photo, "p1", &["missing".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn delete_removes_exclusive_images_and_keeps_shared() {
        let pool = test_pool();
        let media = InMemoryMediaStore::new();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");
        seed_photo_post(&pool, "p2", "u1");
        let exclusive = seed_image(&pool, &media).await;
        let shared = seed_image(&pool, &media).await;

        {
            let conn = pool.get().unwrap();
            attach_images(
                &conn,
                PostKind::Photo,
                "p1",
                &[exclusive.id.clone(), shared.id.clone()],
            )
            .unwrap();
            attach_images(&conn, PostKind::Photo, "p2", &[shared.id.clone()]).unwrap();
        }

        delete_post_and_orphaned_images(&pool, &media, PostKind::Photo, "p1")
            .await
            .unwrap();

        // Exclusive image gone remotely and locally; shared untouched
        assert!(!media.contains(&exclusive.public_id));
        assert!(media.contains(&shared.public_id));

        let conn = pool.get().unwrap();
        let exclusive_rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM images WHERE id = ?1",
                params![exclusive.id],
                |r| r.get(0),
            )
            .unwrap();
        let shared_rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM images WHERE id = ?1",
                params![shared.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(exclusive_rows, 0);
        assert_eq!(shared_rows, 1);

        assert!(!post_exists(&conn, PostKind::Photo, "p1").unwrap());
        assert!(post_exists(&conn, PostKind::Photo, "p2").unwrap());
    }

    #[tokio::test]
    async fn delete_aborts_on_media_failure() {
        let pool = test_pool();
        let media = InMemoryMediaStore::new();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");
        let image = seed_image(&pool, &media).await;
        {
            let conn = pool.get().unwrap();
            attach_images(&conn, PostKind::Photo, "p1", &[image.id.clone()]).unwrap();
        }

        media.set_fail_removals(true);
        let err = delete_post_and_orphaned_images(&pool, &media, PostKind::Photo, "p1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));

        // Nothing was deleted locally
        let conn = pool.get().unwrap();
        assert!(post_exists(&conn, PostKind::Photo, "p1").unwrap());
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn delete_unknown_post_is_not_found() {
        let pool = test_pool();
        let media = InMemoryMediaStore::new();
        let err = delete_post_and_orphaned_images(&pool, &media, PostKind::Photo, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn adjust_stat_moves_counters() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");

        for _ in 0..3 {
            adjust_stat(&pool, PostKind::Photo, "p1", "view").unwrap();
        }
        adjust_stat(&pool, PostKind::Photo, "p1", "like").unwrap();
        adjust_stat(&pool, PostKind::Photo, "p1", "unlike").unwrap();
        adjust_stat(&pool, PostKind::Photo, "p1", "unlike").unwrap();

        let conn = pool.get().unwrap();
        let (views, likes): (i64, i64) = conn
            .query_row(
                "SELECT views, likes FROM photo_posts WHERE id = 'p1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(views, 3);
        // No floor: unlike past zero goes negative
        assert_eq!(likes, -1);
    }

    #[test]
    fn adjust_stat_rejects_unknown_action_and_post() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");

        assert!(matches!(
            adjust_stat(&pool, PostKind::Photo, "p1", "boost"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            adjust_stat(&pool, PostKind::Photo, "missing", "view"),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn comments_create_list_delete() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");

        let first = create_comment(&pool, PostKind::Photo, "p1", "u1", "first").unwrap();
        let second = create_comment(&pool, PostKind::Photo, "p1", "u1", "second").unwrap();
        assert_eq!(first.author_name, "u1");

        let listed = list_comments(&pool, PostKind::Photo, "p1").unwrap();
        assert_eq!(listed.len(), 2);
        // Creation order
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);

        delete_comment(&pool, &first.id).unwrap();
        assert_eq!(list_comments(&pool, PostKind::Photo, "p1").unwrap().len(), 1);
        assert!(matches!(
            delete_comment(&pool, &first.id),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn comment_requires_existing_post_and_content() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_photo_post(&pool, "p1", "u1");

        assert!(matches!(
            create_comment(&pool, PostKind::Photo, "missing", "u1", "hi"),
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            create_comment(&pool, PostKind::Photo, "p1", "u1", "   "),
            Err(AppError::BadRequest(_))
        ));
        // Comments are scoped per kind: an article comment never shows up on
        // a photo post with the same id
        create_comment(&pool, PostKind::Photo, "p1", "u1", "hi").unwrap();
        assert_eq!(
            list_comments(&pool, PostKind::Community, "p1").unwrap().len(),
            0
        );
    }
}
