//! Vote Participation Engine.
//!
//! The one stateful invariant in the system: at most one participation per
//! (user, poll) pair, with `participant_count` advanced by exactly one per
//! accepted participation. The UNIQUE(user_id, vote_id) constraint in the
//! schema is the authoritative duplicate signal; `participate` runs the
//! insert and the counter update inside a single immediate transaction so
//! two racing calls cannot both count.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::models::{UserVote, VoteOption};
use crate::error::{on_constraint, AppError, AppResult};
use crate::state::DbPool;

#[derive(Debug, Clone)]
pub struct PollInput {
    pub author_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub author_id: String,
    pub author_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub participant_count: i64,
    pub created_at: String,
    pub options: Vec<VoteOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_has_voted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_votes: Option<Vec<UserVote>>,
}

pub fn create_poll(pool: &DbPool, input: &PollInput) -> AppResult<Poll> {
    if input.options.is_empty() {
        return Err(AppError::BadRequest(
            "A poll needs at least one option".into(),
        ));
    }
    if input.end_date <= input.start_date {
        return Err(AppError::BadRequest(
            "Poll end must be after its start".into(),
        ));
    }
    if input.title.trim().is_empty() {
        return Err(AppError::BadRequest("Poll title is required".into()));
    }

    let conn = pool.get()?;
    conn.execute("BEGIN IMMEDIATE", [])?;

    let vote_id = uuid::Uuid::now_v7().to_string();
    let result: AppResult<()> = (|| {
        conn.execute(
            "INSERT INTO votes (id, author_id, title, description, start_date, end_date, participant_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                vote_id,
                input.author_id,
                input.title,
                input.description,
                input.start_date.to_rfc3339(),
                input.end_date.to_rfc3339(),
            ],
        )?;

        for (position, text) in input.options.iter().enumerate() {
            conn.execute(
                "INSERT INTO vote_options (id, vote_id, text, position) VALUES (?1, ?2, ?3, ?4)",
                params![
                    uuid::Uuid::now_v7().to_string(),
                    vote_id,
                    text,
                    position as i64
                ],
            )?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute("COMMIT", [])?;
            drop(conn);
            get_poll(pool, &vote_id, None)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

/// Record a user's participation. Check-insert-increment runs under one
/// immediate transaction; a duplicate (user, poll) pair fails on the unique
/// constraint, never by over-counting.
pub fn participate(
    pool: &DbPool,
    vote_id: &str,
    user_id: &str,
    option_id: &str,
) -> AppResult<UserVote> {
    let conn = pool.get()?;
    conn.execute("BEGIN IMMEDIATE", [])?;

    let result: AppResult<UserVote> = (|| {
        let vote_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM votes WHERE id = ?1",
            params![vote_id],
            |row| row.get(0),
        )?;
        if !vote_exists {
            return Err(AppError::NotFound);
        }

        let option_ok: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM vote_options WHERE id = ?1 AND vote_id = ?2",
            params![option_id, vote_id],
            |row| row.get(0),
        )?;
        if !option_ok {
            return Err(AppError::BadRequest(
                "Option does not belong to this poll".into(),
            ));
        }

        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO user_votes (id, user_id, vote_id, vote_option_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, vote_id, option_id],
        )
        .map_err(|e| on_constraint(e, "User has already participated in this poll"))?;

        // Counter moves only when the insert above succeeded, in the same
        // transaction.
        conn.execute(
            "UPDATE votes SET participant_count = participant_count + 1 WHERE id = ?1",
            params![vote_id],
        )?;

        conn.query_row(
            "SELECT id, user_id, vote_id, vote_option_id, created_at \
             FROM user_votes WHERE id = ?1",
            params![id],
            map_user_vote,
        )
        .map_err(AppError::from)
    })();

    match result {
        Ok(row) => {
            conn.execute("COMMIT", [])?;
            Ok(row)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

/// Pure existence check, no side effect. Returns the participation row when
/// there is one so the API can echo it back.
pub fn has_participated(
    pool: &DbPool,
    vote_id: &str,
    user_id: &str,
) -> AppResult<Option<UserVote>> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT id, user_id, vote_id, vote_option_id, created_at \
         FROM user_votes WHERE vote_id = ?1 AND user_id = ?2",
        params![vote_id, user_id],
        map_user_vote,
    );
    match result {
        Ok(row) => Ok(Some(row)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Hard delete; options and participation rows go with the poll via the
/// schema's cascades.
pub fn delete_poll(pool: &DbPool, vote_id: &str) -> AppResult<()> {
    let conn = pool.get()?;
    let rows = conn.execute("DELETE FROM votes WHERE id = ?1", params![vote_id])?;
    if rows == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub fn get_poll(pool: &DbPool, vote_id: &str, for_user: Option<&str>) -> AppResult<Poll> {
    let conn = pool.get()?;
    let mut poll = conn
        .query_row(
            "SELECT v.id, v.author_id, u.username, v.title, v.description, \
                    v.start_date, v.end_date, v.participant_count, v.created_at \
             FROM votes v JOIN users u ON u.id = v.author_id \
             WHERE v.id = ?1",
            params![vote_id],
            map_poll,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound,
            other => other.into(),
        })?;

    poll.options = load_options(&conn, vote_id)?;
    poll.user_votes = Some(load_user_votes(&conn, vote_id)?);
    if let Some(user_id) = for_user {
        poll.user_has_voted = Some(
            poll.user_votes
                .as_deref()
                .map(|rows| rows.iter().any(|uv| uv.user_id == user_id))
                .unwrap_or(false),
        );
    }
    Ok(poll)
}

/// All polls, newest first. When a user id is supplied each poll carries a
/// `user_has_voted` flag.
pub fn list_polls(pool: &DbPool, for_user: Option<&str>) -> AppResult<Vec<Poll>> {
    query_polls(pool, "1 = 1", &[], for_user, false)
}

/// The per-user views carry the participation rows, matching what the detail
/// view exposes.
pub fn polls_created_by(pool: &DbPool, user_id: &str) -> AppResult<Vec<Poll>> {
    query_polls(pool, "v.author_id = ?1", &[&user_id], None, true)
}

pub fn polls_participated_by(pool: &DbPool, user_id: &str) -> AppResult<Vec<Poll>> {
    query_polls(
        pool,
        "EXISTS (SELECT 1 FROM user_votes uv WHERE uv.vote_id = v.id AND uv.user_id = ?1)",
        &[&user_id],
        None,
        true,
    )
}

fn query_polls(
    pool: &DbPool,
    filter: &str,
    filter_params: &[&dyn rusqlite::ToSql],
    for_user: Option<&str>,
    with_user_votes: bool,
) -> AppResult<Vec<Poll>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT v.id, v.author_id, u.username, v.title, v.description, \
                v.start_date, v.end_date, v.participant_count, v.created_at \
         FROM votes v JOIN users u ON u.id = v.author_id \
         WHERE {filter} ORDER BY v.created_at DESC, v.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut polls: Vec<Poll> = stmt
        .query_map(filter_params, map_poll)?
        .collect::<Result<Vec<_>, _>>()?;

    for poll in &mut polls {
        poll.options = load_options(&conn, &poll.id)?;
        if with_user_votes {
            poll.user_votes = Some(load_user_votes(&conn, &poll.id)?);
        }
        if let Some(user_id) = for_user {
            let voted: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM user_votes WHERE vote_id = ?1 AND user_id = ?2",
                params![poll.id, user_id],
                |row| row.get(0),
            )?;
            poll.user_has_voted = Some(voted);
        }
    }
    Ok(polls)
}

fn map_poll(row: &rusqlite::Row<'_>) -> rusqlite::Result<Poll> {
    Ok(Poll {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_name: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        participant_count: row.get(7)?,
        created_at: row.get(8)?,
        options: Vec::new(),
        user_has_voted: None,
        user_votes: None,
    })
}

fn map_user_vote(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserVote> {
    Ok(UserVote {
        id: row.get(0)?,
        user_id: row.get(1)?,
        vote_id: row.get(2)?,
        vote_option_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn load_options(conn: &Connection, vote_id: &str) -> AppResult<Vec<VoteOption>> {
    let mut stmt = conn.prepare(
        "SELECT id, vote_id, text, position FROM vote_options \
         WHERE vote_id = ?1 ORDER BY position",
    )?;
    let options = stmt
        .query_map(params![vote_id], |row| {
            Ok(VoteOption {
                id: row.get(0)?,
                vote_id: row.get(1)?,
                text: row.get(2)?,
                position: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(options)
}

fn load_user_votes(conn: &Connection, vote_id: &str) -> AppResult<Vec<UserVote>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, vote_id, vote_option_id, created_at \
         FROM user_votes WHERE vote_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![vote_id], map_user_vote)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rusqlite::params;

    fn test_pool() -> DbPool {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        }
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

    fn input(author: &str, options: &[&str]) -> PollInput {
        let now = Utc::now();
        PollInput {
            author_id: author.into(),
            title: "Where to next?".into(),
            description: Some("pick one".into()),
            start_date: now,
            end_date: now + Duration::hours(1),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn create_poll_rejects_empty_options_and_bad_window() {
        let pool = test_pool();
        seed_user(&pool, "u1");

        let empty = PollInput {
            options: vec![],
            ..input("u1", &[])
        };
        assert!(matches!(
            create_poll(&pool, &empty),
            Err(AppError::BadRequest(_))
        ));

        let mut backwards = input("u1", &["A"]);
        backwards.end_date = backwards.start_date;
        assert!(matches!(
            create_poll(&pool, &backwards),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn create_poll_preserves_option_order() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        let poll = create_poll(&pool, &input("u1", &["A", "B", "C"])).unwrap();
        let texts: Vec<&str> = poll.options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B", "C"]);
        assert_eq!(poll.participant_count, 0);
    }

    #[test]
    fn two_users_participate_counts_two() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_user(&pool, "u2");
        let poll = create_poll(&pool, &input("u1", &["A", "B"])).unwrap();

        participate(&pool, &poll.id, "u1", &poll.options[0].id).unwrap();
        participate(&pool, &poll.id, "u2", &poll.options[1].id).unwrap();

        let loaded = get_poll(&pool, &poll.id, None).unwrap();
        assert_eq!(loaded.participant_count, 2);
        assert_eq!(loaded.user_votes.unwrap().len(), 2);
    }

    #[test]
    fn second_participation_conflicts_and_count_unchanged() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_user(&pool, "u2");
        let poll = create_poll(&pool, &input("u1", &["A", "B"])).unwrap();

        participate(&pool, &poll.id, "u2", &poll.options[0].id).unwrap();
        // Different option, same user: still a conflict
        let err = participate(&pool, &poll.id, "u2", &poll.options[1].id).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let loaded = get_poll(&pool, &poll.id, None).unwrap();
        assert_eq!(loaded.participant_count, 1);
    }

    #[test]
    fn participate_rejects_foreign_option() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        let poll_a = create_poll(&pool, &input("u1", &["A"])).unwrap();
        let poll_b = create_poll(&pool, &input("u1", &["B"])).unwrap();

        let err = participate(&pool, &poll_a.id, "u1", &poll_b.options[0].id).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let loaded = get_poll(&pool, &poll_a.id, None).unwrap();
        assert_eq!(loaded.participant_count, 0);
    }

    #[test]
    fn participate_unknown_poll_is_not_found() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        assert!(matches!(
            participate(&pool, "missing", "u1", "missing"),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn has_participated_reflects_state() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        let poll = create_poll(&pool, &input("u1", &["A"])).unwrap();

        assert!(has_participated(&pool, &poll.id, "u1").unwrap().is_none());
        participate(&pool, &poll.id, "u1", &poll.options[0].id).unwrap();
        let row = has_participated(&pool, &poll.id, "u1").unwrap().unwrap();
        assert_eq!(row.vote_option_id, poll.options[0].id);
    }

    #[test]
    fn delete_poll_cascades() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        let poll = create_poll(&pool, &input("u1", &["A"])).unwrap();
        participate(&pool, &poll.id, "u1", &poll.options[0].id).unwrap();

        delete_poll(&pool, &poll.id).unwrap();
        assert!(matches!(
            get_poll(&pool, &poll.id, None),
            Err(AppError::NotFound)
        ));

        let conn = pool.get().unwrap();
        let leftovers: i64 = conn
            .query_row("SELECT COUNT(*) FROM user_votes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(leftovers, 0);
        drop(conn);

        assert!(matches!(
            delete_poll(&pool, &poll.id),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn list_polls_flags_participation_per_user() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_user(&pool, "u2");
        let poll = create_poll(&pool, &input("u1", &["A"])).unwrap();
        participate(&pool, &poll.id, "u2", &poll.options[0].id).unwrap();

        let for_u2 = list_polls(&pool, Some("u2")).unwrap();
        assert_eq!(for_u2[0].user_has_voted, Some(true));
        let for_u1 = list_polls(&pool, Some("u1")).unwrap();
        assert_eq!(for_u1[0].user_has_voted, Some(false));
        let anon = list_polls(&pool, None).unwrap();
        assert_eq!(anon[0].user_has_voted, None);
    }

    #[test]
    fn created_by_and_participated_by_queries() {
        let pool = test_pool();
        seed_user(&pool, "u1");
        seed_user(&pool, "u2");
        let poll = create_poll(&pool, &input("u1", &["A"])).unwrap();
        participate(&pool, &poll.id, "u2", &poll.options[0].id).unwrap();

        let created = polls_created_by(&pool, "u1").unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(polls_created_by(&pool, "u2").unwrap().len(), 0);
        let voted = polls_participated_by(&pool, "u2").unwrap();
        assert_eq!(voted.len(), 1);
        assert_eq!(polls_participated_by(&pool, "u1").unwrap().len(), 0);

        // Both per-user views expose the participation rows themselves
        let ballots = created[0].user_votes.as_ref().unwrap();
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].user_id, "u2");
        assert_eq!(voted[0].user_votes.as_ref().unwrap().len(), 1);
    }
}
