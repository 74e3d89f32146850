//! User directory: existence checks and profile lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use chatline_shared::{UserId, UserProfile};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Read side of the user store consumed by the connection gate and the
/// request/response API.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<UserProfile>>;

    /// Every known user except `id`, ordered by name.
    async fn list_users_except(&self, id: &UserId) -> Result<Vec<UserProfile>>;
}

impl Database {
    /// Insert a user profile. Normally done by the auth service; exposed for
    /// seeding and tests.
    pub fn insert_user(&self, user: &UserProfile) -> Result<()> {
        let conn = self.lock()?;
        insert_user(&conn, user)
    }
}

pub(crate) fn insert_user(conn: &Connection, user: &UserProfile) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, fullname, email, profile_pic, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.id.as_str(),
            user.fullname,
            user.email,
            user.profile_pic,
            user.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::DuplicateUser(user.email.clone())
        }
        other => StoreError::Sqlite(other),
    })?;
    Ok(())
}

pub(crate) fn get_user(conn: &Connection, id: &UserId) -> Result<Option<UserProfile>> {
    let user = conn
        .query_row(
            "SELECT id, fullname, email, profile_pic, created_at FROM users WHERE id = ?1",
            params![id.as_str()],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

#[async_trait]
impl UserDirectory for Database {
    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<UserProfile>> {
        let id = id.clone();
        self.run(move |conn| get_user(conn, &id)).await
    }

    async fn list_users_except(&self, id: &UserId) -> Result<Vec<UserProfile>> {
        let id = id.clone();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, fullname, email, profile_pic, created_at
                 FROM users
                 WHERE id != ?1
                 ORDER BY fullname COLLATE NOCASE, id",
            )?;
            let rows = stmt.query_map(params![id.as_str()], row_to_user)?;

            let mut users = Vec::new();
            for row in rows {
                users.push(row?);
            }
            Ok(users)
        })
        .await
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let id: String = row.get(0)?;
    let ts_str: String = row.get(4)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(UserProfile {
        id: UserId(id),
        fullname: row.get(1)?,
        email: row.get(2)?,
        profile_pic: row.get(3)?,
        created_at,
    })
}
