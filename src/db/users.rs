//! User identities created by the login flow.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::ids::UserId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub picture_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile as reported by the identity provider after a successful handshake.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub picture_url: Option<String>,
}

const USER_COLUMNS: &str = "id, external_id, name, email, picture_url, created_at, updated_at";

impl User {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            external_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            picture_url: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

pub(crate) fn find_by_id(conn: &rusqlite::Connection, id: UserId) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
        [id],
        User::from_row,
    )
    .optional()
}

/// Existing users are matched by email; their stored profile is left as is.
pub(crate) fn find_or_create(
    conn: &rusqlite::Connection,
    profile: &UserProfile,
) -> rusqlite::Result<User> {
    let existing = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"),
            [&profile.email],
            User::from_row,
        )
        .optional()?;
    if let Some(user) = existing {
        return Ok(user);
    }

    let now = Utc::now();
    conn.execute(
        "INSERT INTO users (external_id, name, email, picture_url, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![profile.external_id, profile.name, profile.email, profile.picture_url, now, now],
    )?;
    Ok(User {
        id: UserId(conn.last_insert_rowid()),
        external_id: profile.external_id.clone(),
        name: profile.name.clone(),
        email: profile.email.clone(),
        picture_url: profile.picture_url.clone(),
        created_at: now,
        updated_at: now,
    })
}
