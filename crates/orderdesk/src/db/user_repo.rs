//! User repository for the `users` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::DatabaseError;
use crate::auth::Role;

/// A user row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            role: row.get("role")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Fields for a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Inserts a user and returns its id.
pub fn insert(conn: &Connection, user: &NewUser, now: DateTime<Utc>) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO users (name, email, role, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user.name, user.email, user.role, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds a user by id.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM users WHERE id = ?1",
            params![id],
            UserRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds a user by email.
pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM users WHERE email = ?1",
            params![email],
            UserRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists all users ordered by id.
pub fn list(conn: &Connection) -> Result<Vec<UserRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id")?;
    let rows = stmt
        .query_map([], UserRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
