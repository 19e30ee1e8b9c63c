//! File claim repository for the `file_claims` table.
//!
//! A claim stores its member file ids as a JSON array rather than through a
//! join table. Nothing in the schema keeps that list in sync with
//! `file_items`; the batch service is the only writer.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::DatabaseError;

/// Ordered file id list, stored as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileIdList(pub Vec<i64>);

impl ToSql for FileIdList {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let json = serde_json::to_string(&self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(json))
    }
}

impl FromSql for FileIdList {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        serde_json::from_str(value.as_str()?)
            .map(FileIdList)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A claim (batch) row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRow {
    pub id: i64,
    pub user_id: i64,
    pub order_id: i64,
    pub file_ids: Vec<i64>,
    pub claimed_at: DateTime<Utc>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClaimRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            order_id: row.get("order_id")?,
            file_ids: row.get::<_, FileIdList>("file_ids")?.0,
            claimed_at: row.get("claimed_at")?,
            is_completed: row.get("is_completed")?,
            completed_at: row.get("completed_at")?,
        })
    }

    /// Whether `file_id` belongs to this claim.
    pub fn contains(&self, file_id: i64) -> bool {
        self.file_ids.contains(&file_id)
    }
}

/// Inserts an open claim and returns the stored row.
pub fn insert(
    conn: &Connection,
    user_id: i64,
    order_id: i64,
    file_ids: &[i64],
    claimed_at: DateTime<Utc>,
) -> Result<ClaimRow, DatabaseError> {
    let ids = FileIdList(file_ids.to_vec());
    conn.execute(
        "INSERT INTO file_claims (user_id, order_id, file_ids, claimed_at, is_completed)
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![user_id, order_id, ids, claimed_at],
    )?;
    Ok(ClaimRow {
        id: conn.last_insert_rowid(),
        user_id,
        order_id,
        file_ids: ids.0,
        claimed_at,
        is_completed: false,
        completed_at: None,
    })
}

/// Finds a claim by id.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<ClaimRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM file_claims WHERE id = ?1",
            params![id],
            ClaimRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Finds the open claim of an order whose file list contains `file_id`.
pub fn find_open_containing(
    conn: &Connection,
    order_id: i64,
    file_id: i64,
) -> Result<Option<ClaimRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM file_claims
             WHERE order_id = ?1 AND is_completed = 0
               AND EXISTS (SELECT 1 FROM json_each(file_claims.file_ids) WHERE value = ?2)
             ORDER BY id LIMIT 1",
            params![order_id, file_id],
            ClaimRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Marks a claim completed. Returns false if it was already completed or missing.
pub fn mark_completed(
    conn: &Connection,
    id: i64,
    completed_at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE file_claims SET is_completed = 1, completed_at = ?2
         WHERE id = ?1 AND is_completed = 0",
        params![id, completed_at],
    )?;
    Ok(changed > 0)
}

/// Deletes a claim.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM file_claims WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Lists a user's claims that are not completed, newest first.
pub fn list_active_for_user(conn: &Connection, user_id: i64) -> Result<Vec<ClaimRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_claims WHERE user_id = ?1 AND is_completed = 0
         ORDER BY claimed_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![user_id], ClaimRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lists every claim of an order, newest first.
pub fn list_for_order(conn: &Connection, order_id: i64) -> Result<Vec<ClaimRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM file_claims WHERE order_id = ?1 ORDER BY claimed_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![order_id], ClaimRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
