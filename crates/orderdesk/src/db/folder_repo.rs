//! Folder repository for the `folders` and `subfolders` tables.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::DatabaseError;

/// A folder row. Folders belong to exactly one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRow {
    pub id: i64,
    pub order_id: i64,
    pub name: String,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
}

impl FolderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            name: row.get("name")?,
            is_open: row.get("is_open")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A subfolder row. Subfolders belong to exactly one folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubfolderRow {
    pub id: i64,
    pub folder_id: i64,
    pub name: String,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
}

impl SubfolderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            folder_id: row.get("folder_id")?,
            name: row.get("name")?,
            is_open: row.get("is_open")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts an (open) folder and returns its id.
pub fn insert_folder(
    conn: &Connection,
    order_id: i64,
    name: &str,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO folders (order_id, name, is_open, created_at) VALUES (?1, ?2, 1, ?3)",
        params![order_id, name, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Inserts an (open) subfolder and returns its id.
pub fn insert_subfolder(
    conn: &Connection,
    folder_id: i64,
    name: &str,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO subfolders (folder_id, name, is_open, created_at) VALUES (?1, ?2, 1, ?3)",
        params![folder_id, name, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_folder(conn: &Connection, id: i64) -> Result<Option<FolderRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM folders WHERE id = ?1",
            params![id],
            FolderRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_folder_by_name(
    conn: &Connection,
    order_id: i64,
    name: &str,
) -> Result<Option<FolderRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM folders WHERE order_id = ?1 AND name = ?2",
            params![order_id, name],
            FolderRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_subfolder(conn: &Connection, id: i64) -> Result<Option<SubfolderRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM subfolders WHERE id = ?1",
            params![id],
            SubfolderRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists the folders of an order in creation order.
pub fn list_folders(conn: &Connection, order_id: i64) -> Result<Vec<FolderRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM folders WHERE order_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![order_id], FolderRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lists every subfolder of every folder of an order.
pub fn list_subfolders_for_order(
    conn: &Connection,
    order_id: i64,
) -> Result<Vec<SubfolderRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT s.* FROM subfolders s
         JOIN folders f ON f.id = s.folder_id
         WHERE f.order_id = ?1
         ORDER BY s.folder_id, s.id",
    )?;
    let rows = stmt
        .query_map(params![order_id], SubfolderRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sets the UI open/closed flag of a folder.
pub fn set_folder_open(conn: &Connection, id: i64, is_open: bool) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE folders SET is_open = ?2 WHERE id = ?1",
        params![id, is_open],
    )?;
    Ok(changed > 0)
}

pub fn rename_folder(conn: &Connection, id: i64, name: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE folders SET name = ?2 WHERE id = ?1",
        params![id, name],
    )?;
    Ok(changed > 0)
}

pub fn rename_subfolder(conn: &Connection, id: i64, name: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE subfolders SET name = ?2 WHERE id = ?1",
        params![id, name],
    )?;
    Ok(changed > 0)
}

/// Deletes a folder. Its subfolders and files go with it.
pub fn delete_folder(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM folders WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Deletes a subfolder. Its files go with it.
pub fn delete_subfolder(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM subfolders WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

pub fn count_subfolders(conn: &Connection, folder_id: i64) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM subfolders WHERE folder_id = ?1",
        params![folder_id],
        |r| r.get(0),
    )?;
    Ok(count)
}
