//! File status statistics: grouped counts over `file_items`.

use rusqlite::{params, Connection};

use super::{placeholders, DatabaseError};
use crate::status::FileStatus;

/// Number of files with one status at one place in an order's folder tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationCount {
    pub folder_id: Option<i64>,
    pub subfolder_id: Option<i64>,
    pub status: FileStatus,
    pub count: u64,
}

/// Counts the files of an order grouped by (folder, subfolder, status).
pub fn counts_by_location(
    conn: &Connection,
    order_id: i64,
) -> Result<Vec<LocationCount>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT folder_id, subfolder_id, status, COUNT(*)
         FROM file_items WHERE order_id = ?1
         GROUP BY folder_id, subfolder_id, status",
    )?;
    let rows = stmt
        .query_map(params![order_id], |row| {
            Ok(LocationCount {
                folder_id: row.get(0)?,
                subfolder_id: row.get(1)?,
                status: row.get(2)?,
                count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts files per (order, status) for a set of orders.
pub fn counts_by_order(
    conn: &Connection,
    order_ids: &[i64],
) -> Result<Vec<(i64, FileStatus, u64)>, DatabaseError> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT order_id, status, COUNT(*) FROM file_items
         WHERE order_id IN ({})
         GROUP BY order_id, status",
        placeholders(1, order_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(order_ids), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
