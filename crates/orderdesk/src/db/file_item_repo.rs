//! File item repository for the `file_items` table.
//!
//! Status and assignee always change in the same statement: a file is
//! either `pending` with no assignee, or in any other state with one.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{placeholders, DatabaseError};
use crate::status::FileStatus;

/// A file item row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItemRow {
    pub id: i64,
    pub order_id: i64,
    pub folder_id: Option<i64>,
    pub subfolder_id: Option<i64>,
    pub assigned_to: Option<i64>,
    /// Stored filename.
    pub name: String,
    /// Filename as uploaded by the client.
    pub original_name: String,
    /// Storage-relative path.
    pub path: String,
    /// Relative directory the client uploaded from, if any.
    pub directory_path: Option<String>,
    pub file_type: String,
    pub mime_type: Option<String>,
    pub file_size: u64,
    pub is_processed: bool,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            folder_id: row.get("folder_id")?,
            subfolder_id: row.get("subfolder_id")?,
            assigned_to: row.get("assigned_to")?,
            name: row.get("name")?,
            original_name: row.get("original_name")?,
            path: row.get("path")?,
            directory_path: row.get("directory_path")?,
            file_type: row.get("file_type")?,
            mime_type: row.get("mime_type")?,
            file_size: row.get("file_size")?,
            is_processed: row.get("is_processed")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields for a newly registered file. New files are always `pending`.
#[derive(Debug, Clone)]
pub struct NewFileItem {
    pub order_id: i64,
    pub folder_id: Option<i64>,
    pub subfolder_id: Option<i64>,
    pub name: String,
    pub original_name: String,
    pub path: String,
    pub directory_path: Option<String>,
    pub file_type: String,
    pub mime_type: Option<String>,
    pub file_size: u64,
}

/// Narrows a claim to part of an order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FileScope {
    /// Every file of the order.
    #[default]
    Order,
    /// Files of a folder, including those in its subfolders.
    Folder(i64),
    /// Files of one subfolder.
    Subfolder(i64),
    /// Files uploaded from one relative client directory.
    Directory(String),
}

/// Inserts a file item in `pending` state and returns its id.
pub fn insert(conn: &Connection, file: &NewFileItem, now: DateTime<Utc>) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO file_items (order_id, folder_id, subfolder_id, name, original_name, path,
         directory_path, file_type, mime_type, file_size, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            file.order_id,
            file.folder_id,
            file.subfolder_id,
            file.name,
            file.original_name,
            file.path,
            file.directory_path,
            file.file_type,
            file.mime_type,
            file.file_size,
            FileStatus::Pending,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds a file item by id.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<FileItemRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM file_items WHERE id = ?1",
            params![id],
            FileItemRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Loads the given files, returned in the order of `ids`. Missing ids are skipped.
pub fn find_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<FileItemRow>, DatabaseError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM file_items WHERE id IN ({})",
        placeholders(1, ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(rusqlite::params_from_iter(ids), FileItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.sort_by_key(|row| ids.iter().position(|id| *id == row.id));
    Ok(rows)
}

/// Lists the files of an order by id.
pub fn list_by_order(conn: &Connection, order_id: i64) -> Result<Vec<FileItemRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM file_items WHERE order_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![order_id], FileItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Selects up to `limit` pending, unassigned files of an order, lowest id first.
///
/// Call inside a write transaction so the selection stays valid until
/// the files are assigned.
pub fn select_claimable(
    conn: &Connection,
    order_id: i64,
    scope: &FileScope,
    limit: u32,
) -> Result<Vec<i64>, DatabaseError> {
    let mut param_values: Vec<Box<dyn ToSql>> =
        vec![Box::new(order_id), Box::new(FileStatus::Pending)];

    let scope_clause = match scope {
        FileScope::Order => String::new(),
        FileScope::Folder(folder_id) => {
            param_values.push(Box::new(*folder_id));
            format!("AND folder_id = ?{}", param_values.len())
        }
        FileScope::Subfolder(subfolder_id) => {
            param_values.push(Box::new(*subfolder_id));
            format!("AND subfolder_id = ?{}", param_values.len())
        }
        FileScope::Directory(directory) => {
            param_values.push(Box::new(directory.clone()));
            format!("AND directory_path = ?{}", param_values.len())
        }
    };

    param_values.push(Box::new(limit));
    let sql = format!(
        "SELECT id FROM file_items
         WHERE order_id = ?1 AND status = ?2 AND assigned_to IS NULL {}
         ORDER BY id LIMIT ?{}",
        scope_clause,
        param_values.len()
    );

    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_ref.as_slice(), |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Assigns pending, unassigned files to `user_id` with the given status.
/// Returns the number of files assigned.
pub fn assign(
    conn: &Connection,
    ids: &[i64],
    user_id: i64,
    status: FileStatus,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE file_items SET status = ?1, assigned_to = ?2, updated_at = ?3
         WHERE status = ?4 AND assigned_to IS NULL AND id IN ({})",
        placeholders(5, ids.len())
    );
    let mut param_values: Vec<&dyn ToSql> = vec![&status, &user_id, &now, &FileStatus::Pending];
    for id in ids {
        param_values.push(id);
    }
    Ok(conn.execute(&sql, param_values.as_slice())?)
}

/// Returns the still-`claimed` files among `ids` to the pending pool.
/// Files in any other state are left alone. Returns the number reset.
pub fn release_claimed(
    conn: &Connection,
    ids: &[i64],
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE file_items SET status = ?1, assigned_to = NULL, updated_at = ?2
         WHERE status = ?3 AND id IN ({})",
        placeholders(4, ids.len())
    );
    let mut param_values: Vec<&dyn ToSql> =
        vec![&FileStatus::Pending, &now, &FileStatus::Claimed];
    for id in ids {
        param_values.push(id);
    }
    Ok(conn.execute(&sql, param_values.as_slice())?)
}

/// Marks files completed and processed. Returns the number of rows changed.
pub fn mark_completed(
    conn: &Connection,
    ids: &[i64],
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "UPDATE file_items SET status = ?1, is_processed = 1, updated_at = ?2
         WHERE id IN ({})",
        placeholders(3, ids.len())
    );
    let mut param_values: Vec<&dyn ToSql> = vec![&FileStatus::Completed, &now];
    for id in ids {
        param_values.push(id);
    }
    Ok(conn.execute(&sql, param_values.as_slice())?)
}

/// Moves one file from `from` to `to`, keeping its assignee.
/// Returns false if the file was not in `from`.
pub fn transition(
    conn: &Connection,
    id: i64,
    from: FileStatus,
    to: FileStatus,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE file_items SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        params![id, from, to, now],
    )?;
    Ok(changed > 0)
}

/// Puts a file back in the pending pool without an assignee.
pub fn reset_to_pending(conn: &Connection, id: i64, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE file_items SET status = ?2, assigned_to = NULL, updated_at = ?3 WHERE id = ?1",
        params![id, FileStatus::Pending, now],
    )?;
    Ok(changed > 0)
}

/// Points a file at its processed variant and flags it processed.
/// A `None` MIME type keeps the stored one.
pub fn record_processed(
    conn: &Connection,
    id: i64,
    path: &str,
    file_size: u64,
    mime_type: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE file_items SET path = ?2, file_size = ?3, mime_type = COALESCE(?4, mime_type),
         is_processed = 1, updated_at = ?5
         WHERE id = ?1",
        params![id, path, file_size, mime_type, now],
    )?;
    Ok(changed > 0)
}

/// Counts files placed in a folder, including those in its subfolders.
pub fn count_in_folder(conn: &Connection, folder_id: i64) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM file_items WHERE folder_id = ?1",
        params![folder_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn count_in_subfolder(conn: &Connection, subfolder_id: i64) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM file_items WHERE subfolder_id = ?1",
        params![subfolder_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Counts files of an order that are not yet completed.
pub fn count_uncompleted_for_order(conn: &Connection, order_id: i64) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM file_items WHERE order_id = ?1 AND status != ?2",
        params![order_id, FileStatus::Completed],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Counts all files of an order.
pub fn count_for_order(conn: &Connection, order_id: i64) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM file_items WHERE order_id = ?1",
        params![order_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Counts files among `ids` whose status is (or, with `negate`, is not) `status`.
fn count_in(
    conn: &Connection,
    ids: &[i64],
    status: FileStatus,
    negate: bool,
) -> Result<u64, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    let op = if negate { "!=" } else { "=" };
    let sql = format!(
        "SELECT COUNT(*) FROM file_items WHERE status {} ?1 AND id IN ({})",
        op,
        placeholders(2, ids.len())
    );
    let mut param_values: Vec<&dyn ToSql> = vec![&status];
    for id in ids {
        param_values.push(id);
    }
    let count: u64 = conn.query_row(&sql, param_values.as_slice(), |r| r.get(0))?;
    Ok(count)
}

/// Counts completed files among `ids`.
pub fn count_completed_in(conn: &Connection, ids: &[i64]) -> Result<u64, DatabaseError> {
    count_in(conn, ids, FileStatus::Completed, false)
}

/// Counts existing files among `ids` that are not completed.
pub fn count_uncompleted_in(conn: &Connection, ids: &[i64]) -> Result<u64, DatabaseError> {
    count_in(conn, ids, FileStatus::Completed, true)
}

/// Deletes a file item.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM file_items WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::folder_repo;
    use crate::db::order_repo::{self, NewOrderRow};
    use crate::db::user_repo::{self, NewUser};
    use crate::db::Database;

    struct Fixture {
        db: Database,
        user_id: i64,
        order_id: i64,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let (user_id, order_id) = db
            .with_conn(|conn| {
                let user_id = user_repo::insert(
                    conn,
                    &NewUser {
                        name: "Editor".to_string(),
                        email: "editor@example.com".to_string(),
                        role: Role::User,
                    },
                    Utc::now(),
                )?;
                let order_id = order_repo::insert(
                    conn,
                    &NewOrderRow {
                        order_number: "ORD-1".to_string(),
                        name: "Order".to_string(),
                        description: None,
                        customer_name: None,
                        deadline: None,
                        created_by: user_id,
                    },
                    Utc::now(),
                )?;
                Ok((user_id, order_id))
            })
            .unwrap();
        Fixture {
            db,
            user_id,
            order_id,
        }
    }

    fn sample_file(order_id: i64, name: &str) -> NewFileItem {
        NewFileItem {
            order_id,
            folder_id: None,
            subfolder_id: None,
            name: name.to_string(),
            original_name: name.to_string(),
            path: format!("orders/{}/{}", order_id, name),
            directory_path: None,
            file_type: "jpg".to_string(),
            mime_type: Some("image/jpeg".to_string()),
            file_size: 1024,
        }
    }

    fn insert_files(conn: &Connection, order_id: i64, count: usize) -> Result<Vec<i64>, DatabaseError> {
        (0..count)
            .map(|i| insert(conn, &sample_file(order_id, &format!("img{}.jpg", i)), Utc::now()))
            .collect()
    }

    #[test]
    fn test_insert_and_find() {
        let f = fixture();
        let file = f
            .db
            .with_conn(|conn| {
                let id = insert(conn, &sample_file(f.order_id, "a.jpg"), Utc::now())?;
                find_by_id(conn, id)
            })
            .unwrap()
            .unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert!(file.assigned_to.is_none());
        assert!(!file.is_processed);
        assert_eq!(file.file_size, 1024);
        assert_eq!(file.mime_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_find_by_ids_preserves_requested_order() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let ids = insert_files(conn, f.order_id, 3)?;
            let wanted = vec![ids[2], ids[0], 9999, ids[1]];
            let rows = find_by_ids(conn, &wanted)?;
            let got: Vec<i64> = rows.iter().map(|r| r.id).collect();
            assert_eq!(got, vec![ids[2], ids[0], ids[1]]);
            assert!(find_by_ids(conn, &[])?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_select_claimable_is_ordered_and_limited() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let ids = insert_files(conn, f.order_id, 5)?;
            let selected = select_claimable(conn, f.order_id, &FileScope::Order, 3)?;
            assert_eq!(selected, ids[..3].to_vec());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_select_claimable_skips_assigned_files() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let ids = insert_files(conn, f.order_id, 4)?;
            assign(conn, &ids[..2], f.user_id, FileStatus::Claimed, Utc::now())?;
            let selected = select_claimable(conn, f.order_id, &FileScope::Order, 10)?;
            assert_eq!(selected, ids[2..].to_vec());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_select_claimable_scopes() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let folder = folder_repo::insert_folder(conn, f.order_id, "A", Utc::now())?;
            let sub = folder_repo::insert_subfolder(conn, folder, "a1", Utc::now())?;

            let root = insert(conn, &sample_file(f.order_id, "root.jpg"), Utc::now())?;
            let mut in_folder = sample_file(f.order_id, "f.jpg");
            in_folder.folder_id = Some(folder);
            let in_folder = insert(conn, &in_folder, Utc::now())?;
            let mut in_sub = sample_file(f.order_id, "s.jpg");
            in_sub.folder_id = Some(folder);
            in_sub.subfolder_id = Some(sub);
            in_sub.directory_path = Some("shoot/day1".to_string());
            let in_sub = insert(conn, &in_sub, Utc::now())?;

            assert_eq!(
                select_claimable(conn, f.order_id, &FileScope::Order, 10)?,
                vec![root, in_folder, in_sub]
            );
            assert_eq!(
                select_claimable(conn, f.order_id, &FileScope::Folder(folder), 10)?,
                vec![in_folder, in_sub]
            );
            assert_eq!(
                select_claimable(conn, f.order_id, &FileScope::Subfolder(sub), 10)?,
                vec![in_sub]
            );
            assert_eq!(
                select_claimable(
                    conn,
                    f.order_id,
                    &FileScope::Directory("shoot/day1".to_string()),
                    10
                )?,
                vec![in_sub]
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_release_only_touches_claimed_files() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let ids = insert_files(conn, f.order_id, 3)?;
            assign(conn, &ids, f.user_id, FileStatus::Claimed, Utc::now())?;
            mark_completed(conn, &ids[..1], Utc::now())?;
            transition(conn, ids[1], FileStatus::Claimed, FileStatus::Processing, Utc::now())?;

            let released = release_claimed(conn, &ids, Utc::now())?;
            assert_eq!(released, 1);

            let rows = find_by_ids(conn, &ids)?;
            assert_eq!(rows[0].status, FileStatus::Completed);
            assert_eq!(rows[0].assigned_to, Some(f.user_id));
            assert_eq!(rows[1].status, FileStatus::Processing);
            assert_eq!(rows[2].status, FileStatus::Pending);
            assert!(rows[2].assigned_to.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_counts() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let ids = insert_files(conn, f.order_id, 4)?;
            assert_eq!(count_for_order(conn, f.order_id)?, 4);
            assert_eq!(count_uncompleted_for_order(conn, f.order_id)?, 4);

            assign(conn, &ids[..2], f.user_id, FileStatus::Claimed, Utc::now())?;
            mark_completed(conn, &ids[..1], Utc::now())?;

            assert_eq!(count_uncompleted_for_order(conn, f.order_id)?, 3);
            assert_eq!(count_completed_in(conn, &ids[..2])?, 1);
            assert_eq!(count_uncompleted_in(conn, &ids[..2])?, 1);
            assert_eq!(count_uncompleted_in(conn, &[])?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reset_to_pending_clears_assignee() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let ids = insert_files(conn, f.order_id, 1)?;
            assign(conn, &ids, f.user_id, FileStatus::Claimed, Utc::now())?;
            transition(conn, ids[0], FileStatus::Claimed, FileStatus::Processing, Utc::now())?;

            assert!(reset_to_pending(conn, ids[0], Utc::now())?);
            let row = find_by_id(conn, ids[0])?.unwrap();
            assert_eq!(row.status, FileStatus::Pending);
            assert!(row.assigned_to.is_none());
            assert_eq!(select_claimable(conn, f.order_id, &FileScope::Order, 5)?, ids);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_record_processed_keeps_mime_when_absent() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let id = insert(conn, &sample_file(f.order_id, "a.jpg"), Utc::now())?;
            let path = format!("orders/{}/a_completed.jpg", f.order_id);

            assert!(record_processed(conn, id, &path, 4096, None, Utc::now())?);
            let row = find_by_id(conn, id)?.unwrap();
            assert_eq!(row.path, path);
            assert_eq!(row.file_size, 4096);
            assert_eq!(row.mime_type.as_deref(), Some("image/jpeg"));
            assert!(row.is_processed);

            record_processed(conn, id, &path, 10, Some("image/png"), Utc::now())?;
            let row = find_by_id(conn, id)?.unwrap();
            assert_eq!(row.mime_type.as_deref(), Some("image/png"));
            assert!(!record_processed(conn, 9999, &path, 1, None, Utc::now())?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_folder_counts_include_subfolders() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let folder = folder_repo::insert_folder(conn, f.order_id, "A", Utc::now())?;
            let sub = folder_repo::insert_subfolder(conn, folder, "a1", Utc::now())?;
            let mut direct = sample_file(f.order_id, "f.jpg");
            direct.folder_id = Some(folder);
            insert(conn, &direct, Utc::now())?;
            let mut nested = sample_file(f.order_id, "s.jpg");
            nested.folder_id = Some(folder);
            nested.subfolder_id = Some(sub);
            insert(conn, &nested, Utc::now())?;

            assert_eq!(count_in_folder(conn, folder)?, 2);
            assert_eq!(count_in_subfolder(conn, sub)?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let f = fixture();
        f.db.with_conn(|conn| {
            let id = insert(conn, &sample_file(f.order_id, "a.jpg"), Utc::now())?;
            assert!(!transition(conn, id, FileStatus::Claimed, FileStatus::Processing, Utc::now())?);
            assert!(delete(conn, id)?);
            assert!(find_by_id(conn, id)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
