//! Order repository: CRUD and status transitions for the `orders` table.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{placeholders, DatabaseError};
use crate::status::OrderStatus;

/// An order row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRow {
    pub id: i64,
    pub order_number: String,
    pub name: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub created_by: i64,
    pub status: OrderStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_number: row.get("order_number")?,
            name: row.get("name")?,
            description: row.get("description")?,
            customer_name: row.get("customer_name")?,
            deadline: row.get("deadline")?,
            created_by: row.get("created_by")?,
            status: row.get("status")?,
            completed_at: row.get("completed_at")?,
            approved_at: row.get("approved_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Fields for a new order row.
#[derive(Debug, Clone)]
pub struct NewOrderRow {
    pub order_number: String,
    pub name: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub created_by: i64,
}

/// Editable descriptive fields of an order.
#[derive(Debug, Clone, Default)]
pub struct OrderDetails {
    pub name: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub deadline: Option<NaiveDate>,
}

/// Query filter parameters for order listing.
#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    /// Substring matched against name, order number and customer name.
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new order in `pending` state and returns its id.
pub fn insert(
    conn: &Connection,
    order: &NewOrderRow,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO orders (order_number, name, description, customer_name, deadline,
         created_by, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            order.order_number,
            order.name,
            order.description,
            order.customer_name,
            order.deadline,
            order.created_by,
            OrderStatus::Pending,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds an order by its id.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<OrderRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM orders WHERE id = ?1",
            params![id],
            OrderRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Returns true when an order already uses `order_number`.
pub fn order_number_exists(conn: &Connection, order_number: &str) -> Result<bool, DatabaseError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = ?1)",
        params![order_number],
        |r| r.get(0),
    )?;
    Ok(exists)
}

/// Counts all orders.
pub fn count(conn: &Connection) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))?;
    Ok(count)
}

/// Escapes LIKE wildcards so user input matches literally.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Queries orders with filters, returning (rows, total_count).
pub fn query(
    conn: &Connection,
    filter: &OrderFilter,
) -> Result<(Vec<OrderRow>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status));
    }
    if let Some(ref search) = filter.search {
        let idx = param_values.len() + 1;
        conditions.push(format!(
            "(name LIKE ?{idx} ESCAPE '\\' OR order_number LIKE ?{idx} ESCAPE '\\' \
             OR customer_name LIKE ?{idx} ESCAPE '\\')"
        ));
        param_values.push(Box::new(format!("%{}%", escape_like(search))));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM orders {}", where_clause);
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "SELECT * FROM orders {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows: Vec<OrderRow> = stmt
        .query_map(params_ref.as_slice(), OrderRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// Overwrites the descriptive fields of an order. Returns false if missing.
pub fn update_details(
    conn: &Connection,
    id: i64,
    details: &OrderDetails,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE orders SET name = ?2, description = ?3, customer_name = ?4, deadline = ?5,
         updated_at = ?6 WHERE id = ?1",
        params![
            id,
            details.name,
            details.description,
            details.customer_name,
            details.deadline,
            now,
        ],
    )?;
    Ok(changed > 0)
}

/// Moves an order to `to` if its current status is one of `from`.
///
/// Stamps `completed_at` / `approved_at` when entering those states.
/// Returns whether a row changed, so callers can detect a lost race.
pub fn transition(
    conn: &Connection,
    id: i64,
    from: &[OrderStatus],
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    if from.is_empty() {
        return Ok(false);
    }

    let sql = format!(
        "UPDATE orders SET status = ?2, updated_at = ?3,
         completed_at = CASE WHEN ?2 = 'completed' THEN ?3 ELSE completed_at END,
         approved_at = CASE WHEN ?2 = 'approved' THEN ?3 ELSE approved_at END
         WHERE id = ?1 AND status IN ({})",
        placeholders(4, from.len())
    );

    let mut param_values: Vec<&dyn ToSql> = vec![&id, &to, &now];
    for status in from {
        param_values.push(status);
    }

    let changed = conn.execute(&sql, param_values.as_slice())?;
    Ok(changed > 0)
}

/// Deletes an order; folders, files and claims cascade.
pub fn delete(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM orders WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}
