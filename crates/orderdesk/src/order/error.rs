use thiserror::Error;

use crate::auth::AccessDenied;
use crate::db::DatabaseError;
use crate::status::OrderStatus;

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Folder not found: {0}")]
    FolderNotFound(i64),

    #[error("Subfolder not found: {0}")]
    SubfolderNotFound(i64),

    #[error("File not found: {0}")]
    FileNotFound(i64),

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {order_id} still has {remaining} uncompleted file(s)")]
    OrderIncomplete { order_id: i64, remaining: u64 },

    /// Files cannot be added once an order is completed or approved.
    #[error("Order {order_id} is {status}")]
    OrderClosed { order_id: i64, status: OrderStatus },

    /// Folders and subfolders are only deleted once emptied.
    #[error("{0} is not empty")]
    NotEmpty(String),

    #[error("File {file_id} is part of open batch {claim_id}")]
    FileInUse { file_id: i64, claim_id: i64 },

    #[error("File {file_id} is assigned to another user than {user_id}")]
    NotAssignee { file_id: i64, user_id: i64 },

    #[error("Access denied: {0}")]
    Forbidden(#[from] AccessDenied),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
