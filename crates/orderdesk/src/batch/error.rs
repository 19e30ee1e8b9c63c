//! Batch (claim) error types.

use thiserror::Error;

use crate::auth::AccessDenied;
use crate::db::DatabaseError;
use crate::status::FileStatus;

/// Errors from claim, release and completion operations.
///
/// "No files available" is not an error: `claim_batch` returns `Ok(None)`.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch size {requested} is out of range (1..={max})")]
    InvalidBatchSize { requested: u32, max: u32 },

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Claim not found: {0}")]
    ClaimNotFound(i64),

    #[error("File not found: {0}")]
    FileNotFound(i64),

    /// The file exists (or may exist) but is not a member of the claim.
    #[error("File {file_id} is not part of batch {claim_id}")]
    NotInBatch { claim_id: i64, file_id: i64 },

    #[error("Claim {claim_id} belongs to user {owner_id}, not user {user_id}")]
    NotClaimOwner {
        claim_id: i64,
        owner_id: i64,
        user_id: i64,
    },

    #[error("File {file_id} is assigned to another user than {user_id}")]
    NotAssignee { file_id: i64, user_id: i64 },

    /// The file is still listed by an open claim; release or complete it first.
    #[error("File {file_id} is part of open batch {claim_id}")]
    FileInOpenBatch { file_id: i64, claim_id: i64 },

    #[error("File {file_id} cannot move from {from} to {to}")]
    InvalidFileTransition {
        file_id: i64,
        from: FileStatus,
        to: FileStatus,
    },

    #[error("Access denied: {0}")]
    Forbidden(#[from] AccessDenied),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl BatchError {
    /// Whether the error comes from the storage layer rather than from the request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, BatchError::Database(_))
    }
}
