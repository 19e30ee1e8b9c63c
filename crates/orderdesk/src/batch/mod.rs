//! File claims ("batches").
//!
//! A user reserves a batch of pending files, works through it, and either
//! completes or releases it. Completion rolls forward into the order.

mod error;
mod service;

pub use crate::db::file_item_repo::FileScope as ClaimScope;
pub use error::BatchError;
pub use service::{BatchStats, FileBatchService};
