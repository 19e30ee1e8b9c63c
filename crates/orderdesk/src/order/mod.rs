//! Order management: creation, folders, file registration and the
//! completed/approved transitions.

mod error;
mod service;

pub use error::OrderError;
pub use service::{
    FileNode, FilePlacement, FolderNode, FolderTree, NewFile, NewOrder, OrderService,
    OrderSummary, OrderUpdate, ProcessedFile, SubfolderNode,
};
