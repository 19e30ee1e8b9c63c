pub mod auth;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod naming;
pub mod order;
pub mod sanitize;
pub mod stats;
pub mod status;

pub use auth::{AccessDenied, Actor, Permission, Role};
pub use batch::{BatchError, BatchStats, ClaimScope, FileBatchService};
pub use config::{load_config, ClaimsConfig, Config, OrdersConfig};
pub use db::Database;
pub use error::{ConfigError, OrderdeskError, Result};
pub use order::{FilePlacement, NewFile, NewOrder, OrderError, OrderService, OrderUpdate};
pub use stats::{OrderStats, StatusCounts};
pub use status::{FileStatus, OrderStatus};
