pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config, load_config_from_str, MAX_BATCH_SIZE_LIMIT};
pub use schema::{ClaimsConfig, Config, OrdersConfig};
