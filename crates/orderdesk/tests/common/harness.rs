//! Test harness for isolated test execution.
//!
//! Each harness owns a temporary directory holding a real SQLite file, so
//! tests can open several independent handles on the same database the way
//! separate processes would.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use orderdesk::db::file_item_repo::{self, FileItemRow};
use orderdesk::db::order_repo::{self, OrderRow};
use orderdesk::db::user_repo::{self, NewUser};
use orderdesk::{Actor, Database, FileBatchService, OrderService, Role};

pub struct TestHarness {
    /// Keeps the database directory alive.
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
    pub orders: OrderService,
    pub batches: FileBatchService,
    /// An admin created with the harness.
    pub admin: Actor,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("orderdesk.db");
        let db = Database::open(&db_path).expect("Failed to open test database");

        let mut harness = Self {
            orders: OrderService::new(db.clone()),
            batches: FileBatchService::new(db.clone()),
            db,
            db_path,
            temp_dir,
            admin: Actor::new(0, Role::Admin),
        };
        harness.admin = harness.user("Admin", Role::Admin);
        harness
    }

    /// Creates a user and returns it as an actor.
    pub fn user(&self, name: &str, role: Role) -> Actor {
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        let id = self
            .db
            .with_conn(|conn| {
                user_repo::insert(
                    conn,
                    &NewUser {
                        name: name.to_string(),
                        email,
                        role,
                    },
                    Utc::now(),
                )
            })
            .expect("Failed to create user");
        Actor::new(id, role)
    }

    /// Opens an independent connection to the same database file.
    pub fn second_handle(&self) -> Database {
        Database::open_with_timeout(&self.db_path, Duration::from_secs(10))
            .expect("Failed to open second handle")
    }

    pub fn file(&self, id: i64) -> FileItemRow {
        self.db
            .with_conn(|conn| file_item_repo::find_by_id(conn, id))
            .expect("query failed")
            .expect("file missing")
    }

    pub fn order(&self, id: i64) -> OrderRow {
        self.db
            .with_conn(|conn| order_repo::find_by_id(conn, id))
            .expect("query failed")
            .expect("order missing")
    }

    pub fn files_of(&self, order_id: i64) -> Vec<FileItemRow> {
        self.db
            .with_conn(|conn| file_item_repo::list_by_order(conn, order_id))
            .expect("query failed")
    }
}
