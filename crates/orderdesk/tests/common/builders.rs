//! Builder patterns for seeding test data programmatically.
//!
//! Orders are created through the public services, so seeded data goes
//! through the same validation and naming as real data.

#![allow(dead_code)]

use std::collections::HashMap;

use orderdesk::db::folder_repo;
use orderdesk::db::order_repo::OrderRow;
use orderdesk::{Actor, FilePlacement, NewFile, NewOrder};

use super::TestHarness;

/// Where a seeded file goes, by folder/subfolder name.
#[derive(Clone)]
enum Location {
    Root,
    Folder(String),
    Subfolder(String, String),
}

/// Builder for an order with folders, subfolders and files.
pub struct OrderBuilder {
    name: String,
    customer_name: Option<String>,
    folders: Vec<String>,
    subfolders: Vec<(String, String)>,
    files: Vec<(String, Location)>,
}

/// What [`OrderBuilder::build`] created.
pub struct SeededOrder {
    pub order: OrderRow,
    /// Folder ids by name, including the default folders.
    pub folders: HashMap<String, i64>,
    /// Subfolder ids by "folder/subfolder".
    pub subfolders: HashMap<String, i64>,
    /// File ids in creation order.
    pub file_ids: Vec<i64>,
}

impl SeededOrder {
    pub fn id(&self) -> i64 {
        self.order.id
    }

    pub fn folder(&self, name: &str) -> i64 {
        self.folders[name]
    }

    pub fn subfolder(&self, folder: &str, name: &str) -> i64 {
        self.subfolders[&format!("{}/{}", folder, name)]
    }
}

impl OrderBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            customer_name: None,
            folders: Vec::new(),
            subfolders: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn customer(mut self, name: &str) -> Self {
        self.customer_name = Some(name.to_string());
        self
    }

    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(name.to_string());
        self
    }

    pub fn subfolder(mut self, folder: &str, name: &str) -> Self {
        self.subfolders.push((folder.to_string(), name.to_string()));
        self
    }

    /// Adds `count` files at the order root.
    pub fn root_files(mut self, count: usize) -> Self {
        for i in 0..count {
            self.files.push((format!("root_{}.jpg", i), Location::Root));
        }
        self
    }

    /// Adds a file with a client path at the order root.
    pub fn file_at(mut self, client_path: &str) -> Self {
        self.files.push((client_path.to_string(), Location::Root));
        self
    }

    pub fn folder_files(mut self, folder: &str, count: usize) -> Self {
        for i in 0..count {
            self.files.push((
                format!("{}_{}.jpg", folder.replace(' ', "_"), i),
                Location::Folder(folder.to_string()),
            ));
        }
        self
    }

    pub fn subfolder_files(mut self, folder: &str, subfolder: &str, count: usize) -> Self {
        for i in 0..count {
            self.files.push((
                format!("{}_{}.jpg", subfolder.replace(' ', "_"), i),
                Location::Subfolder(folder.to_string(), subfolder.to_string()),
            ));
        }
        self
    }

    pub fn build(self, harness: &TestHarness) -> SeededOrder {
        self.build_as(harness, &harness.admin)
    }

    pub fn build_as(self, harness: &TestHarness, actor: &Actor) -> SeededOrder {
        let order = harness
            .orders
            .create_order(
                actor,
                NewOrder {
                    name: self.name,
                    customer_name: self.customer_name,
                    ..NewOrder::default()
                },
            )
            .expect("Failed to create order");

        for name in &self.folders {
            harness
                .orders
                .create_folder(actor, order.id, name)
                .expect("Failed to create folder");
        }

        let folders: HashMap<String, i64> = harness
            .db
            .with_conn(|conn| folder_repo::list_folders(conn, order.id))
            .expect("Failed to list folders")
            .into_iter()
            .map(|f| (f.name, f.id))
            .collect();

        let mut subfolders = HashMap::new();
        for (folder, name) in &self.subfolders {
            let sub = harness
                .orders
                .create_subfolder(actor, folders[folder], name)
                .expect("Failed to create subfolder");
            subfolders.insert(format!("{}/{}", folder, name), sub.id);
        }

        let mut file_ids = Vec::with_capacity(self.files.len());
        for (client_path, location) in self.files {
            let placement = match location {
                Location::Root => FilePlacement::OrderRoot,
                Location::Folder(name) => FilePlacement::Folder(folders[&name]),
                Location::Subfolder(folder, name) => {
                    FilePlacement::Subfolder(subfolders[&format!("{}/{}", folder, name)])
                }
            };
            let file = harness
                .orders
                .register_file(
                    actor,
                    order.id,
                    NewFile {
                        client_path,
                        size: 2048,
                        placement,
                        ..NewFile::default()
                    },
                )
                .expect("Failed to register file");
            file_ids.push(file.id);
        }

        SeededOrder {
            order,
            folders,
            subfolders,
            file_ids,
        }
    }
}
