//! Orders, their folder tree and file registration.

use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use super::error::OrderError;
use crate::auth::{Actor, Permission};
use crate::config::OrdersConfig;
use crate::db::claim_repo;
use crate::db::file_item_repo::{self, FileItemRow, NewFileItem};
use crate::db::folder_repo::{self, FolderRow, SubfolderRow};
use crate::db::order_repo::{self, NewOrderRow, OrderDetails, OrderFilter, OrderRow};
use crate::db::{stats_repo, user_repo, Database, DatabaseError};
use crate::naming;
use crate::stats::{self, OrderStats, StatusCounts};
use crate::status::{FileStatus, OrderStatus};

/// Input for [`OrderService::create_order`].
#[derive(Debug, Clone, Default)]
pub struct NewOrder {
    pub name: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub deadline: Option<NaiveDate>,
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub deadline: Option<NaiveDate>,
}

/// Where a registered file is placed inside its order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilePlacement {
    #[default]
    OrderRoot,
    Folder(i64),
    /// The folder is taken from the subfolder.
    Subfolder(i64),
}

/// Metadata of a file to register. Bytes are stored elsewhere.
#[derive(Debug, Clone, Default)]
pub struct NewFile {
    /// Path as sent by the client, possibly with directories.
    pub client_path: String,
    pub size: u64,
    /// Guessed from the name when absent.
    pub mime_type: Option<String>,
    pub placement: FilePlacement,
    /// Optional stored-name prefix, e.g. `edited`.
    pub prefix: Option<String>,
}

/// Metadata of the processed (edited) variant of a file.
#[derive(Debug, Clone, Default)]
pub struct ProcessedFile {
    pub size: u64,
    /// Keeps the stored MIME type when absent.
    pub mime_type: Option<String>,
}

/// An order with its per-status file counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    #[serde(flatten)]
    pub order: OrderRow,
    pub files: StatusCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    #[serde(flatten)]
    pub file: FileItemRow,
    /// Name of the assigned user, if any.
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubfolderNode {
    #[serde(flatten)]
    pub subfolder: SubfolderRow,
    pub files: Vec<FileNode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    #[serde(flatten)]
    pub folder: FolderRow,
    pub files: Vec<FileNode>,
    pub subfolders: Vec<SubfolderNode>,
}

/// Nested view of an order's folders, subfolders and files.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderTree {
    pub order_id: i64,
    /// Files placed directly in the order.
    pub files: Vec<FileNode>,
    pub folders: Vec<FolderNode>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Database,
    config: OrdersConfig,
}

impl OrderService {
    pub fn new(db: Database) -> Self {
        Self::with_config(db, OrdersConfig::default())
    }

    pub fn with_config(db: Database, config: OrdersConfig) -> Self {
        Self { db, config }
    }

    /// Creates a pending order with a fresh order number and the default folders.
    pub fn create_order(&self, actor: &Actor, new: NewOrder) -> Result<OrderRow, OrderError> {
        actor.require(Permission::CreateOrders)?;
        let name = required_name(&new.name, "Order name")?;

        let order = self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let now = Utc::now();
            let order_number = self.next_order_number(tx, now.format("%Y-%m").to_string())?;
            let order_id = order_repo::insert(
                tx,
                &NewOrderRow {
                    order_number,
                    name,
                    description: new.description,
                    customer_name: new.customer_name,
                    deadline: new.deadline,
                    created_by: actor.user_id,
                },
                now,
            )?;

            for folder in &self.config.default_folders {
                folder_repo::insert_folder(tx, order_id, folder, now)?;
            }

            order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))
        })?;

        info!(order_id = order.id, order_number = %order.order_number, "Created order");
        Ok(order)
    }

    /// `<prefix>-<YYYY-MM>-<NNN>` with NNN one past the order count, bumped
    /// past numbers already taken (e.g. after deletions).
    fn next_order_number(&self, conn: &Connection, month: String) -> Result<String, DatabaseError> {
        let mut sequence = order_repo::count(conn)? + 1;
        loop {
            let candidate = format!("{}-{}-{:03}", self.config.number_prefix, month, sequence);
            if !order_repo::order_number_exists(conn, &candidate)? {
                return Ok(candidate);
            }
            sequence += 1;
        }
    }

    pub fn find_order(&self, actor: &Actor, order_id: i64) -> Result<OrderRow, OrderError> {
        actor.require(Permission::ViewOrders)?;
        self.db
            .with_conn(|conn| order_repo::find_by_id(conn, order_id))?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Lists orders newest first with file counts. Returns the page and the total match count.
    pub fn list_orders(
        &self,
        actor: &Actor,
        filter: &OrderFilter,
    ) -> Result<(Vec<OrderSummary>, u64), OrderError> {
        actor.require(Permission::ViewOrders)?;

        let (orders, total, counts) = self.db.with_conn(|conn| {
            let (orders, total) = order_repo::query(conn, filter)?;
            let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
            let counts = stats_repo::counts_by_order(conn, &ids)?;
            Ok((orders, total, counts))
        })?;

        let mut by_order: HashMap<i64, StatusCounts> = HashMap::new();
        for (order_id, status, count) in counts {
            by_order.entry(order_id).or_default().add(status, count);
        }

        let summaries = orders
            .into_iter()
            .map(|order| OrderSummary {
                files: by_order.get(&order.id).copied().unwrap_or_default(),
                order,
            })
            .collect();
        Ok((summaries, total))
    }

    pub fn update_order(
        &self,
        actor: &Actor,
        order_id: i64,
        update: OrderUpdate,
    ) -> Result<OrderRow, OrderError> {
        actor.require(Permission::EditOrders)?;
        let name = update
            .name
            .as_deref()
            .map(|n| required_name(n, "Order name"))
            .transpose()?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let current =
                order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))?;
            let details = OrderDetails {
                name: name.unwrap_or(current.name),
                description: update.description.or(current.description),
                customer_name: update.customer_name.or(current.customer_name),
                deadline: update.deadline.or(current.deadline),
            };
            order_repo::update_details(tx, order_id, &details, Utc::now())?;
            order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))
        })
    }

    /// Deletes an order with its folders, files and claims.
    pub fn delete_order(&self, actor: &Actor, order_id: i64) -> Result<(), OrderError> {
        actor.require(Permission::DeleteOrders)?;
        let deleted = self.db.with_conn(|conn| order_repo::delete(conn, order_id))?;
        if !deleted {
            return Err(OrderError::OrderNotFound(order_id));
        }
        info!(order_id, "Deleted order");
        Ok(())
    }

    pub fn create_folder(
        &self,
        actor: &Actor,
        order_id: i64,
        name: &str,
    ) -> Result<FolderRow, OrderError> {
        actor.require(Permission::EditOrders)?;
        let name = required_name(name, "Folder name")?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            if order_repo::find_by_id(tx, order_id)?.is_none() {
                return Err(OrderError::OrderNotFound(order_id));
            }
            let folder_id = folder_repo::insert_folder(tx, order_id, &name, Utc::now())
                .map_err(|e| already_exists(e, format!("Folder '{}'", name)))?;
            folder_repo::find_folder(tx, folder_id)?.ok_or(OrderError::FolderNotFound(folder_id))
        })
    }

    pub fn create_subfolder(
        &self,
        actor: &Actor,
        folder_id: i64,
        name: &str,
    ) -> Result<SubfolderRow, OrderError> {
        actor.require(Permission::EditOrders)?;
        let name = required_name(name, "Subfolder name")?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            if folder_repo::find_folder(tx, folder_id)?.is_none() {
                return Err(OrderError::FolderNotFound(folder_id));
            }
            let subfolder_id = folder_repo::insert_subfolder(tx, folder_id, &name, Utc::now())
                .map_err(|e| already_exists(e, format!("Subfolder '{}'", name)))?;
            folder_repo::find_subfolder(tx, subfolder_id)?
                .ok_or(OrderError::SubfolderNotFound(subfolder_id))
        })
    }

    /// Toggles the open/collapsed flag of a folder.
    pub fn set_folder_open(
        &self,
        actor: &Actor,
        folder_id: i64,
        is_open: bool,
    ) -> Result<(), OrderError> {
        actor.require(Permission::EditOrders)?;
        if self
            .db
            .with_conn(|conn| folder_repo::set_folder_open(conn, folder_id, is_open))?
        {
            Ok(())
        } else {
            Err(OrderError::FolderNotFound(folder_id))
        }
    }

    pub fn rename_folder(
        &self,
        actor: &Actor,
        folder_id: i64,
        name: &str,
    ) -> Result<FolderRow, OrderError> {
        actor.require(Permission::EditOrders)?;
        let name = required_name(name, "Folder name")?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let folder = folder_repo::find_folder(tx, folder_id)?
                .ok_or(OrderError::FolderNotFound(folder_id))?;
            let existing = folder_repo::find_folder_by_name(tx, folder.order_id, &name)?;
            if let Some(existing) = existing {
                if existing.id != folder_id {
                    return Err(OrderError::AlreadyExists(format!("Folder '{}'", name)));
                }
            }
            folder_repo::rename_folder(tx, folder_id, &name)?;
            folder_repo::find_folder(tx, folder_id)?.ok_or(OrderError::FolderNotFound(folder_id))
        })
    }

    /// Deletes a folder that holds no files and no subfolders.
    pub fn delete_folder(&self, actor: &Actor, folder_id: i64) -> Result<(), OrderError> {
        actor.require(Permission::EditOrders)?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let folder = folder_repo::find_folder(tx, folder_id)?
                .ok_or(OrderError::FolderNotFound(folder_id))?;
            if file_item_repo::count_in_folder(tx, folder_id)? > 0
                || folder_repo::count_subfolders(tx, folder_id)? > 0
            {
                return Err(OrderError::NotEmpty(format!("Folder '{}'", folder.name)));
            }
            folder_repo::delete_folder(tx, folder_id)?;
            Ok(())
        })?;

        info!(folder_id, "Deleted folder");
        Ok(())
    }

    pub fn rename_subfolder(
        &self,
        actor: &Actor,
        subfolder_id: i64,
        name: &str,
    ) -> Result<SubfolderRow, OrderError> {
        actor.require(Permission::EditOrders)?;
        let name = required_name(name, "Subfolder name")?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            if folder_repo::find_subfolder(tx, subfolder_id)?.is_none() {
                return Err(OrderError::SubfolderNotFound(subfolder_id));
            }
            folder_repo::rename_subfolder(tx, subfolder_id, &name)
                .map_err(|e| already_exists(e, format!("Subfolder '{}'", name)))?;
            folder_repo::find_subfolder(tx, subfolder_id)?
                .ok_or(OrderError::SubfolderNotFound(subfolder_id))
        })
    }

    /// Deletes a subfolder that holds no files.
    pub fn delete_subfolder(&self, actor: &Actor, subfolder_id: i64) -> Result<(), OrderError> {
        actor.require(Permission::EditOrders)?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let subfolder = folder_repo::find_subfolder(tx, subfolder_id)?
                .ok_or(OrderError::SubfolderNotFound(subfolder_id))?;
            if file_item_repo::count_in_subfolder(tx, subfolder_id)? > 0 {
                return Err(OrderError::NotEmpty(format!("Subfolder '{}'", subfolder.name)));
            }
            folder_repo::delete_subfolder(tx, subfolder_id)?;
            Ok(())
        })?;

        info!(subfolder_id, "Deleted subfolder");
        Ok(())
    }

    /// Registers a file's metadata as a pending item of an open order.
    pub fn register_file(
        &self,
        actor: &Actor,
        order_id: i64,
        new: NewFile,
    ) -> Result<FileItemRow, OrderError> {
        actor.require(Permission::CreateFiles)?;
        if new.client_path.trim().is_empty() {
            return Err(OrderError::InvalidInput("File path is empty".to_string()));
        }

        let file = self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let order =
                order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))?;
            if !order.status.is_open() {
                return Err(OrderError::OrderClosed {
                    order_id,
                    status: order.status,
                });
            }

            let (folder_id, subfolder_id) = resolve_placement(tx, order_id, new.placement)?;

            let now = Utc::now();
            let client = naming::split_client_path(&new.client_path);
            let stored_name =
                naming::generate_filename(&client, order_id, new.prefix.as_deref(), now);
            let path = naming::storage_path(order_id, client.directory.as_deref(), &stored_name);
            let file_type = client
                .extension
                .as_deref()
                .map(str::to_ascii_lowercase)
                .unwrap_or_else(|| "unknown".to_string());
            let mime_type = new
                .mime_type
                .or_else(|| naming::guess_mime(&client.file_name));

            let file_id = file_item_repo::insert(
                tx,
                &NewFileItem {
                    order_id,
                    folder_id,
                    subfolder_id,
                    name: stored_name,
                    original_name: client.file_name,
                    path,
                    directory_path: client.directory,
                    file_type,
                    mime_type,
                    file_size: new.size,
                },
                now,
            )?;

            file_item_repo::find_by_id(tx, file_id)?.ok_or(OrderError::OrderNotFound(order_id))
        })?;

        info!(order_id, file_id = file.id, name = %file.name, "Registered file");
        Ok(file)
    }

    /// Removes a file's record. Files listed by an open claim are kept.
    pub fn delete_file(&self, actor: &Actor, file_id: i64) -> Result<(), OrderError> {
        actor.require(Permission::DeleteFiles)?;

        self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let file =
                file_item_repo::find_by_id(tx, file_id)?.ok_or(OrderError::FileNotFound(file_id))?;
            if let Some(claim) = claim_repo::find_open_containing(tx, file.order_id, file_id)? {
                return Err(OrderError::FileInUse {
                    file_id,
                    claim_id: claim.id,
                });
            }
            file_item_repo::delete(tx, file_id)?;
            Ok(())
        })?;

        info!(file_id, "Deleted file");
        Ok(())
    }

    /// Records the processed variant of a file next to the original:
    /// `<stem>_completed.<ext>` in the same directory.
    pub fn record_processed_file(
        &self,
        actor: &Actor,
        file_id: i64,
        processed: ProcessedFile,
    ) -> Result<FileItemRow, OrderError> {
        actor.require(Permission::EditFiles)?;

        let file = self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let file =
                file_item_repo::find_by_id(tx, file_id)?.ok_or(OrderError::FileNotFound(file_id))?;
            if !actor.may_handle(file.assigned_to) {
                return Err(OrderError::NotAssignee {
                    file_id,
                    user_id: actor.user_id,
                });
            }

            let path = naming::processed_file_path(&file.path, FileStatus::Completed.as_str());
            file_item_repo::record_processed(
                tx,
                file_id,
                &path,
                processed.size,
                processed.mime_type.as_deref(),
                Utc::now(),
            )?;
            file_item_repo::find_by_id(tx, file_id)?.ok_or(OrderError::FileNotFound(file_id))
        })?;

        info!(file_id, path = %file.path, "Recorded processed file");
        Ok(file)
    }

    /// Moves an open order to `completed` once every file is completed.
    pub fn mark_order_completed(&self, actor: &Actor, order_id: i64) -> Result<OrderRow, OrderError> {
        actor.require(Permission::EditOrders)?;

        let order = self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let order =
                order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))?;
            if !order.status.is_open() {
                return Err(OrderError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to: OrderStatus::Completed,
                });
            }

            let stats = stats::order_stats(tx, order_id)?;
            if !stats.is_completed() {
                return Err(OrderError::OrderIncomplete {
                    order_id,
                    remaining: stats.totals.total - stats.totals.completed,
                });
            }

            order_repo::transition(
                tx,
                order_id,
                &[OrderStatus::Pending, OrderStatus::InProgress],
                OrderStatus::Completed,
                Utc::now(),
            )?;
            order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))
        })?;

        info!(order_id, "Order marked completed");
        Ok(order)
    }

    /// Approves a completed order.
    pub fn approve_order(&self, actor: &Actor, order_id: i64) -> Result<OrderRow, OrderError> {
        actor.require(Permission::EditOrders)?;

        let order = self.db.with_transaction(|tx| -> Result<_, OrderError> {
            let order =
                order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))?;
            let approved = order_repo::transition(
                tx,
                order_id,
                &[OrderStatus::Completed],
                OrderStatus::Approved,
                Utc::now(),
            )?;
            if !approved {
                return Err(OrderError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to: OrderStatus::Approved,
                });
            }
            order_repo::find_by_id(tx, order_id)?.ok_or(OrderError::OrderNotFound(order_id))
        })?;

        info!(order_id, "Order approved");
        Ok(order)
    }

    pub fn order_stats(&self, actor: &Actor, order_id: i64) -> Result<OrderStats, OrderError> {
        actor.require(Permission::ViewOrders)?;
        self.db.with_conn(|conn| {
            if order_repo::find_by_id(conn, order_id)?.is_none() {
                return Ok(None);
            }
            stats::order_stats(conn, order_id).map(Some)
        })?
        .ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Builds the nested folder view of an order.
    pub fn folder_tree(&self, actor: &Actor, order_id: i64) -> Result<FolderTree, OrderError> {
        actor.require(Permission::ViewFiles)?;

        let loaded = self.db.with_conn(|conn| {
            if order_repo::find_by_id(conn, order_id)?.is_none() {
                return Ok(None);
            }
            let folders = folder_repo::list_folders(conn, order_id)?;
            let subfolders = folder_repo::list_subfolders_for_order(conn, order_id)?;
            let files = file_item_repo::list_by_order(conn, order_id)?;
            let users = user_repo::list(conn)?;
            Ok(Some((folders, subfolders, files, users)))
        })?;
        let (folders, subfolders, files, users) =
            loaded.ok_or(OrderError::OrderNotFound(order_id))?;

        let names: HashMap<i64, String> = users.into_iter().map(|u| (u.id, u.name)).collect();
        Ok(build_tree(order_id, folders, subfolders, files, &names))
    }

    /// Distinct client directories used by an order's files, sorted.
    pub fn order_directories(&self, actor: &Actor, order_id: i64) -> Result<Vec<String>, OrderError> {
        actor.require(Permission::ViewFiles)?;
        let files = self
            .db
            .with_conn(|conn| file_item_repo::list_by_order(conn, order_id))?;
        let directories: BTreeSet<String> =
            files.into_iter().filter_map(|f| f.directory_path).collect();
        Ok(directories.into_iter().collect())
    }
}

fn required_name(raw: &str, what: &str) -> Result<String, OrderError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(OrderError::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

fn already_exists(err: DatabaseError, what: String) -> OrderError {
    if err.is_constraint_violation() {
        OrderError::AlreadyExists(what)
    } else {
        OrderError::Database(err)
    }
}

/// Checks that the placement belongs to the order and returns (folder, subfolder).
fn resolve_placement(
    conn: &Connection,
    order_id: i64,
    placement: FilePlacement,
) -> Result<(Option<i64>, Option<i64>), OrderError> {
    match placement {
        FilePlacement::OrderRoot => Ok((None, None)),
        FilePlacement::Folder(folder_id) => {
            let folder = folder_repo::find_folder(conn, folder_id)?
                .filter(|f| f.order_id == order_id)
                .ok_or(OrderError::FolderNotFound(folder_id))?;
            Ok((Some(folder.id), None))
        }
        FilePlacement::Subfolder(subfolder_id) => {
            let subfolder = folder_repo::find_subfolder(conn, subfolder_id)?
                .ok_or(OrderError::SubfolderNotFound(subfolder_id))?;
            let folder = folder_repo::find_folder(conn, subfolder.folder_id)?
                .filter(|f| f.order_id == order_id);
            if folder.is_none() {
                warn!(order_id, subfolder_id, "Subfolder belongs to another order");
                return Err(OrderError::SubfolderNotFound(subfolder_id));
            }
            Ok((Some(subfolder.folder_id), Some(subfolder.id)))
        }
    }
}

fn build_tree(
    order_id: i64,
    folders: Vec<FolderRow>,
    subfolders: Vec<SubfolderRow>,
    files: Vec<FileItemRow>,
    names: &HashMap<i64, String>,
) -> FolderTree {
    let mut root = Vec::new();
    let mut by_folder: HashMap<i64, Vec<FileNode>> = HashMap::new();
    let mut by_subfolder: HashMap<i64, Vec<FileNode>> = HashMap::new();

    for file in files {
        let node = FileNode {
            assignee: file.assigned_to.and_then(|id| names.get(&id).cloned()),
            file,
        };
        match (node.file.folder_id, node.file.subfolder_id) {
            (_, Some(subfolder_id)) => by_subfolder.entry(subfolder_id).or_default().push(node),
            (Some(folder_id), None) => by_folder.entry(folder_id).or_default().push(node),
            (None, None) => root.push(node),
        }
    }

    let mut nested: HashMap<i64, Vec<SubfolderNode>> = HashMap::new();
    for subfolder in subfolders {
        let files = by_subfolder.remove(&subfolder.id).unwrap_or_default();
        nested
            .entry(subfolder.folder_id)
            .or_default()
            .push(SubfolderNode { subfolder, files });
    }

    let folders = folders
        .into_iter()
        .map(|folder| FolderNode {
            files: by_folder.remove(&folder.id).unwrap_or_default(),
            subfolders: nested.remove(&folder.id).unwrap_or_default(),
            folder,
        })
        .collect();

    FolderTree {
        order_id,
        files: root,
        folders,
    }
}
