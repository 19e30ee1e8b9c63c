//! Subcommand implementations.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use orderdesk::batch::{BatchStats, ClaimScope};
use orderdesk::db::claim_repo::ClaimRow;
use orderdesk::db::file_item_repo::FileItemRow;
use orderdesk::db::order_repo::{OrderFilter, OrderRow};
use orderdesk::db::user_repo::{self, NewUser};
use orderdesk::order::{FolderTree, OrderSummary, ProcessedFile};
use orderdesk::sanitize::{mask_email, redact_path};
use orderdesk::{
    Actor, ClaimsConfig, Config, Database, FileBatchService, FilePlacement, FileStatus, NewFile,
    NewOrder, OrderService, OrderStats, OrderStatus, OrderUpdate, Role,
};
use serde::Serialize;
use tracing::info;

pub struct App {
    db: Database,
    orders: OrderService,
    batches: FileBatchService,
    claims: ClaimsConfig,
    acting_user: Option<i64>,
    json: bool,
}

impl App {
    pub fn open(
        config: &Config,
        database: Option<PathBuf>,
        acting_user: Option<i64>,
        json: bool,
    ) -> Result<Self> {
        let path = database
            .or_else(|| config.resolved_database_path())
            .ok_or_else(|| anyhow!("no database path configured and no home directory found"))?;
        let db = Database::open_with_timeout(&path, config.busy_timeout())
            .with_context(|| format!("opening database {}", redact_path(&path)))?;

        Ok(Self {
            orders: OrderService::with_config(db.clone(), config.orders.clone()),
            batches: FileBatchService::with_config(db.clone(), &config.claims),
            claims: config.claims.clone(),
            db,
            acting_user,
            json,
        })
    }

    fn actor(&self) -> Result<Actor> {
        let user_id = self
            .acting_user
            .ok_or_else(|| anyhow!("this command needs --as <USER_ID>"))?;
        let user = self
            .db
            .with_conn(|conn| user_repo::find_by_id(conn, user_id))?
            .ok_or_else(|| anyhow!("unknown user {}", user_id))?;
        Ok(Actor::from_user(&user))
    }

    /// Prints `value` as JSON, or the human rendering otherwise.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

pub fn init(app: &App, admin_name: Option<String>, admin_email: Option<String>) -> Result<()> {
    let Some(email) = admin_email else {
        println!("Database ready.");
        return Ok(());
    };

    let existing = app.db.with_conn(user_repo::list)?;
    if !existing.is_empty() {
        bail!("users already exist; add more with `orderdesk user add`");
    }

    let name = admin_name.unwrap_or_else(|| email.clone());
    let id = insert_user(app, name, email, Role::Admin)?;
    println!("Database ready. Admin user id: {id}");
    Ok(())
}

pub fn user_add(app: &App, name: String, email: String, role: &str) -> Result<()> {
    let actor = app.actor()?;
    if actor.role != Role::Admin {
        bail!("only admins can add users");
    }
    let role: Role = role.parse()?;
    let id = insert_user(app, name, email, role)?;
    println!("Added user {id}");
    Ok(())
}

fn insert_user(app: &App, name: String, email: String, role: Role) -> Result<i64> {
    if app
        .db
        .with_conn(|conn| user_repo::find_by_email(conn, &email))?
        .is_some()
    {
        bail!("a user with that email already exists");
    }
    info!(email = %mask_email(&email), %role, "Adding user");
    let id = app.db.with_conn(|conn| {
        user_repo::insert(conn, &NewUser { name, email, role }, Utc::now())
    })?;
    Ok(id)
}

pub fn user_list(app: &App) -> Result<()> {
    let users = app.db.with_conn(user_repo::list)?;
    app.emit(&users, |users| {
        for user in users {
            println!("{:>4}  {:<6} {:<24} {}", user.id, user.role.as_str(), user.name, user.email);
        }
    })
}

pub fn order_create(
    app: &App,
    name: String,
    description: Option<String>,
    customer_name: Option<String>,
    deadline: Option<NaiveDate>,
) -> Result<()> {
    let order = app.orders.create_order(
        &app.actor()?,
        NewOrder {
            name,
            description,
            customer_name,
            deadline,
        },
    )?;
    app.emit(&order, |o| println!("Created order {} ({})", o.order_number, o.id))
}

pub fn order_list(
    app: &App,
    status: Option<&str>,
    search: Option<String>,
    limit: u64,
    offset: u64,
) -> Result<()> {
    let status = status.map(str::parse::<OrderStatus>).transpose()?;
    let filter = OrderFilter {
        status,
        search,
        limit: Some(limit),
        offset: Some(offset),
    };
    let (orders, total) = app.orders.list_orders(&app.actor()?, &filter)?;

    #[derive(Serialize)]
    struct Page<'a> {
        total: u64,
        orders: &'a [OrderSummary],
    }
    app.emit(&Page { total, orders: &orders }, |page| {
        for summary in page.orders {
            print_order_line(&summary.order, summary.files.completed, summary.files.total);
        }
        println!("{} of {} order(s)", page.orders.len(), page.total);
    })
}

fn print_order_line(order: &OrderRow, completed: u64, total: u64) {
    println!(
        "{:>4}  {:<16} {:<12} {:>4}/{:<4} {}",
        order.id, order.order_number, order.status.as_str(), completed, total, order.name
    );
}

pub fn order_show(app: &App, order_id: i64) -> Result<()> {
    let actor = app.actor()?;
    let order = app.orders.find_order(&actor, order_id)?;
    let tree = app.orders.folder_tree(&actor, order_id)?;

    #[derive(Serialize)]
    struct Shown<'a> {
        order: &'a OrderRow,
        tree: &'a FolderTree,
    }
    app.emit(&Shown { order: &order, tree: &tree }, |shown| {
        println!("{} {} [{}]", shown.order.order_number, shown.order.name, shown.order.status);
        for file in &shown.tree.files {
            print_file_line(1, &file.file, file.assignee.as_deref());
        }
        for folder in &shown.tree.folders {
            println!("  {}/", folder.folder.name);
            for file in &folder.files {
                print_file_line(2, &file.file, file.assignee.as_deref());
            }
            for sub in &folder.subfolders {
                println!("    {}/", sub.subfolder.name);
                for file in &sub.files {
                    print_file_line(3, &file.file, file.assignee.as_deref());
                }
            }
        }
    })
}

fn print_file_line(depth: usize, file: &FileItemRow, assignee: Option<&str>) {
    println!(
        "{}{:>5}  {:<10} {}{}",
        "  ".repeat(depth),
        file.id,
        file.status.as_str(),
        file.original_name,
        assignee.map(|a| format!("  ({a})")).unwrap_or_default()
    );
}

pub fn order_stats(app: &App, order_id: i64) -> Result<()> {
    let stats = app.orders.order_stats(&app.actor()?, order_id)?;
    app.emit(&stats, print_stats)
}

fn print_stats(stats: &OrderStats) {
    let line = |label: &str, c: &orderdesk::StatusCounts| {
        println!(
            "{:<24} total {:>4}  pending {:>4}  claimed {:>4}  processing {:>4}  completed {:>4}",
            label, c.total, c.pending, c.claimed, c.processing, c.completed
        );
    };
    line("(unfiled)", &stats.unfiled);
    for folder in &stats.folders {
        line(&folder.name, &folder.total);
        for sub in &folder.subfolders {
            line(&format!("  {}", sub.name), &sub.counts);
        }
    }
    line("TOTAL", &stats.totals);
    if stats.is_completed() {
        println!("All files completed.");
    }
}

pub fn order_update(
    app: &App,
    order_id: i64,
    name: Option<String>,
    description: Option<String>,
    customer_name: Option<String>,
    deadline: Option<NaiveDate>,
) -> Result<()> {
    let order = app.orders.update_order(
        &app.actor()?,
        order_id,
        OrderUpdate {
            name,
            description,
            customer_name,
            deadline,
        },
    )?;
    app.emit(&order, |o| println!("Updated order {}", o.order_number))
}

pub fn order_complete(app: &App, order_id: i64) -> Result<()> {
    let order = app.orders.mark_order_completed(&app.actor()?, order_id)?;
    app.emit(&order, |o| println!("Order {} completed", o.order_number))
}

pub fn order_approve(app: &App, order_id: i64) -> Result<()> {
    let order = app.orders.approve_order(&app.actor()?, order_id)?;
    app.emit(&order, |o| println!("Order {} approved", o.order_number))
}

pub fn order_delete(app: &App, order_id: i64) -> Result<()> {
    app.orders.delete_order(&app.actor()?, order_id)?;
    println!("Deleted order {order_id}");
    Ok(())
}

pub fn folder_add(app: &App, order_id: i64, name: &str) -> Result<()> {
    let folder = app.orders.create_folder(&app.actor()?, order_id, name)?;
    app.emit(&folder, |f| println!("Added folder {} ({})", f.name, f.id))
}

pub fn subfolder_add(app: &App, folder_id: i64, name: &str) -> Result<()> {
    let subfolder = app.orders.create_subfolder(&app.actor()?, folder_id, name)?;
    app.emit(&subfolder, |s| println!("Added subfolder {} ({})", s.name, s.id))
}

pub fn folder_rename(app: &App, folder_id: i64, name: &str) -> Result<()> {
    let folder = app.orders.rename_folder(&app.actor()?, folder_id, name)?;
    app.emit(&folder, |f| println!("Renamed folder {} to {}", f.id, f.name))
}

pub fn folder_delete(app: &App, folder_id: i64) -> Result<()> {
    app.orders.delete_folder(&app.actor()?, folder_id)?;
    println!("Deleted folder {folder_id}");
    Ok(())
}

pub fn subfolder_rename(app: &App, subfolder_id: i64, name: &str) -> Result<()> {
    let subfolder = app
        .orders
        .rename_subfolder(&app.actor()?, subfolder_id, name)?;
    app.emit(&subfolder, |s| println!("Renamed subfolder {} to {}", s.id, s.name))
}

pub fn subfolder_delete(app: &App, subfolder_id: i64) -> Result<()> {
    app.orders.delete_subfolder(&app.actor()?, subfolder_id)?;
    println!("Deleted subfolder {subfolder_id}");
    Ok(())
}

pub fn file_status(app: &App, file_id: i64, status: &str) -> Result<()> {
    let status: FileStatus = status.parse()?;
    let file = app
        .batches
        .update_file_status(&app.actor()?, file_id, status)?;
    app.emit(&file, |f| println!("File {} is {}", f.id, f.status))
}

pub fn file_processed(app: &App, file_id: i64, size: u64, mime: Option<String>) -> Result<()> {
    let processed = ProcessedFile {
        size,
        mime_type: mime,
    };
    let file = app
        .orders
        .record_processed_file(&app.actor()?, file_id, processed)?;
    app.emit(&file, |f| println!("File {} processed: {}", f.id, f.path))
}

pub fn file_delete(app: &App, file_id: i64) -> Result<()> {
    app.orders.delete_file(&app.actor()?, file_id)?;
    println!("Deleted file {file_id}");
    Ok(())
}

pub fn file_add(
    app: &App,
    order_id: i64,
    paths: Vec<String>,
    folder: Option<i64>,
    subfolder: Option<i64>,
    size: Option<u64>,
    prefix: Option<String>,
) -> Result<()> {
    let actor = app.actor()?;
    let placement = match (folder, subfolder) {
        (_, Some(id)) => FilePlacement::Subfolder(id),
        (Some(id), None) => FilePlacement::Folder(id),
        (None, None) => FilePlacement::OrderRoot,
    };

    let mut registered = Vec::with_capacity(paths.len());
    for path in paths {
        let size = size
            .or_else(|| std::fs::metadata(&path).ok().map(|m| m.len()))
            .unwrap_or(0);
        let file = app.orders.register_file(
            &actor,
            order_id,
            NewFile {
                client_path: path,
                size,
                mime_type: None,
                placement,
                prefix: prefix.clone(),
            },
        )?;
        registered.push(file);
    }

    app.emit(&registered, |files| {
        for file in files {
            println!("{:>5}  {}", file.id, file.path);
        }
    })
}

pub fn claim(
    app: &App,
    order_id: i64,
    size: Option<u32>,
    folder: Option<i64>,
    subfolder: Option<i64>,
    directory: Option<String>,
) -> Result<()> {
    let scope = match (folder, subfolder, directory) {
        (Some(id), _, _) => ClaimScope::Folder(id),
        (None, Some(id), _) => ClaimScope::Subfolder(id),
        (None, None, Some(dir)) => ClaimScope::Directory(dir),
        (None, None, None) => ClaimScope::Order,
    };
    let size = size.unwrap_or(app.claims.default_batch_size);

    let claim = app
        .batches
        .claim_batch(&app.actor()?, order_id, size, &scope)?;

    match claim {
        Some(claim) => app.emit(&claim, print_claim),
        None => {
            if app.json {
                println!("null");
            } else {
                println!("No files available to claim.");
            }
            Ok(())
        }
    }
}

fn print_claim(claim: &ClaimRow) {
    println!(
        "Batch {} for order {}: {} file(s){}",
        claim.id,
        claim.order_id,
        claim.file_ids.len(),
        if claim.is_completed { " [completed]" } else { "" }
    );
    let ids: Vec<String> = claim.file_ids.iter().map(i64::to_string).collect();
    println!("  files: {}", ids.join(", "));
}

pub fn release(app: &App, claim_id: i64) -> Result<()> {
    let released = app.batches.release_batch(&app.actor()?, claim_id)?;
    app.emit(&released, |n| println!("Released batch {claim_id}: {n} file(s) returned"))
}

pub fn complete(app: &App, claim_id: i64) -> Result<()> {
    let claim = app.batches.complete_batch(&app.actor()?, claim_id)?;
    app.emit(&claim, print_claim)
}

pub fn complete_file(app: &App, claim_id: i64, file_id: i64) -> Result<()> {
    let file = app
        .batches
        .complete_file_in_batch(&app.actor()?, claim_id, file_id)?;
    app.emit(&file, |f| println!("File {} is {}", f.id, f.status))
}

pub fn start(app: &App, claim_id: i64, file_id: i64) -> Result<()> {
    let file = app
        .batches
        .start_processing(&app.actor()?, claim_id, file_id)?;
    app.emit(&file, |f| println!("File {} is {}", f.id, f.status))
}

pub fn claims(app: &App, order_id: Option<i64>) -> Result<()> {
    let actor = app.actor()?;
    let claims = match order_id {
        Some(order_id) => app.batches.order_claims(&actor, order_id)?,
        None => app.batches.user_active_batches(&actor)?,
    };
    app.emit(&claims, |claims| {
        if claims.is_empty() {
            println!("No batches.");
        }
        for claim in claims {
            print_claim(claim);
        }
    })
}

pub fn batch(app: &App, claim_id: i64) -> Result<()> {
    let actor = app.actor()?;
    let claim = app.batches.find_claim(&actor, claim_id)?;
    let files = app.batches.batch_files(&actor, claim_id)?;
    let stats = app.batches.batch_stats(&actor, claim_id)?;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Batch<'a> {
        claim: &'a ClaimRow,
        files: &'a [FileItemRow],
        stats: BatchStats,
    }
    app.emit(
        &Batch {
            claim: &claim,
            files: &files,
            stats,
        },
        |batch| {
            print_claim(batch.claim);
            println!(
                "  progress: {}/{} ({}%)",
                batch.stats.completed_files, batch.stats.total_files, batch.stats.progress_percentage
            );
            for file in batch.files {
                print_file_line(1, file, None);
            }
        },
    )
}
