mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orderdesk::{load_config, BatchError, Config, OrderError, OrderdeskError};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orderdesk", author, version, about = "Orders, folders and file-claim batches")]
struct Cli {
    /// Config file (JSON). Defaults to ~/.orderdesk/config.json when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file; overrides the config.
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Id of the acting user.
    #[arg(long = "as", global = true, value_name = "USER_ID")]
    acting_user: Option<i64>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and optionally the first admin user.
    Init {
        #[arg(long, requires = "admin_email")]
        admin_name: Option<String>,
        #[arg(long)]
        admin_email: Option<String>,
    },
    /// Manage users.
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage orders.
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },
    /// Manage folders.
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Manage subfolders.
    Subfolder {
        #[command(subcommand)]
        command: SubfolderCommands,
    },
    /// Register files.
    File {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Claim a batch of pending files.
    Claim {
        order_id: i64,
        /// Number of files; defaults to claims.defaultBatchSize.
        #[arg(short = 'n', long)]
        size: Option<u32>,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Release a batch back to the pool.
    Release { claim_id: i64 },
    /// Complete every file of a batch.
    Complete { claim_id: i64 },
    /// Complete one file of a batch.
    CompleteFile { claim_id: i64, file_id: i64 },
    /// Mark a claimed file as being processed.
    Start { claim_id: i64, file_id: i64 },
    /// List your open batches, or every batch of an order.
    Claims {
        #[arg(long)]
        order: Option<i64>,
    },
    /// Show the files and progress of a batch.
    Batch { claim_id: i64 },
}

#[derive(Subcommand)]
enum UserCommands {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "user")]
        role: String,
    },
    List,
}

#[derive(Subcommand)]
enum OrderCommands {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        customer: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        deadline: Option<chrono::NaiveDate>,
    },
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Folder tree with files and assignees.
    Show { order_id: i64 },
    Stats { order_id: i64 },
    Update {
        order_id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        deadline: Option<chrono::NaiveDate>,
    },
    Complete { order_id: i64 },
    Approve { order_id: i64 },
    Delete { order_id: i64 },
}

#[derive(Subcommand)]
enum FolderCommands {
    Add { order_id: i64, name: String },
    Rename { folder_id: i64, name: String },
    /// Delete an empty folder.
    Delete { folder_id: i64 },
}

#[derive(Subcommand)]
enum SubfolderCommands {
    Add { folder_id: i64, name: String },
    Rename { subfolder_id: i64, name: String },
    Delete { subfolder_id: i64 },
}

#[derive(Subcommand)]
enum FileCommands {
    /// Register one or more client paths (e.g. `raw/IMG_001.jpg`).
    Add {
        order_id: i64,
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long, conflicts_with = "subfolder")]
        folder: Option<i64>,
        #[arg(long)]
        subfolder: Option<i64>,
        /// Size in bytes; read from disk when the path exists.
        #[arg(long)]
        size: Option<u64>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Set a file's status outside of a batch (pending, processing, completed).
    Status { file_id: i64, status: String },
    /// Record the processed result for a file.
    Processed {
        file_id: i64,
        #[arg(long)]
        size: u64,
        #[arg(long)]
        mime: Option<String>,
    },
    Delete { file_id: i64 },
}

#[derive(Args, Default)]
struct ScopeArgs {
    #[arg(long, conflicts_with_all = ["subfolder", "directory"])]
    folder: Option<i64>,
    #[arg(long, conflicts_with = "directory")]
    subfolder: Option<i64>,
    #[arg(long)]
    directory: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.log_json) {
        eprintln!("Failed to initialise logging: {e}");
    }

    if let Err(err) = run(cli) {
        report(&err);
        std::process::exit(1);
    }
}

/// Installs the subscriber. `RUST_LOG` overrides the default `info` level and
/// `log` records from the database layer are forwarded.
fn setup_logging(json: bool) -> Result<()> {
    tracing_log::LogTracer::init().context("log bridge already installed")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref())?;
    let ctx = commands::App::open(&config, cli.database, cli.acting_user, cli.json)?;

    match cli.command {
        Commands::Init {
            admin_name,
            admin_email,
        } => commands::init(&ctx, admin_name, admin_email),
        Commands::User { command } => match command {
            UserCommands::Add { name, email, role } => commands::user_add(&ctx, name, email, &role),
            UserCommands::List => commands::user_list(&ctx),
        },
        Commands::Order { command } => match command {
            OrderCommands::Create {
                name,
                description,
                customer,
                deadline,
            } => commands::order_create(&ctx, name, description, customer, deadline),
            OrderCommands::List {
                status,
                search,
                limit,
                offset,
            } => commands::order_list(&ctx, status.as_deref(), search, limit, offset),
            OrderCommands::Show { order_id } => commands::order_show(&ctx, order_id),
            OrderCommands::Stats { order_id } => commands::order_stats(&ctx, order_id),
            OrderCommands::Update {
                order_id,
                name,
                description,
                customer,
                deadline,
            } => commands::order_update(&ctx, order_id, name, description, customer, deadline),
            OrderCommands::Complete { order_id } => commands::order_complete(&ctx, order_id),
            OrderCommands::Approve { order_id } => commands::order_approve(&ctx, order_id),
            OrderCommands::Delete { order_id } => commands::order_delete(&ctx, order_id),
        },
        Commands::Folder { command } => match command {
            FolderCommands::Add { order_id, name } => commands::folder_add(&ctx, order_id, &name),
            FolderCommands::Rename { folder_id, name } => {
                commands::folder_rename(&ctx, folder_id, &name)
            }
            FolderCommands::Delete { folder_id } => commands::folder_delete(&ctx, folder_id),
        },
        Commands::Subfolder { command } => match command {
            SubfolderCommands::Add { folder_id, name } => {
                commands::subfolder_add(&ctx, folder_id, &name)
            }
            SubfolderCommands::Rename { subfolder_id, name } => {
                commands::subfolder_rename(&ctx, subfolder_id, &name)
            }
            SubfolderCommands::Delete { subfolder_id } => {
                commands::subfolder_delete(&ctx, subfolder_id)
            }
        },
        Commands::File { command } => match command {
            FileCommands::Add {
                order_id,
                paths,
                folder,
                subfolder,
                size,
                prefix,
            } => commands::file_add(&ctx, order_id, paths, folder, subfolder, size, prefix),
            FileCommands::Status { file_id, status } => {
                commands::file_status(&ctx, file_id, &status)
            }
            FileCommands::Processed {
                file_id,
                size,
                mime,
            } => commands::file_processed(&ctx, file_id, size, mime),
            FileCommands::Delete { file_id } => commands::file_delete(&ctx, file_id),
        },
        Commands::Claim {
            order_id,
            size,
            scope,
        } => commands::claim(
            &ctx,
            order_id,
            size,
            scope.folder,
            scope.subfolder,
            scope.directory,
        ),
        Commands::Release { claim_id } => commands::release(&ctx, claim_id),
        Commands::Complete { claim_id } => commands::complete(&ctx, claim_id),
        Commands::CompleteFile { claim_id, file_id } => {
            commands::complete_file(&ctx, claim_id, file_id)
        }
        Commands::Start { claim_id, file_id } => commands::start(&ctx, claim_id, file_id),
        Commands::Claims { order } => commands::claims(&ctx, order),
        Commands::Batch { claim_id } => commands::batch(&ctx, claim_id),
    }
}

fn resolve_config(explicit: Option<&std::path::Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return load_config(path).with_context(|| format!("loading {}", path.display()));
    }
    match orderdesk::config::default_config_path() {
        Some(path) if path.exists() => {
            load_config(&path).with_context(|| format!("loading {}", path.display()))
        }
        _ => Ok(Config::default()),
    }
}

/// Prints request errors as-is; storage failures are logged with their cause
/// and shown to the user without detail.
fn report(err: &anyhow::Error) {
    let infrastructure = err
        .downcast_ref::<BatchError>()
        .map(BatchError::is_infrastructure)
        .or_else(|| {
            err.downcast_ref::<OrderError>()
                .map(|e| matches!(e, OrderError::Database(_)))
        })
        .or_else(|| {
            err.downcast_ref::<OrderdeskError>()
                .map(|e| matches!(e, OrderdeskError::Database(_)))
        })
        .unwrap_or(false);

    if infrastructure {
        error!(error = ?err, "Operation failed");
        eprintln!("error: the operation could not be completed; see the log for details");
    } else {
        eprintln!("error: {err:#}");
    }
}
