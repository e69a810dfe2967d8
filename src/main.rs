//! # Marble CLI (`marble`)
//!
//! Administration and local use of the Marble knowledge assistant: schema
//! setup, uploads, ingestion, questions, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! marble --config ./config/marble.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `marble init` | Create the SQLite database and run schema migrations |
//! | `marble serve` | Start the HTTP API |
//! | `marble org create <name>` | Create an organization |
//! | `marble team create <name>` | Create a team in an organization |
//! | `marble team join <team-id>` | Join a team (one active team per user) |
//! | `marble folder create <name>` | Create a folder |
//! | `marble upload <path>` | Store a local file in a folder |
//! | `marble grant <file-id> <user-id>` | Share a file with another user |
//! | `marble ingest <file-id>` | Segment, embed, and index a file |
//! | `marble ask "<question>"` | Ask a question |
//! | `marble status <file-id>` | Show a file's ingestion state |
//! | `marble sweep` | Remove chunks of superseded generations |

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use marble::admin;
use marble::chat::{run_ask, AskOptions};
use marble::config;
use marble::ingest::{ingest_with_retry, run_ingest, run_sweep};
use marble::migrate;
use marble::server::run_server;
use marble::services::Services;
use marble::status::run_status;
use marble_core::models::{AccessLevel, Visibility};
use marble_core::search::Scope;
use marble_core::store::join_team;

/// Marble: chat with your organization's files, scoped by who may see them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/marble.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "marble", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/marble.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Manage organizations.
    Org {
        #[command(subcommand)]
        action: OrgAction,
    },

    /// Manage teams and memberships.
    Team {
        #[command(subcommand)]
        action: TeamAction,
    },

    /// Manage folders.
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Upload a local file into a folder.
    ///
    /// The file inherits the folder's visibility. Pass `--ingest` to index
    /// it right away.
    Upload {
        path: PathBuf,
        #[arg(long)]
        folder: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        ingest: bool,
    },

    /// Give another user explicit access to a file you own.
    Grant {
        file_id: String,
        user_id: String,
        /// Acting user; must own the file.
        #[arg(long)]
        owner: String,
        #[arg(long)]
        org: String,
        /// `viewer` or `editor`.
        #[arg(long, default_value = "viewer")]
        access: AccessLevel,
    },

    /// Ingest a file in the foreground (with the configured retry policy).
    Ingest {
        file_id: String,
        /// Acting user; must own the file.
        #[arg(long)]
        user: String,
    },

    /// Ask a question.
    Ask {
        question: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        /// `personal`, `team`, `org`, or `all`.
        #[arg(long, default_value = "all")]
        scope: Scope,
        /// General chat without document retrieval.
        #[arg(long)]
        general: bool,
        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a file's ingestion status.
    Status { file_id: String },

    /// Remove chunks (rows and vectors) of superseded generations.
    Sweep {
        /// Only sweep this file.
        #[arg(long)]
        file: Option<String>,
    },
}

#[derive(Subcommand)]
enum OrgAction {
    Create { name: String },
}

#[derive(Subcommand)]
enum TeamAction {
    Create {
        name: String,
        #[arg(long)]
        org: String,
    },
    Join {
        team_id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
    },
}

#[derive(Subcommand)]
enum FolderAction {
    Create {
        name: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        org: String,
        /// `personal`, `team`, or `organization`.
        #[arg(long, default_value = "personal")]
        visibility: Visibility,
        /// Required for team folders.
        #[arg(long)]
        team: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("marble=info".parse()?)
                .add_directive("marble_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            run_server(&cfg).await?;
        }
        Commands::Org {
            action: OrgAction::Create { name },
        } => {
            let services = Services::build(&cfg).await?;
            let org = admin::create_organization(services.store.as_ref(), &name).await?;
            println!("{}", org.id);
        }
        Commands::Team { action } => {
            let services = Services::build(&cfg).await?;
            match action {
                TeamAction::Create { name, org } => {
                    let team = admin::create_team(services.store.as_ref(), &org, &name).await?;
                    println!("{}", team.id);
                }
                TeamAction::Join { team_id, user, org } => {
                    let team = join_team(services.store.as_ref(), &org, &user, &team_id).await?;
                    println!("Joined team {} ({}).", team.name, team.id);
                }
            }
        }
        Commands::Folder {
            action:
                FolderAction::Create {
                    name,
                    user,
                    org,
                    visibility,
                    team,
                },
        } => {
            let services = Services::build(&cfg).await?;
            let principal = services.principal(&user, &org).await?;
            let folder = admin::create_folder(
                services.store.as_ref(),
                &principal,
                &name,
                visibility,
                team.as_deref(),
            )
            .await?;
            println!("{}", folder.id);
        }
        Commands::Upload {
            path,
            folder,
            user,
            org,
            ingest,
        } => {
            let services = Services::build(&cfg).await?;
            let principal = services.principal(&user, &org).await?;
            let file = admin::upload_path(
                services.store.as_ref(),
                services.objects.as_ref(),
                &principal,
                &folder,
                &path,
            )
            .await
            .with_context(|| format!("Failed to upload {}", path.display()))?;
            if ingest {
                ingest_with_retry(
                    services.pipeline.clone(),
                    services.store.clone(),
                    &services.ingestion,
                    &file.id,
                    &user,
                )
                .await?;
            }
            println!("{}", file.id);
        }
        Commands::Grant {
            file_id,
            user_id,
            owner,
            org,
            access,
        } => {
            let services = Services::build(&cfg).await?;
            let principal = services.principal(&owner, &org).await?;
            let grant =
                admin::grant(services.store.as_ref(), &principal, &file_id, &user_id, access)
                    .await?;
            println!(
                "Granted {} access on {} to {}.",
                grant.access.as_str(),
                grant.file_id,
                grant.user_id
            );
        }
        Commands::Ingest { file_id, user } => {
            run_ingest(&cfg, &file_id, &user).await?;
        }
        Commands::Ask {
            question,
            user,
            org,
            scope,
            general,
            json,
        } => {
            run_ask(
                &cfg,
                AskOptions {
                    question: &question,
                    user_id: &user,
                    organization_id: &org,
                    scope,
                    general,
                    json,
                },
            )
            .await?;
        }
        Commands::Status { file_id } => {
            run_status(&cfg, &file_id).await?;
        }
        Commands::Sweep { file } => {
            run_sweep(&cfg, file.as_deref()).await?;
        }
    }

    Ok(())
}
