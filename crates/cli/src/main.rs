//! Replica Chat CLI - operator tools for the gateway.
//!
//! # Usage
//!
//! ```bash
//! # Empty the local user cache
//! rc-cli users clear
//!
//! # Print every user the platform knows about
//! rc-cli users list
//!
//! # Rewrite cached ids that disagree with upstream
//! rc-cli users reconcile
//!
//! # Show, then delete, every replica of the organization
//! rc-cli replicas delete-all
//! rc-cli replicas delete-all --yes
//!
//! # Chat with a replica from the terminal
//! rc-cli chat --replica 3f0c... --email ada@example.com
//! ```
//!
//! Upstream settings come from the same environment variables as the server
//! (`UPSTREAM_API_URL`, `UPSTREAM_ORG_SECRET`, ...), `.env` included.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "rc-cli")]
#[command(author, version, about = "Replica Chat operator tools")]
struct Cli {
    /// Path of the local user cache
    #[arg(long, global = true, env = "USER_CACHE_PATH", default_value = "data/users.json")]
    cache: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and repair users
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    /// Manage the organization's replicas
    Replicas {
        #[command(subcommand)]
        action: ReplicasAction,
    },
    /// Chat with a replica in the terminal
    Chat {
        /// Replica UUID
        #[arg(short, long)]
        replica: String,

        /// Upstream user id to chat as
        #[arg(short, long, required_unless_present = "email", conflicts_with = "email")]
        user: Option<String>,

        /// Sign in by email instead (check-or-create, like the web app)
        #[arg(short, long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// Reset the local user cache to an empty mapping
    Clear,
    /// List users registered upstream
    List,
    /// Heal cached ids against upstream's user list
    Reconcile,
}

#[derive(Subcommand)]
enum ReplicasAction {
    /// Delete every replica (dry run unless --yes)
    DeleteAll {
        /// Actually delete
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rc_cli=info,replica_chat_server=warn".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Users { action } => match action {
            UsersAction::Clear => commands::users::clear(&cli.cache).await?,
            UsersAction::List => commands::users::list().await?,
            UsersAction::Reconcile => commands::users::reconcile(&cli.cache).await?,
        },
        Commands::Replicas { action } => match action {
            ReplicasAction::DeleteAll { yes } => commands::replicas::delete_all(yes).await?,
        },
        Commands::Chat {
            replica,
            user,
            email,
        } => {
            let who = match (user, email) {
                (Some(id), _) => commands::chat::Identity::UserId(id),
                (None, Some(email)) => commands::chat::Identity::Email(email),
                (None, None) => return Err("either --user or --email is required".into()),
            };
            commands::chat::run(&replica, who, &cli.cache).await?;
        }
    }
    Ok(())
}
