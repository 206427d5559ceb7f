use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod analytics;
mod api;
mod auth;
mod config;
mod db;
mod error;
mod memory;
mod models;
mod policy;
mod schema;
mod server;
mod storage;
mod store;

use config::Config;
use models::Role;
use store::Store;

#[derive(Parser)]
#[command(name = "guidance-records")]
#[command(about = "Records backend for a school guidance office", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo accounts, students and interviews
    Seed,
    /// Create an administrator account
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Run the HTTP API
    Serve {
        /// Keep everything in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            db::seed(&db::PgStore::new(pool)).await?;
            println!("Seed data inserted.");
        }
        Commands::CreateAdmin { username, password } => {
            let pool = connect(&config).await?;
            let profile = db::ensure_account(&db::PgStore::new(pool), &username, &password, Role::Admin).await?;
            if profile.role == Role::Admin {
                println!("Admin {} ready.", profile.username);
            } else {
                anyhow::bail!("{} already exists with role {}", profile.username, profile.role);
            }
        }
        Commands::Serve { in_memory } => {
            let store: Arc<dyn Store> = if in_memory {
                info!("Using in-memory store with demo data");
                let store = memory::MemoryStore::new();
                db::seed(&store).await?;
                Arc::new(store)
            } else {
                let pool = connect(&config).await?;
                db::init_db(&pool).await?;
                Arc::new(db::PgStore::new(pool))
            };
            server::serve(&config, store).await?;
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(config.require_database_url()?)
        .await
        .context("failed to connect to Postgres")
}
