//! guildgate CLI entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use guildgate::auth::{decode_owner_id, Redacted};
use guildgate::config::{HubConfig, ServerConfig};
use guildgate::server::ApiServer;
use guildgate::storage::{AccountStore, MemoryStore, PostgresConfig, PostgresStore};
use guildgate::topics::TopicSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let get_db_config = || -> Result<PostgresConfig> {
        if let Some(url) = &cli.database_url {
            PostgresConfig::from_url(url).context("Invalid DATABASE_URL")
        } else {
            PostgresConfig::from_env().context("DATABASE_URL not set")
        }
    };

    match cli.command {
        Commands::Serve {
            ref bind,
            ref prefix,
            ref topics,
            outbound_buffer,
            ping_interval,
            memory,
        } => {
            let config = ServerConfig {
                bind_addr: bind.parse().context("Invalid bind address")?,
                prefix: ServerConfig::normalize_prefix(prefix),
                topics: topics.parse::<TopicSet>().context("Invalid topic list")?,
                hub: HubConfig {
                    outbound_buffer,
                    ping_interval: Duration::from_secs(ping_interval.max(1)),
                },
            };

            if memory {
                warn!("Serving from an in-memory store; accounts are lost on exit");
                serve(config, Arc::new(MemoryStore::new())).await
            } else {
                let store = PostgresStore::new(get_db_config()?)
                    .await
                    .context("Failed to connect to database")?;
                serve(config, Arc::new(store)).await
            }
        }
        Commands::Init => init(get_db_config()?).await,
        Commands::CreateUser {
            github_id,
            ref username,
            admin,
        } => create_user(get_db_config()?, github_id, username, admin).await,
        Commands::Verify { tid, revoke } => verify(get_db_config()?, tid, !revoke).await,
        Commands::Inspect { ref token } => inspect(token),
    }
}

async fn serve<S: AccountStore + 'static>(config: ServerConfig, store: Arc<S>) -> Result<()> {
    let server = ApiServer::new(config, store);

    info!("Starting guildgate...");
    server.run(shutdown_signal()).await
}

async fn init(db_config: PostgresConfig) -> Result<()> {
    let _store = PostgresStore::new(db_config).await?;
    println!("Database schema initialized successfully");
    Ok(())
}

async fn create_user(
    db_config: PostgresConfig,
    github_id: i64,
    username: &str,
    admin: bool,
) -> Result<()> {
    let store = PostgresStore::new(db_config).await?;
    let user = store
        .create_user(github_id, username, admin)
        .await
        .context("Failed to create user")?;

    println!("{}", user.bearer);
    println!();
    println!("User ID: {}", user.uid);
    println!("Username: {}", user.username);
    if user.admin {
        println!("Admin: yes");
    }

    Ok(())
}

async fn verify(db_config: PostgresConfig, tid: i64, verified: bool) -> Result<()> {
    let store = PostgresStore::new(db_config).await?;
    let app = store
        .set_application_verified(tid, verified)
        .await
        .with_context(|| format!("Failed to update application {}", tid))?;

    let state = if app.verified { "verified" } else { "unverified" };
    println!("Application {} ({}) is now {}", app.tid, app.name, state);
    Ok(())
}

fn inspect(token: &str) -> Result<()> {
    let owner_id = decode_owner_id(token)
        .with_context(|| format!("Cannot decode token {}", Redacted(token)))?;

    println!("Claimed owner: {}", owner_id);
    println!("(unverified: only a store lookup authenticates a token)");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
