//! CLI command definitions

use clap::{Parser, Subcommand};
use guildgate::config::{DEFAULT_BIND, DEFAULT_PREFIX};

#[derive(Parser)]
#[command(name = "guildgate")]
#[command(about = "Account API and realtime notification relay", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Address to bind to
        #[arg(short, long, env = "GUILDGATE_BIND", default_value = DEFAULT_BIND)]
        bind: String,

        /// Path prefix for API routes
        #[arg(long, env = "GUILDGATE_PREFIX", default_value = DEFAULT_PREFIX)]
        prefix: String,

        /// Comma-separated topics clients may subscribe to
        #[arg(long, env = "GUILDGATE_TOPICS", default_value = guildgate::topics::DPY_MOD_LOG)]
        topics: String,

        /// Frames buffered per websocket before deliveries to it fail
        #[arg(long, env = "GUILDGATE_OUTBOUND_BUFFER", default_value_t = 64)]
        outbound_buffer: usize,

        /// Seconds between websocket pings
        #[arg(long, env = "GUILDGATE_PING_INTERVAL", default_value_t = 10)]
        ping_interval: u64,

        /// Serve from an in-memory store instead of Postgres
        #[arg(long)]
        memory: bool,
    },

    /// Initialize the database schema
    Init,

    /// Create a user and print its bearer token
    ///
    /// Examples:
    ///   guildgate create-user --github-id 1001 --username danny
    ///   guildgate create-user --github-id 1 --username root --admin
    CreateUser {
        /// GitHub account id
        #[arg(long)]
        github_id: i64,

        #[arg(long)]
        username: String,

        /// Grant administrator rights
        #[arg(long)]
        admin: bool,
    },

    /// Mark an application as verified
    Verify {
        /// Application id (tid)
        tid: i64,

        /// Clear the verified flag instead
        #[arg(long)]
        revoke: bool,
    },

    /// Show the owner id a token claims, without checking it
    Inspect {
        token: String,
    },
}
