//! rooms-cli - Lightweight video-conference room client
//!
//! Manages rooms through a directory service and drives call sessions
//! through a vendor-neutral lifecycle controller.

mod api;
mod auth;
mod config;
mod media;
mod models;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rooms-cli")]
#[command(about = "Lightweight CLI client for video-conference rooms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with the room directory service
    Login {
        /// Display name
        name: String,

        /// Email address
        email: String,

        /// Request an admin session
        #[arg(long)]
        admin: bool,

        /// Force a new login even if a cached token exists
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// List rooms
    Rooms {
        /// Maximum number of rooms to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Create a room
    Create {
        /// Room name
        name: String,
    },

    /// Delete a room
    Delete {
        /// Room name
        name: String,
    },

    /// Join a room's call session
    Join {
        /// Room name (or a direct join URL)
        room: String,

        /// Seconds to stay in the session (0 = until quit)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Add a simulated echo peer to the session
        #[arg(long)]
        echo: bool,

        /// Keep the session handle for rejoin instead of destroying it on leave
        #[arg(long)]
        retain: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login {
            name,
            email,
            admin,
            force,
        } => {
            tracing::info!("Logging in...");
            auth::login(&name, &email, admin, force).await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Rooms { limit } => {
            api::list_rooms(limit).await?;
        }
        Commands::Create { name } => {
            tracing::info!("Creating room...");
            api::create_room(&name).await?;
        }
        Commands::Delete { name } => {
            api::delete_room(&name).await?;
        }
        Commands::Join {
            room,
            duration,
            echo,
            retain,
        } => {
            session::runner::run_join(&room, duration, echo, retain).await?;
        }
    }

    Ok(())
}
