//! Careveli CLI - Database migrations and operations tools.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! careveli migrate
//!
//! # Create an admin user
//! careveli admin create -e admin@example.com -n "Admin Name" -p 'long passphrase'
//!
//! # Grant the admin role to an existing user
//! careveli admin promote -e shopper@example.com
//!
//! # Settle provisional orders older than 60 minutes with their providers
//! careveli orders reconcile --older-than-minutes 60
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "careveli")]
#[command(author, version, about = "Careveli CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage admin users
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// Order maintenance
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Create a new admin user
    Create {
        /// Admin email address
        #[arg(short, long)]
        email: String,

        /// Admin display name
        #[arg(short, long)]
        name: String,

        /// Admin password (at least 8 characters)
        #[arg(short, long, env = "CAREVELI_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Grant the admin role to an existing user
    Promote {
        /// User email address
        #[arg(short, long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum OrdersAction {
    /// Confirm late-paid provisional orders and delete abandoned ones
    Reconcile {
        /// Only orders created more than this many minutes ago
        #[arg(long, default_value_t = 60)]
        older_than_minutes: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Admin { action } => match action {
            AdminAction::Create {
                email,
                name,
                password,
            } => {
                commands::admin::create_user(&email, &name, &password).await?;
            }
            AdminAction::Promote { email } => commands::admin::promote(&email).await?,
        },
        Commands::Orders { action } => match action {
            OrdersAction::Reconcile { older_than_minutes } => {
                commands::orders::reconcile(older_than_minutes).await?;
            }
        },
    }
    Ok(())
}
