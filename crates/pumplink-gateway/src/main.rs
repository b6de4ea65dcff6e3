//! Pumplink gateway entry point.
//!
//! Binary name: `pumplink`
//!
//! Parses CLI arguments, initializes the database and adapters, then
//! either starts the WebSocket gateway or mints an access token.

mod router;
mod state;
mod ws;

use chrono::Duration;
use clap::{Parser, Subcommand};
use pumplink_types::identity::Role;
use tracing_subscriber::EnvFilter;

use state::AppState;

#[derive(Parser)]
#[command(name = "pumplink", about = "Real-time conversational gateway for pump-fleet monitoring")]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket gateway.
    Serve {
        /// Listen port (overrides config.toml)
        #[arg(long)]
        port: Option<u16>,
        /// Listen host (overrides config.toml)
        #[arg(long)]
        host: Option<String>,
    },
    /// Mint an access token for a user.
    Token {
        /// Stable user identifier the token authenticates as
        user: String,
        /// Role granted to the token
        #[arg(long, default_value = "operator")]
        role: Role,
        /// Days until expiry; omit for a non-expiring token
        #[arg(long)]
        ttl_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,pumplink=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let state = AppState::init().await?;

    match cli.command {
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.host.clone());
            let port = port.unwrap_or(state.config.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} Pumplink gateway listening on {}",
                console::style("⚡").bold(),
                console::style(format!("ws://{addr}/ws")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let shutdown = state.shutdown.clone();
            let router = router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    // Open connections close with the normal code (1000).
                    shutdown.cancel();
                })
                .await?;

            println!("\n  Gateway stopped.");
        }

        Commands::Token { user, role, ttl_days } => {
            let ttl = ttl_days.map(Duration::days);
            let token =
                pumplink_infra::sqlite::token::issue_token(&state.db_pool, &user, role, ttl)
                    .await?;

            println!();
            println!(
                "  {} Token for '{}' (save this -- it won't be shown again):",
                console::style("🔑").bold(),
                console::style(&user).cyan()
            );
            println!();
            println!("  {}", console::style(&token).yellow().bold());
            println!();
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
