//! chocolatechip server binary.
//!
//! ```bash
//! # create a user
//! cargo run -- seed bob correct
//!
//! # start the API (default subcommand)
//! cargo run -- serve
//!
//! curl -v -c cookies.txt -H 'content-type: application/json' \
//!     -d '{"username":"bob","password":"correct"}' http://127.0.0.1:3000/api/auth/login
//! curl -v -b cookies.txt http://127.0.0.1:3000/api/users
//! curl -v -b cookies.txt -c cookies.txt http://127.0.0.1:3000/api/auth/logout
//! ```

use chocolatechip::{app, db, Config, SeaOrmStore, UserStore};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve,
    /// Register a user with the given password.
    Seed { username: String, password: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let conn = db::connect(&config.database_url).await?;
    info!("database ready");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Seed { username, password } => {
            let user = UserStore::new(conn).insert(&username, &password).await?;
            info!(id = user.id, username = %user.username, "user created");
        }
        Command::Serve => {
            let sweeper =
                SeaOrmStore::new(conn.clone()).spawn_sweeper(config.session.cleanup_interval);

            let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
            info!("server starting on http://{}", config.bind_addr);

            axum::serve(listener, app(conn, config.session))
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            sweeper.abort();
            info!("server stopped");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
