use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use parley_server::push::NoopPushGateway;
use parley_server::{start, ServerConfig};
use parley_store::Database;

#[derive(Parser)]
#[command(name = "parley", about = "Real-time chat/ticketing backend")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Database file path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// JWT signing secret; falls back to PARLEY_JWT_SECRET.
    #[arg(long, env = "PARLEY_JWT_SECRET")]
    jwt_secret: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let db_path = args
        .db
        .unwrap_or_else(|| dirs_home().join(".parley").join("database").join("parley.db"));
    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    let mut config = ServerConfig { port: args.port, ..Default::default() };
    match args.jwt_secret {
        Some(secret) => config.jwt_secret = secret,
        None => {
            tracing::warn!("using built-in dev JWT secret; set PARLEY_JWT_SECRET in production");
        }
    }

    let port = config.port;
    let _handle = start(config, db, Arc::new(NoopPushGateway))
        .await
        .expect("Failed to start server");

    tracing::info!(port = port, "parley server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
