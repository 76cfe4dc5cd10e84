//! Pomodoro server binary

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pomodoro_server::{
    config::Args,
    db::MongoClient,
    routes::health::version_string,
    server,
    store::{MemoryStore, MongoStore, Store},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pomodoro_server={},info", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Pomodoro Server {}", version_string());
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db {})", args.mongodb_uri, args.mongodb_db);
    info!(
        "Notifier: every {}s, window {} min",
        args.notifier_interval_secs, args.notify_window_minutes
    );
    info!("======================================");

    // Connect to MongoDB (in-memory store in dev mode when unreachable)
    let store: Arc<dyn Store> = match connect_mongo(&args).await {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Arc::new(store)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Arc::new(MemoryStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let state = match server::AppState::new(args, store) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to build application state: {}", e);
            std::process::exit(1);
        }
    };

    let notifier = state.notifier().spawn();

    let result = server::run(state).await;
    notifier.abort();

    if let Err(e) = result {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn connect_mongo(args: &Args) -> pomodoro_server::Result<MongoStore> {
    let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    MongoStore::connect(client, args.mongodb_transactions).await
}
