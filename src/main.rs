//! healthdesk - admin backend for the health-products CRM

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use healthdesk::{
    auth::Authorizer,
    config::Args,
    db::{ensure_system_admin, DocumentStore, MemoryStore, MongoClient, MongoStore},
    logging::{self, AuditLogger},
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  healthdesk - CRM admin backend");
    info!("======================================");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db: {})", args.mongodb_uri, args.mongodb_db);
    info!("Token lifetime: {}s", args.jwt_expiry_seconds);
    info!("======================================");

    // The secret is resolved exactly once; only the authorizer holds it
    let secret = args.resolve_jwt_secret()?;
    if args.jwt_secret.is_none() {
        warn!("JWT_SECRET not set - using the development fallback secret");
    }
    let authorizer = Authorizer::new(&secret, args.jwt_expiry_seconds)?;
    drop(secret);

    let store: Arc<dyn DocumentStore> =
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                let store = MongoStore::new(client);
                store.apply_indexes().await?;
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

    if let Some((email, password)) = args.bootstrap_admin() {
        ensure_system_admin(store.as_ref(), email, password).await?;
    }

    let audit = AuditLogger::new();
    if let Some(path) = args.audit_log.clone() {
        audit.init_file(path).await?;
    }

    let state = Arc::new(AppState::new(args, store, authorizer, audit));
    server::run(state).await?;

    info!("healthdesk stopped");
    Ok(())
}
