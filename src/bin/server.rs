use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use warp::Filter;

use quillgate::auth::provider::{ExternalTokenVerifier, GoogleTokenVerifier};
use quillgate::config::AuthConfig;
use quillgate::core::AuthGateway;
use quillgate::handlers::routes;
use quillgate::security::ProductionChecker;
use quillgate::security_logger::init_security_logger;
use quillgate::storage::{SharedSessionStore, SharedUserStore, SqliteStore};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    }

    init_security_logger();

    let config = match AuthConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, environment={}, link policy={:?}",
        config.host, config.port, config.environment, config.account_link_policy
    );

    ProductionChecker::new(&config).report(&config).await;

    let store = match SqliteStore::connect(&config.database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    let users: SharedUserStore = store.clone();
    let sessions: SharedSessionStore = store.clone();

    let verifier: Option<Arc<dyn ExternalTokenVerifier>> = match config.google_client_id {
        Some(_) => match GoogleTokenVerifier::from_config(&config) {
            Ok(verifier) => Some(Arc::new(verifier)),
            Err(e) => {
                error!("Failed to set up Google sign-in: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("GOOGLE_CLIENT_ID not set; Google sign-in is disabled");
            None
        }
    };

    let gateway = Arc::new(AuthGateway::new(&config, users, sessions.clone(), verifier));

    spawn_session_cleanup(sessions);

    let cors = warp::cors()
        .allow_origins(config.allowed_origins.iter().map(String::as_str))
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["authorization", "content-type"])
        .allow_credentials(true);

    let api = routes(gateway, &config).with(cors).with(warp::log("quillgate::http"));

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Quillgate on {}", addr);

    let (_, server) = warp::serve(api).bind_with_graceful_shutdown(addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    });
    server.await;

    info!("Shutting down");
    store.close().await;
}

/// Purge expired sessions on a fixed interval
fn spawn_session_cleanup(sessions: SharedSessionStore) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = sessions.cleanup_expired(chrono::Utc::now()).await {
                error!("Session cleanup failed: {}", e);
            }
        }
    });
}
