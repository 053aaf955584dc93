use lesson_colab::auth::{Authenticator, DenyAllAuthenticator};
use lesson_colab::clients::app_service_client::AppServiceClient;
use lesson_colab::config::Config;
use lesson_colab::routes::create_app;
use lesson_colab::services::auth_service::{AppServiceAuthenticator, JwtAuthenticator};
use lesson_colab::services::lesson_store::{AppServiceLessonStore, LessonStore, LoggingLessonStore};
use lesson_colab::ws::{spawn_sweeper, HubConfig, RoomHub};
use lesson_colab::AppState;
use std::panic;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "lesson_colab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // App service client, shared by identity lookup and lesson storage
    let app_service = match &config.app_service_url {
        Some(url) => match AppServiceClient::new(url.clone(), config.auth_jwt_secret.clone(), config.service_name.clone()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                error!("Failed to create app service client: {}", e);
                None
            }
        },
        None => None,
    };

    let authenticator: Arc<dyn Authenticator> = match (&config.auth_jwt_secret, &app_service) {
        (Some(secret), _) => {
            info!("Authenticating sessions with signed JWTs");
            Arc::new(JwtAuthenticator::new(secret.clone()))
        }
        (None, Some(client)) => {
            info!("Authenticating sessions through the app service");
            Arc::new(AppServiceAuthenticator::new(client.clone(), config.auth_cache_ttl()))
        }
        (None, None) => {
            warn!("No JWT secret or app service configured - every connection will be refused");
            Arc::new(DenyAllAuthenticator)
        }
    };

    let store: Arc<dyn LessonStore> = match (&app_service, &config.auth_jwt_secret) {
        (Some(client), Some(_)) => Arc::new(AppServiceLessonStore::new(client.clone())),
        _ => {
            warn!("No app service with service credentials configured - persisted edits will only be logged");
            Arc::new(LoggingLessonStore)
        }
    };

    // Room hub and its TTL sweeper
    let hub = Arc::new(RoomHub::new(
        HubConfig {
            session_ttl: config.session_ttl(),
            outbound_queue_capacity: config.outbound_queue_capacity,
        },
        store,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(hub.clone(), config.sweep_interval(), shutdown_rx);

    let app = create_app(AppState::new(hub.clone(), authenticator), &config);

    // Start the HTTP/WebSocket server
    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            return;
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Lesson channels available at ws://{}/ws/lesson/{{lesson_id}}", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    let shutdown_hub = hub.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            // Close the lesson channels so open upgrades can finish
            shutdown_hub.shutdown();
        })
        .await;
    if let Err(e) = served {
        error!("Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    hub.shutdown();
    hub.flush_persists().await;
    info!("Server stopped");
}
