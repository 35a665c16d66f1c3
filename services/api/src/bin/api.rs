//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, GeminiVisionAdapter, OpenAiVisionAdapter},
    config::{AiProvider, Config, ConfigError},
    error::ApiError,
    web::{build_router, rest::ApiDoc, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use visualize_core::{ports::SessionBackend, ports::VisionService, SessionManager};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Select the Session Store ---
    // Decided once from configuration; the pool connects lazily so an unreachable
    // database degrades per call instead of failing startup.
    let persistent: Option<Arc<dyn SessionBackend>> = match &config.database_url {
        Some(url) => {
            let db_pool = PgPoolOptions::new().max_connections(5).connect_lazy(url)?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            match db_adapter.run_migrations().await {
                Ok(()) => info!("Database migrations complete."),
                Err(e) => warn!(error = %e, "Database migrations failed; sessions fall back to memory while the store is unreachable"),
            }
            Some(Arc::new(db_adapter))
        }
        None => {
            warn!("DATABASE_URL not configured. Using in-memory session storage.");
            None
        }
    };
    let sessions = Arc::new(SessionManager::new(persistent, config.expiry_policy()));
    sessions.spawn_cleanup(config.cleanup_interval()).await;

    // --- 3. Initialize the Vision Adapter ---
    let vision: Option<Arc<dyn VisionService>> = match config.ai_provider {
        AiProvider::Gemini => match &config.gemini_api_key {
            Some(key) => Some(Arc::new(GeminiVisionAdapter::new(
                key.clone(),
                config.gemini_model.clone(),
            )?) as Arc<dyn VisionService>),
            None => None,
        },
        AiProvider::OpenAi => config.openai_api_key.as_ref().map(|key| {
            let client = Client::with_config(OpenAIConfig::new().with_api_key(key));
            Arc::new(OpenAiVisionAdapter::new(client, config.vision_model.clone()))
                as Arc<dyn VisionService>
        }),
    };
    match &vision {
        Some(_) => info!(provider = ?config.ai_provider, "Vision provider configured"),
        None => warn!(provider = ?config.ai_provider, "No API key for the vision provider; AI routes will answer 500"),
    }

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(sessions.clone(), vision));

    let origin = config.frontend_url.parse::<HeaderValue>().map_err(|e| {
        ConfigError::InvalidValue("FRONTEND_URL".to_string(), e.to_string())
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(build_router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- 7. Release the Cleanup Timer ---
    sessions.shutdown().await;
    info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received.");
}
