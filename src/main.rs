pub mod auth;
pub mod client;
pub mod config;
mod db;
mod validation;

use auth::{
    handlers::auth_router,
    middleware::SharedAuthService,
    models::{
        AuthResponse, LoginRequest, MessageResponse, RefreshRequest, RefreshResponse,
        RegisterRequest, Role, SuccessResponse, UserResponse, UserStats,
    },
    repository::PgAuthStore,
    service::AuthService,
};
use axum::Router;
use config::Config;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    paths(
        auth::handlers::captcha_handler,
        auth::handlers::register_handler,
        auth::handlers::login_handler,
        auth::handlers::refresh_handler,
        auth::handlers::me_handler,
        auth::handlers::logout_handler,
        auth::handlers::delete_account_handler,
    ),
    components(
        schemas(
            RegisterRequest, LoginRequest, RefreshRequest, AuthResponse, RefreshResponse,
            UserResponse, UserStats, Role, MessageResponse, SuccessResponse
        )
    ),
    tags(
        (name = "auth", description = "Authentication and session endpoints")
    ),
    info(
        title = "Quill Auth API",
        version = "1.0.0",
        description = "Authentication and session-integrity API for the Quill blogging platform"
    )
)]
struct ApiDoc;

/// Creates and configures the application router
/// Mounts the auth endpoints, Swagger UI, and CORS middleware
fn create_router(service: SharedAuthService) -> Router {
    use tower_http::cors::{Any, CorsLayer};

    // Configure CORS to allow all origins, methods, and headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Auth routes
        .merge(auth_router(service))
        .layer(cors)
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Quill Auth API - Starting...");

    // Load and validate configuration
    let config = Config::from_env().expect("Invalid configuration");

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Run SQLx migrations on startup
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations completed successfully");

    // Wire the auth service over the Postgres store
    let service = AuthService::shared(Arc::new(PgAuthStore::new(db_pool)), &config.auth)
        .expect("Failed to build auth service");

    let app = create_router(service);

    // Start the Axum server
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Quill Auth API is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
