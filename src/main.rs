mod auth;
mod db;
mod errors;
mod models;
mod platform;
mod provider;
mod registry;
mod routes;
mod service;
mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::chat_repository::ChatRepository;
use crate::db::endpoint_repository::EndpointRepository;
use crate::db::message_repository::MessageRepository;
use crate::db::user_repository::UserRepository;
use crate::db::vote_repository::VoteRepository;
use crate::platform::PlatformClient;
use crate::registry::ModelRegistry;
use crate::routes::chat_routes::{
    chat_handler, delete_chat_handler, list_messages_handler, update_visibility_handler,
};
use crate::routes::history_routes::history_handler;
use crate::routes::model_routes::{
    create_endpoint_handler, delete_endpoint_handler, list_endpoints_handler,
    list_models_handler,
};
use crate::routes::vote_routes::{list_votes_handler, vote_handler};
use crate::service::chat_service::ChatService;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamchat=debug,tower_http=debug".into()),
        )
        .init();

    // ── Database ──────────────────────────────────────────────────────────────
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set (copy .env.example to .env)");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    info!("Database connection established and migrations applied");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let platform_url =
        std::env::var("PLATFORM_URL").expect("PLATFORM_URL must be set (model platform base)");

    let http = reqwest::Client::new();
    let platform = PlatformClient::new(&platform_url, http.clone());

    let chats = ChatRepository::new(pool.clone());
    let messages = MessageRepository::new(pool.clone());
    let votes = VoteRepository::new(pool.clone());
    let users = UserRepository::new(pool.clone());
    let endpoints = EndpointRepository::new(pool.clone());

    let registry = Arc::new(ModelRegistry::new(
        Arc::new(platform.clone()),
        Arc::new(endpoints.clone()),
    ));

    let chat_service = ChatService::new(
        Arc::new(chats),
        Arc::new(messages),
        votes,
        registry.clone(),
        http,
        platform.base_url().to_string(),
    );

    let state = AppState { platform, users, endpoints, registry, chat: chat_service };

    // ── Router ────────────────────────────────────────────────────────────────
    let app = Router::new()
        .route(
            "/api/chat",
            post(chat_handler)
                .delete(delete_chat_handler)
                .patch(update_visibility_handler),
        )
        .route("/api/chat/{id}/messages", get(list_messages_handler))
        .route("/api/history", get(history_handler))
        .route("/api/models", get(list_models_handler))
        .route(
            "/api/model-endpoints",
            get(list_endpoints_handler)
                .post(create_endpoint_handler)
                .delete(delete_endpoint_handler),
        )
        .route("/api/vote", get(list_votes_handler).patch(vote_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // ── Listen ────────────────────────────────────────────────────────────────
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
