mod auth;
mod chat;
mod config;
mod db;
mod error;
mod extractors;
mod feed;
mod geo;
mod notifications;
mod quests;
mod routes;
mod state;

use std::net::SocketAddr;

use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Config};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    let state = AppState::build(pool, config.clone());

    let app = Router::new()
        .merge(routes::auth::router())
        .merge(routes::feed::router())
        .merge(routes::quests::router())
        .merge(routes::instances::router())
        .merge(routes::chat::router())
        .merge(routes::users::router())
        .merge(routes::posts::router())
        .merge(routes::notifications::router())
        .merge(routes::moderation::router())
        .merge(routes::locations::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
