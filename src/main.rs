mod accounts;
mod auth;
mod cache;
mod config;
mod db;
mod discovery;
mod entities;
mod error;
mod models;
mod routes;
mod templates;
mod tmdb;
mod watchlist;


use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tracing::info;

use crate::{cache::CacheManager, config::Config, tmdb::TmdbClient};

pub struct AppState {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub tmdb: Arc<TmdbClient>,
}

#[derive(Debug, Parser)]
#[command(name = "whatsplaying", about = "Movie and TV watchlist with streaming availability")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the web server (default).
    Serve,
    /// Seed the streaming service catalog with popular providers.
    PopulateServices,
    /// Delete expired cache entries and sessions.
    PurgeCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,whatsplaying=debug,sqlx=warn".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env()?);
    let db = db::connect_and_migrate(&config.database_url).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db).await,
        Command::PopulateServices => {
            let report = accounts::seed_default_services(&db).await?;
            for name in &report.created {
                info!(service = %name, "created streaming service");
            }
            info!(
                created = report.created.len(),
                existing = report.existing.len(),
                "streaming services populated"
            );
            Ok(())
        },
        Command::PurgeCache => {
            purge_expired(&db).await?;
            Ok(())
        },
    }
}

async fn purge_expired(db: &DatabaseConnection) -> anyhow::Result<()> {
    let cache_rows = CacheManager::new(db.clone()).purge_expired().await?;
    let sessions = accounts::purge_expired_sessions(db).await?;
    info!(cache_rows, sessions, "purged expired rows");
    Ok(())
}

async fn serve(config: Arc<Config>, db: DatabaseConnection) -> anyhow::Result<()> {
    purge_expired(&db).await?;

    let http = reqwest::Client::builder()
        .user_agent("whatsplaying/0.1")
        .timeout(Duration::from_secs(30))
        .build()?;

    let tmdb = TmdbClient::new(
        http,
        config.tmdb_api_key.clone(),
        config.tmdb_base_url.clone(),
        config.tmdb_rps,
        CacheManager::new(db.clone()),
    );

    let state = Arc::new(AppState { config: config.clone(), db, tmdb: Arc::new(tmdb) });
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, region = %config.watch_region, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
