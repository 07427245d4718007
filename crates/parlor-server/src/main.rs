use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use parlor_chat::Hub;
use parlor_server::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLOR_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLOR_DB_PATH").unwrap_or_else(|_| "parlor.db".into());
    let host = std::env::var("PARLOR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLOR_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;

    // Shared state
    let db = Arc::new(parlor_db::Database::open(&PathBuf::from(&db_path))?);
    let hub = Hub::new();

    let app = build_router(AppState {
        db,
        hub,
        jwt_secret,
    });

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parlor chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
