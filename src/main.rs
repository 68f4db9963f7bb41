use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use plaza::config::{Cli, Config};
use plaza::media::RemoteMediaStore;
use plaza::state::AppState;
use plaza::{app, db};

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
    let config = Config::load(&cli)?;

    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    let media = Arc::new(RemoteMediaStore::new(&config.media));
    let state = AppState {
        db: pool,
        config: config.clone(),
        media,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}
