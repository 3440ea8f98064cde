mod config;

use clap::Parser as _;
use config::Config;
use kimi_gateway::{AppState, build_router, tokens::TokenPool};
use tokio::net::TcpListener;
use tracing::{info, instrument};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse().validate()?;

    let tokens = TokenPool::new(config.tokens)?;
    info!("Starting Kimi gateway with {} token(s)", tokens.len());

    let app_state = AppState::new(config.base_url, tokens);
    let router = build_router(app_state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Kimi gateway listening on {}", bind_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
