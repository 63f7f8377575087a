mod advisor;
mod auth;
mod budgets;
mod config;
mod dashboard;
mod error;
mod routes;
mod transactions;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    if std::env::var("ENV").ok().as_deref() != Some("prod") {
        dotenvy::dotenv().ok();
    }

    let cfg = config::Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    tracing::info!(
        model = %cfg.ollama_model,
        ollama = %cfg.ollama_base_url,
        "starting finance backend"
    );

    let state = AppState {
        pool,
        http: reqwest::Client::new(),
        cfg: cfg.clone(),
    };
    let app = routes::app().with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
