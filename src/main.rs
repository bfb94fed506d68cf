mod annotation;
mod config;
mod db;
mod error;
mod inference;
mod models;
mod persistence;
mod routes;
mod sessions;

use std::sync::Arc;

use crate::{
    config::Config,
    inference::HttpInferenceClient,
    models::AppState,
    persistence::PgAnnotationGateway,
    sessions::EditorSessions,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    let state = AppState {
        gateway: Arc::new(PgAnnotationGateway::new(pool)),
        inference: Arc::new(HttpInferenceClient::new(cfg.inference_url.clone())),
        sessions: Arc::new(EditorSessions::default()),
        max_upload_bytes: cfg.max_upload_bytes(),
    };

    // DEV ONLY: the browser editor is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(inference_url = %cfg.inference_url, "detection service configured");
    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
