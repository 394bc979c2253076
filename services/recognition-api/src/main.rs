use actix_web::{web, App, HttpServer};
use recognition_api::handlers::{self, AppState};
use shared::config::Settings;
use shared::error::ErrorCatalog;
use shared::llm::{RetryPolicy, UpstreamClient};
use tracing::info;

fn init_tracing(level: &str) {
    let level = level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .json()
        .with_max_level(level)
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new()?;
    init_tracing(&settings.log_level);
    settings.validate()?;

    let upstream = UpstreamClient::new(
        settings.openrouter_base_url.clone(),
        settings.openrouter_api_key.clone(),
        RetryPolicy::default(),
    );
    let state = web::Data::new(AppState {
        settings: settings.clone(),
        catalog: ErrorCatalog::new(),
        upstream,
    });

    info!(
        model = %settings.openrouter_model,
        gate_model = %settings.gate_model(),
        base_url = %settings.openrouter_base_url,
        "starting recognition-api"
    );

    let bind = (settings.http_bind.clone(), settings.http_port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(handlers::health))
            .route(
                "/api/v1/ai/recognize-food",
                web::post().to(handlers::recognize_food),
            )
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
