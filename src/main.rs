use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::Method;
use campus_club_hub::{
    auth::ensure_jwt_secret_is_valid,
    chatbot::{ChatBackend, OpenAiCompatible},
    config::Config,
    connect_to_db,
    email::Mailer,
};
use envconfig::Envconfig;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campus_club_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::init_from_env().context("failed to read configuration")?;
    ensure_jwt_secret_is_valid();

    let mailer = Mailer::from_config(&config)?;
    if !mailer.is_enabled() {
        tracing::warn!("EMAIL_USERNAME/EMAIL_PASSWORD not set; verification and reset emails are disabled");
    } else if let Err(e) = mailer.sanity_check().await {
        tracing::warn!(error = %e, "email sanity check failed; password reset will not work");
    }

    let chat = match &config.chatbot_api_key {
        Some(key) => {
            let client = OpenAiCompatible::new(
                config.chatbot_api_url.clone(),
                key.clone(),
                config.chatbot_model.clone(),
            )?;
            tracing::info!(model = %config.chatbot_model, "chatbot uses the completion API");
            ChatBackend(Some(Arc::new(client)))
        }
        None => {
            tracing::info!("CHATBOT_API_KEY not set; chatbot answers with keyword matching");
            ChatBackend(None)
        }
    };

    let pool = connect_to_db(&config.db_url)?;
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(Any);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = campus_club_hub::app(config, pool, mailer, chat).layer(cors);

    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
