use std::{io, path::PathBuf};

use axum::{http::StatusCode, routing::get_service, Extension, Router};
use deadpool::managed::Pool;
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection};
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod access;
pub mod api;
pub mod auth;
pub mod chatbot;
pub mod config;
pub mod email;
pub mod error;
pub mod models;
pub mod notify;
pub mod rules;
pub mod schema;
pub mod uploads;

use chatbot::ChatBackend;
use config::Config;
use email::Mailer;

pub type DbPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Builds the pool without opening a connection; the first checkout does.
pub fn connect_to_db(db_url: &str) -> anyhow::Result<DbPool> {
    let db_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    Ok(Pool::builder(db_config).build()?)
}

pub fn app(config: Config, pool: DbPool, mailer: Mailer, chat: ChatBackend) -> Router {
    let media = get_service(ServeDir::new(PathBuf::from(&config.media_root)))
        .handle_error(handle_error);
    Router::new()
        .nest("/api", api::app())
        .nest("/media", media)
        .layer(Extension(pool))
        .layer(Extension(config))
        .layer(Extension(mailer))
        .layer(Extension(chat))
        .layer(TraceLayer::new_for_http())
}

async fn handle_error(err: io::Error) -> error::AppError {
    tracing::warn!(error = %err, "failed to serve media file");
    error::AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch media file")
}
