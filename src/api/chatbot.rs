use super::account;
use crate::{
    auth::CurrentUser,
    chatbot::{self, ChatBackend, ChatContext},
    error::{self, AppResult},
    DbPool,
};
use axum::{routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Deserialize, Validate)]
struct Question {
    #[validate(length(min = 1, max = 2000))]
    question: String,
}

#[derive(Serialize)]
struct Answer {
    answer: String,
}

/// Always answers 200: upstream failures become the answer text.
async fn ask(
    Extension(pool): Extension<DbPool>,
    Extension(backend): Extension<ChatBackend>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<Question>,
) -> AppResult<Json<Answer>> {
    error::validate(&req)?;
    let conn = &mut pool.get().await?;

    let dashboard = account::load_dashboard(conn, user.id).await?;
    let ctx = ChatContext {
        username: user.username,
        clubs: dashboard.clubs.into_iter().map(|c| c.name).collect(),
        upcoming_events: dashboard
            .upcoming_events
            .into_iter()
            .map(|e| format!("{} ({})", e.title, e.starts_at.format("%d/%m/%Y %H:%M")))
            .collect(),
        badges: dashboard.badges.into_iter().map(|b| b.name).collect(),
        contributions: dashboard.contributions,
        registrations: dashboard.registrations,
    };

    let answer = chatbot::answer(backend.client(), req.question.trim(), &ctx).await;
    Ok(Json(Answer { answer }))
}

pub fn app() -> Router {
    Router::new().route("/", post(ask))
}
