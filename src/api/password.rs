use crate::{
    auth,
    email::{EmailError, Mailer},
    error::{self, AppError, AppResult},
    models::User,
    schema::*,
    DbPool,
};
use axum::{extract::Path, http::StatusCode, routing::post, Extension, Json, Router};
use diesel::{update, ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use nanoid::nanoid;
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use validator::Validate;

#[derive(Default)]
struct Resets(HashMap<String, (Instant, i32)>);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PwdRequest {
    email: String,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct NewPwdRequest {
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    password: String,
}

// 1 hour
const RESET_ALLOWED_TIME: Duration = Duration::from_secs(60 * 60);

impl Resets {
    /// Records a new token, dropping the ones that have already expired.
    fn issue(&mut self, uid: String, user_id: i32, now: Instant) {
        self.0
            .retain(|_, (issued, _)| now.duration_since(*issued) <= RESET_ALLOWED_TIME);
        self.0.insert(uid, (now, user_id));
    }
}

async fn password_request(
    Extension(pool): Extension<DbPool>,
    Extension(mailer): Extension<Mailer>,
    Extension(resets): Extension<Arc<Mutex<Resets>>>,
    Json(req): Json<PwdRequest>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    let Some(user) = users::table
        .filter(users::email.eq(req.email.trim()))
        .filter(users::is_active.eq(true))
        .first::<User>(conn)
        .await
        .optional()? else {
        return Err(AppError::not_found("could not find a matching account"));
    };

    let uid = nanoid!();
    let link = mailer.link(&["password", &uid]);
    let body = format!(
        r"Hi {},

We have received a request to change your Campus Club Hub password. To reset your password, please open the link below within the next {} minutes:

{}

If you did not request this password reset you can disregard this message and your password will remain unchanged.

Thanks,
The Campus Club Hub Team.",
        user.username,
        RESET_ALLOWED_TIME.as_secs() / 60,
        link
    );

    match mailer
        .send(&user.username, &user.email, "Campus Club Hub password reset", body)
        .await
    {
        Ok(()) => {
            resets.lock().await.issue(uid, user.id, Instant::now());
            Ok(())
        }
        Err(EmailError::InvalidAddress(_)) => Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "the account's email address is invalid",
        )),
        Err(e) => {
            tracing::error!(user_id = user.id, error = %e, "password reset email not sent");
            Err(AppError::from(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to send email",
            ))
        }
    }
}

async fn password_reset(
    Extension(pool): Extension<DbPool>,
    Extension(resets): Extension<Arc<Mutex<Resets>>>,
    Path(uid): Path<String>,
    Json(req): Json<NewPwdRequest>,
) -> AppResult<()> {
    error::validate(&req)?;
    let mut resets = resets.lock().await;

    let Some(&(instant, user_id)) = resets.0.get(&uid) else {
        return Err(AppError::from(
            StatusCode::UNAUTHORIZED,
            "invalid password reset url",
        ));
    };

    if instant.elapsed() > RESET_ALLOWED_TIME {
        resets.0.remove(&uid);
        return Err(AppError::from(
            StatusCode::UNAUTHORIZED,
            "password reset expired",
        ));
    }

    let conn = &mut pool.get().await?;

    update(users::table.find(user_id))
        .set(users::password_hash.eq(auth::hash_password(req.password)?))
        .execute(conn)
        .await?;

    resets.0.remove(&uid);
    tracing::info!(user_id, "password reset");

    Ok(())
}

async fn check_uid(
    Extension(resets): Extension<Arc<Mutex<Resets>>>,
    Path(uid): Path<String>,
) -> AppResult<()> {
    match resets.lock().await.0.get(&uid) {
        Some((instant, _)) if instant.elapsed() <= RESET_ALLOWED_TIME => Ok(()),
        _ => Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "invalid password reset url",
        )),
    }
}

pub fn app() -> Router {
    let shared_resets = Arc::new(Mutex::new(Resets::default()));

    Router::new()
        .route("/reset", post(password_request))
        .route("/:uid", post(password_reset).get(check_uid))
        .layer(Extension(shared_resets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_resets_are_pruned_on_issue() {
        let start = Instant::now();
        let mut resets = Resets::default();
        resets.issue("first".to_string(), 7, start);
        resets.issue("first-again".to_string(), 7, start + RESET_ALLOWED_TIME);
        assert_eq!(resets.0.len(), 2);

        resets.issue("second".to_string(), 8, start + RESET_ALLOWED_TIME * 2);
        assert!(!resets.0.contains_key("first"));
        assert!(resets.0.contains_key("first-again"));
        assert!(resets.0.contains_key("second"));
    }
}
