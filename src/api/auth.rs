use crate::{
    auth,
    email::Mailer,
    error::{self, AppError, AppResult},
    models::User,
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use validator::Validate;

/// Pending email verifications: token -> (issued at, user id).
#[derive(Default)]
pub(crate) struct Verifications(HashMap<String, (Instant, i32)>);

const VERIFICATION_ALLOWED_TIME: Duration = Duration::from_secs(60 * 60 * 24 * 7);

impl Verifications {
    /// Records a new token, dropping the ones that have already expired.
    fn issue(&mut self, uid: String, user_id: i32, now: Instant) {
        self.0
            .retain(|_, (issued, _)| now.duration_since(*issued) <= VERIFICATION_ALLOWED_TIME);
        self.0.insert(uid, (now, user_id));
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    #[validate(length(min = 3, max = 150))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    password: String,
    #[validate(length(max = 30))]
    phone: Option<String>,
    address: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizedResponse {
    token: String,
    user_id: i32,
}

impl AuthorizedResponse {
    fn from_user(user: &User) -> anyhow::Result<AuthorizedResponse> {
        Ok(AuthorizedResponse {
            token: auth::generate_jwt(user.id, auth::TOKEN_LIFETIME)?,
            user_id: user.id,
        })
    }
}

async fn register(
    Extension(pool): Extension<DbPool>,
    Extension(mailer): Extension<Mailer>,
    Extension(verifications): Extension<Arc<Mutex<Verifications>>>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Json<AuthorizedResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = users)]
    struct NewUser {
        username: String,
        email: String,
        password_hash: String,
        phone: Option<String>,
        address: Option<String>,
    }

    error::validate(&req)?;
    let conn = &mut pool.get().await?;

    let new_user = diesel::insert_into(users::table)
        .values(NewUser {
            username: req.username.trim().to_string(),
            email: req.email.trim().to_string(),
            password_hash: auth::hash_password(req.password)?,
            phone: req.phone,
            address: req.address,
        })
        .on_conflict(users::username)
        .do_nothing()
        .get_result::<User>(conn)
        .await
        .optional()?;

    let Some(new_user) = new_user else {
        return Err(AppError::conflict("username has been taken"));
    };
    tracing::info!(user_id = new_user.id, "registered user");

    let uid = nanoid!();
    let link = mailer.link(&["verify", &uid]);
    let body = format!(
        r#"Hi {},

Welcome to Campus Club Hub! Please confirm your email address by opening the link below within the next 7 days:

{link}

Thanks,
The Campus Club Hub Team."#,
        new_user.username,
    );

    match mailer
        .send(&new_user.username, &new_user.email, "Confirm your email", body)
        .await
    {
        Ok(()) => {
            verifications
                .lock()
                .await
                .issue(uid, new_user.id, Instant::now());
        }
        Err(e) => {
            tracing::warn!(user_id = new_user.id, error = %e, "verification email not sent");
        }
    }

    Ok(Json(AuthorizedResponse::from_user(&new_user)?))
}

async fn login(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthorizedResponse>> {
    let conn = &mut pool.get().await?;

    if let Some(user) = users::table
        .filter(users::username.eq(req.username))
        .first::<User>(conn)
        .await
        .optional()?
    {
        if user.is_active && auth::verify_password(req.password, &user.password_hash)? {
            return Ok(Json(AuthorizedResponse::from_user(&user)?));
        }
    }
    Err(AppError::from(
        StatusCode::UNAUTHORIZED,
        "invalid username or password",
    ))
}

async fn verify_email(
    Extension(pool): Extension<DbPool>,
    Extension(verifications): Extension<Arc<Mutex<Verifications>>>,
    Path(uid): Path<String>,
) -> AppResult<()> {
    let mut verifications = verifications.lock().await;

    let Some(&(issued, user_id)) = verifications.0.get(&uid) else {
        return Err(AppError::from(
            StatusCode::BAD_REQUEST,
            "invalid verification link",
        ));
    };

    if issued.elapsed() > VERIFICATION_ALLOWED_TIME {
        verifications.0.remove(&uid);
        return Err(AppError::from(
            StatusCode::UNAUTHORIZED,
            "verification link expired",
        ));
    }

    let conn = &mut pool.get().await?;
    diesel::update(users::table.find(user_id))
        .set(users::email_verified.eq(true))
        .execute(conn)
        .await?;

    verifications.0.remove(&uid);
    Ok(())
}

pub fn app() -> Router {
    let shared_verifications = Arc::new(Mutex::new(Verifications::default()));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify/:uid", get(verify_email))
        .layer(Extension(shared_verifications))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuing_a_token_drops_expired_ones() {
        let start = Instant::now();
        let mut verifications = Verifications::default();
        verifications.issue("old".to_string(), 1, start);
        verifications.issue("recent".to_string(), 2, start + Duration::from_secs(60));

        let later = start + VERIFICATION_ALLOWED_TIME + Duration::from_secs(1);
        verifications.issue("new".to_string(), 3, later);

        assert!(!verifications.0.contains_key("old"));
        assert_eq!(verifications.0.get("recent").map(|e| e.1), Some(2));
        assert_eq!(verifications.0.get("new").map(|e| e.1), Some(3));
    }
}
