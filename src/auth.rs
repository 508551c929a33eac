use crate::{
    error::{AppError, AppResult},
    models::User,
    rules::Viewer,
    schema::users,
    DbPool,
};
use argon2::Argon2;
use axum::{
    extract::{FromRequest, RequestParts},
    headers::{authorization::Bearer, Authorization},
    http::{header::AUTHORIZATION, StatusCode},
    Extension, TypedHeader,
};
use diesel::{OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use jsonwebtoken::{
    errors::Result as JwtResult, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use serde::{Deserialize, Serialize};
use std::{ops::Deref, time::Duration};

/// Login tokens stay valid for a day.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

pub fn hash_password(password: impl AsRef<[u8]>) -> password_hash::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_ref(), &salt)
        .map(|h| h.to_string())
}

pub fn verify_password(
    password: impl AsRef<[u8]>,
    password_hash: impl AsRef<str>,
) -> password_hash::Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash.as_ref())?;
    Ok(Argon2::default()
        .verify_password(password.as_ref(), &parsed_hash)
        .is_ok())
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

lazy_static::lazy_static! {
    static ref KEYS: Keys = {
        let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");
        Keys {
            encoding: EncodingKey::from_base64_secret(&secret).expect("JWT_SECRET is not valid base64"),
            decoding: DecodingKey::from_base64_secret(&secret).expect("JWT_SECRET is not valid base64"),
        }
    };
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i32,
    pub exp: u64,
}

/// Forces the key store so a bad `JWT_SECRET` fails at startup, not on
/// the first login.
#[allow(unused_must_use)]
pub fn ensure_jwt_secret_is_valid() {
    KEYS.deref();
}

pub fn generate_jwt(user_id: i32, exp: Duration) -> JwtResult<String> {
    jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            user_id,
            exp: jsonwebtoken::get_current_timestamp() + exp.as_secs(),
        },
        &KEYS.encoding,
    )
}

pub fn validate_jwt(token: &str) -> JwtResult<TokenData<Claims>> {
    jsonwebtoken::decode::<Claims>(token, &KEYS.decoding, &Validation::default())
}

fn unauthorized(message: &'static str) -> AppError {
    AppError::from(StatusCode::UNAUTHORIZED, message)
}

/// The user behind the bearer token, reloaded on every request so flag and
/// membership changes apply immediately.
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn viewer(&self) -> Viewer {
        Viewer::from(&self.0)
    }
}

/// Like [`CurrentUser`] but lets anonymous requests through. A token that is
/// present but invalid is still rejected.
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    pub fn viewer(&self) -> Option<Viewer> {
        self.0.as_ref().map(Viewer::from)
    }
}

/// Superusers only.
pub struct AdminOnly(pub User);

async fn user_from_token<B: Send>(req: &mut RequestParts<B>) -> AppResult<User> {
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request(req)
            .await
            .map_err(|_| unauthorized("missing or malformed bearer token"))?;

    let claims = validate_jwt(bearer.token())
        .map_err(|_| unauthorized("invalid or expired token"))?
        .claims;

    let Extension(pool) = Extension::<DbPool>::from_request(req)
        .await
        .map_err(|e| anyhow::anyhow!("database pool is not installed: {e}"))?;
    let conn = &mut pool.get().await?;

    let user = users::table
        .find(claims.user_id)
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| unauthorized("account no longer exists"))?;

    if !user.is_active {
        return Err(unauthorized("account is disabled"));
    }
    Ok(user)
}

#[axum::async_trait]
impl<B: Send> FromRequest<B> for CurrentUser {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        user_from_token(req).await.map(CurrentUser)
    }
}

#[axum::async_trait]
impl<B: Send> FromRequest<B> for MaybeUser {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        if !req.headers().contains_key(AUTHORIZATION) {
            return Ok(MaybeUser(None));
        }
        user_from_token(req).await.map(|u| MaybeUser(Some(u)))
    }
}

#[axum::async_trait]
impl<B: Send> FromRequest<B> for AdminOnly {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let user = user_from_token(req).await?;
        if !user.is_superuser {
            return Err(AppError::forbidden("superuser access required"));
        }
        Ok(AdminOnly(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_verify_against_their_hash() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }

    #[test]
    fn tokens_carry_the_user_id() {
        std::env::set_var("JWT_SECRET", "dGVzdC1zZWNyZXQtZm9yLXVuaXQtdGVzdHM=");
        let token = generate_jwt(42, TOKEN_LIFETIME).unwrap();
        assert_eq!(validate_jwt(&token).unwrap().claims.user_id, 42);
        assert!(validate_jwt("not-a-token").is_err());
    }
}
