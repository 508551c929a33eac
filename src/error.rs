use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::{borrow::Cow, collections::BTreeMap};
use validator::ValidationErrors;

pub enum AppError {
    InternalServerError(anyhow::Error),
    ResponseStatusError(StatusCode, Cow<'static, str>),
    Validation(ValidationErrors),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct AppErrorResponse {
    status: u16,
    message: Cow<'static, str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<String, Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::InternalServerError(err) => {
                tracing::error!(error = ?err, "request failed");
                AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                    .into_response()
            }
            AppError::ResponseStatusError(code, s) => {
                tracing::debug!(status = code.as_u16(), message = %s, "replying with error");
                (
                    code,
                    Json(AppErrorResponse {
                        status: code.as_u16(),
                        message: s,
                        fields: BTreeMap::new(),
                    }),
                )
                    .into_response()
            }
            AppError::Validation(errors) => {
                let code = StatusCode::UNPROCESSABLE_ENTITY;
                (
                    code,
                    Json(AppErrorResponse {
                        status: code.as_u16(),
                        message: "invalid request".into(),
                        fields: field_messages(&errors),
                    }),
                )
                    .into_response()
            }
        }
    }
}

fn field_messages(errors: &ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> AppError {
        AppError::InternalServerError(e.into())
    }
}

impl AppError {
    pub fn from(code: StatusCode, s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::ResponseStatusError(code, s.into())
    }

    pub fn forbidden(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::FORBIDDEN, s)
    }

    pub fn not_found(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::NOT_FOUND, s)
    }

    pub fn conflict(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::CONFLICT, s)
    }

    /// A single-field validation failure, rendered like `validator` errors.
    pub fn invalid_field(field: &'static str, message: &'static str) -> AppError {
        let mut errors = ValidationErrors::new();
        let mut error = validator::ValidationError::new("invalid");
        error.message = Some(Cow::Borrowed(message));
        errors.add(field, error);
        AppError::Validation(errors)
    }
}

/// True for inserts/updates rejected by a unique index.
pub fn is_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        )
    )
}

/// Runs `validator` checks on a request body.
pub fn validate<T: validator::Validate>(req: &T) -> AppResult<()> {
    req.validate().map_err(AppError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_keep_their_code() {
        let res = AppError::forbidden("nope").into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        let res = AppError::conflict("event full").into_response();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_errors_are_masked() {
        let err: AppError = anyhow::anyhow!("db exploded").into();
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn field_errors_are_collected_per_field() {
        let AppError::Validation(errors) = AppError::invalid_field("ends_at", "must be after start")
        else {
            panic!("expected a validation error");
        };
        let fields = field_messages(&errors);
        assert_eq!(fields["ends_at"], vec!["must be after start".to_string()]);
    }
}
