use crate::{
    auth::CurrentUser,
    config::Config,
    error::{AppError, AppResult},
    uploads::{self, UploadKind},
};
use axum::{
    extract::{ContentLengthLimit, Multipart, Path},
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use serde::Serialize;

/// File size cap plus room for the multipart framing.
const MAX_BODY_BYTES: u64 = uploads::MAX_UPLOAD_BYTES as u64 + 64 * 1024;

#[derive(Serialize)]
struct Uploaded {
    path: String,
    url: String,
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::from(StatusCode::BAD_REQUEST, message.into())
}

async fn upload(
    Extension(config): Extension<Config>,
    CurrentUser(user): CurrentUser,
    Path(kind): Path<UploadKind>,
    ContentLengthLimit(mut multipart): ContentLengthLimit<Multipart, MAX_BODY_BYTES>,
) -> AppResult<Json<Uploaded>> {
    let mut data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() == Some("file") {
            data = Some(field.bytes().await.map_err(|e| bad_request(e.to_string()))?);
            break;
        }
    }
    let data = data.ok_or_else(|| bad_request("missing `file` field"))?;

    let name = uploads::name_for(kind, &data).map_err(|e| bad_request(e.message()))?;
    uploads::store(std::path::Path::new(&config.media_root), &name, &data).await?;

    tracing::info!(
        kind = kind.dir(),
        path = %name.relative_path,
        mime = %name.mime,
        by = user.id,
        "stored upload"
    );
    Ok(Json(Uploaded {
        url: uploads::media_url(&name.relative_path),
        path: name.relative_path,
    }))
}

pub fn app() -> Router {
    Router::new().route("/:kind", post(upload))
}
