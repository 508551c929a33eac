use crate::{
    access::require,
    auth::CurrentUser,
    error::{self, AppError, AppResult},
    models::AidRequest,
    notify::{self, NewNotification, NotificationKind},
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    routing::{get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RequestKind {
    Resource,
    Aid,
}

impl RequestKind {
    fn as_str(self) -> &'static str {
        match self {
            RequestKind::Resource => "resource",
            RequestKind::Aid => "aid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    fn status(self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }

    fn message(self, request_id: i32) -> String {
        match self {
            Decision::Approved => format!("Your request #{request_id} has been approved."),
            Decision::Rejected => format!("Your request #{request_id} has been rejected."),
        }
    }
}

const PENDING: &str = "pending";

/// Staff see every request, everyone else only their own.
async fn list(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
) -> AppResult<Json<Vec<AidRequest>>> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let mut query = aid_requests::table.into_boxed();
    if !viewer.is_moderator() {
        query = query.filter(aid_requests::requested_by.eq(viewer.id));
    }
    let requests = query
        .order(aid_requests::requested_at.desc())
        .load::<AidRequest>(conn)
        .await?;

    Ok(Json(requests))
}

#[derive(Deserialize, Validate)]
struct NewRequest {
    kind: RequestKind,
    #[validate(length(min = 1, max = 2000))]
    description: String,
}

async fn create(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewRequest>,
) -> AppResult<Json<AidRequest>> {
    #[derive(Insertable)]
    #[diesel(table_name = aid_requests)]
    struct NewAidRequest {
        kind: &'static str,
        description: String,
        requested_by: i32,
    }

    error::validate(&req)?;
    let conn = &mut pool.get().await?;

    let request = diesel::insert_into(aid_requests::table)
        .values(NewAidRequest {
            kind: req.kind.as_str(),
            description: req.description.trim().to_string(),
            requested_by: user.id,
        })
        .get_result::<AidRequest>(conn)
        .await?;

    tracing::info!(request_id = request.id, kind = req.kind.as_str(), by = user.id, "filed aid request");
    Ok(Json(request))
}

async fn decide(
    pool: DbPool,
    user: CurrentUser,
    request_id: i32,
    decision: Decision,
) -> AppResult<Json<AidRequest>> {
    let viewer = user.viewer();
    require(viewer.is_moderator(), "staff access required")?;
    let conn = &mut pool.get().await?;

    let request = diesel::update(
        aid_requests::table
            .find(request_id)
            .filter(aid_requests::status.eq(PENDING)),
    )
    .set(aid_requests::status.eq(decision.status()))
    .get_result::<AidRequest>(conn)
    .await
    .optional()?;

    let Some(request) = request else {
        let exists = diesel::select(diesel::dsl::exists(aid_requests::table.find(request_id)))
            .get_result::<bool>(conn)
            .await?;
        return Err(if exists {
            AppError::conflict("this request has already been handled")
        } else {
            AppError::not_found("the request does not exist")
        });
    };

    notify::send(
        conn,
        NewNotification::new(
            request.requested_by,
            NotificationKind::Request,
            decision.message(request.id),
        )
        .from_actor(viewer.id),
    )
    .await?;

    tracing::info!(request_id, status = decision.status(), by = viewer.id, "decided aid request");
    Ok(Json(request))
}

async fn approve(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(request_id): Path<i32>,
) -> AppResult<Json<AidRequest>> {
    decide(pool, user, request_id, Decision::Approved).await
}

async fn reject(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(request_id): Path<i32>,
) -> AppResult<Json<AidRequest>> {
    decide(pool, user, request_id, Decision::Rejected).await
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:request_id/approve", post(approve))
        .route("/:request_id/reject", post(reject))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_map_to_stored_statuses() {
        assert_eq!(Decision::Approved.status(), "approved");
        assert_eq!(Decision::Rejected.status(), "rejected");
        assert!(Decision::Rejected.message(7).contains("#7"));
    }

    #[test]
    fn request_kind_parses_lowercase() {
        let kind: RequestKind = serde_json::from_str("\"aid\"").unwrap();
        assert_eq!(kind, RequestKind::Aid);
        assert!(serde_json::from_str::<RequestKind>("\"Aid\"").is_err());
    }
}
