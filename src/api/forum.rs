use super::{survey, thread};
use crate::{
    access::{self, require, ForumContext},
    auth::{CurrentUser, MaybeUser},
    error::{self, AppError, AppResult},
    models::Forum,
    rules::{
        forum::{self as rules, Capabilities, ForumKind},
        Viewer, Visibility,
    },
    schema::*,
    DbPool,
};
use axum::{extract::Path, routing::get, Extension, Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ForumResponse {
    id: i32,
    title: String,
    description: String,
    visibility: String,
    club_id: Option<i32>,
    club_name: Option<String>,
    created_by: i32,
    thread_count: usize,
    survey_count: usize,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<Capabilities>,
}

async fn load_forums(
    conn: &mut AsyncPgConnection,
    forums: Vec<Forum>,
) -> AppResult<Vec<ForumResponse>> {
    let forum_ids = forums.iter().map(|f| f.id).collect::<Vec<_>>();
    let thread_counts = threads::table
        .filter(threads::forum_id.eq_any(&forum_ids))
        .select(threads::forum_id)
        .load::<i32>(conn)
        .await?
        .into_iter()
        .counts();
    let survey_counts = surveys::table
        .filter(surveys::forum_id.eq_any(&forum_ids))
        .select(surveys::forum_id)
        .load::<i32>(conn)
        .await?
        .into_iter()
        .counts();
    let club_names = HashMap::<i32, String>::from_iter(
        clubs::table
            .filter(clubs::id.eq_any(forums.iter().filter_map(|f| f.club_id)))
            .select((clubs::id, clubs::name))
            .load::<(i32, String)>(conn)
            .await?,
    );

    Ok(forums
        .into_iter()
        .map(|forum| ForumResponse {
            id: forum.id,
            thread_count: thread_counts.get(&forum.id).copied().unwrap_or(0),
            survey_count: survey_counts.get(&forum.id).copied().unwrap_or(0),
            club_name: forum.club_id.and_then(|id| club_names.get(&id).cloned()),
            title: forum.title,
            description: forum.description,
            visibility: forum.visibility,
            club_id: forum.club_id,
            created_by: forum.created_by,
            created_at: forum.created_at,
            capabilities: None,
        })
        .collect())
}

async fn load_forum_response(
    conn: &mut AsyncPgConnection,
    ctx: ForumContext,
) -> AppResult<ForumResponse> {
    let caps = ctx.caps;
    let mut response = load_forums(conn, vec![ctx.forum])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_forums` should return one forum"))?;
    response.capabilities = Some(caps);
    Ok(response)
}

async fn list(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
) -> AppResult<Json<Vec<ForumResponse>>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let forums = access::visible_forums(conn, viewer.as_ref())
        .await?
        .order(forums::title.asc())
        .load::<Forum>(conn)
        .await?;

    Ok(Json(load_forums(conn, forums).await?))
}

async fn info(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Path(forum_id): Path<i32>,
) -> AppResult<Json<ForumResponse>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let ctx = access::load_forum(conn, forum_id, viewer.as_ref()).await?;
    ctx.require_read()?;

    Ok(Json(load_forum_response(conn, ctx).await?))
}

fn forum_kind(visibility: Visibility, club_id: Option<i32>) -> AppResult<ForumKind> {
    ForumKind::from_parts(visibility, club_id)
        .map_err(|e| AppError::invalid_field("club_id", e.message()))
}

/// Checks that `viewer` may place a forum of this kind, and that the club
/// does not already own a forum other than `current`.
async fn check_placement(
    conn: &mut AsyncPgConnection,
    kind: ForumKind,
    viewer: &Viewer,
    current: Option<i32>,
) -> AppResult<()> {
    let Some(club_id) = kind.club_id() else {
        return Ok(());
    };
    let club = access::load_club(conn, club_id).await?;
    require(
        rules::can_create(kind, viewer, club.responsible_id),
        "only the club's responsible can open its private forum",
    )?;

    let existing = forums::table
        .filter(forums::club_id.eq(club_id))
        .select(forums::id)
        .first::<i32>(conn)
        .await
        .optional()?;
    match existing {
        Some(id) if Some(id) != current => Err(AppError::conflict("this club already has a forum")),
        _ => Ok(()),
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct NewForumRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    description: String,
    visibility: Visibility,
    club_id: Option<i32>,
}

async fn create(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Json(req): Json<NewForumRequest>,
) -> AppResult<Json<ForumResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = forums)]
    struct NewForum {
        title: String,
        description: String,
        visibility: &'static str,
        club_id: Option<i32>,
        created_by: i32,
    }

    error::validate(&req)?;
    let kind = forum_kind(req.visibility, req.club_id)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    check_placement(conn, kind, &viewer, None).await?;

    let forum = diesel::insert_into(forums::table)
        .values(NewForum {
            title: req.title.trim().to_string(),
            description: req.description,
            visibility: kind.visibility().as_str(),
            club_id: kind.club_id(),
            created_by: viewer.id,
        })
        .get_result::<Forum>(conn)
        .await
        .map_err(|e| {
            if error::is_unique_violation(&e) {
                AppError::conflict("this club already has a forum")
            } else {
                e.into()
            }
        })?;

    tracing::info!(
        forum_id = forum.id,
        visibility = %kind.visibility(),
        club_id = ?kind.club_id(),
        by = viewer.id,
        "created forum"
    );
    let ctx = access::forum_context(conn, forum, Some(&viewer)).await?;
    Ok(Json(load_forum_response(conn, ctx).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ForumUpdateRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    description: Option<String>,
    visibility: Option<Visibility>,
    /// Only read when `visibility` is given.
    club_id: Option<i32>,
}

async fn edit(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(forum_id): Path<i32>,
    Json(req): Json<ForumUpdateRequest>,
) -> AppResult<Json<ForumResponse>> {
    #[derive(AsChangeset)]
    #[diesel(table_name = forums)]
    #[diesel(treat_none_as_null = true)]
    struct ForumPlacement {
        visibility: &'static str,
        club_id: Option<i32>,
    }

    #[derive(AsChangeset)]
    #[diesel(table_name = forums)]
    struct ForumEdit {
        title: Option<String>,
        description: Option<String>,
        updated_at: DateTime<Utc>,
    }

    error::validate(&req)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let ctx = access::load_forum(conn, forum_id, Some(&viewer)).await?;
    ctx.require_manage()?;

    if let Some(visibility) = req.visibility {
        let kind = forum_kind(visibility, req.club_id)?;
        if kind != ctx.kind {
            check_placement(conn, kind, &viewer, Some(forum_id)).await?;
            diesel::update(forums::table.find(forum_id))
                .set(ForumPlacement {
                    visibility: kind.visibility().as_str(),
                    club_id: kind.club_id(),
                })
                .execute(conn)
                .await
                .map_err(|e| {
                    if error::is_unique_violation(&e) {
                        AppError::conflict("this club already has a forum")
                    } else {
                        e.into()
                    }
                })?;
            tracing::info!(forum_id, visibility = %kind.visibility(), "moved forum");
        }
    }

    let forum = diesel::update(forums::table.find(forum_id))
        .set(ForumEdit {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            updated_at: Utc::now(),
        })
        .get_result::<Forum>(conn)
        .await?;

    let ctx = access::forum_context(conn, forum, Some(&viewer)).await?;
    Ok(Json(load_forum_response(conn, ctx).await?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(forum_id): Path<i32>,
) -> AppResult<()> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let ctx = access::load_forum(conn, forum_id, Some(&viewer)).await?;
    ctx.require_manage()?;

    diesel::delete(forums::table.find(forum_id))
        .execute(conn)
        .await?;
    tracing::info!(forum_id, by = viewer.id, "deleted forum");
    Ok(())
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:forum_id", get(info).put(edit).delete(remove))
        .route(
            "/:forum_id/threads",
            get(thread::list_in_forum).post(thread::create),
        )
        .route(
            "/:forum_id/surveys",
            get(survey::list_in_forum).post(survey::create),
        )
}
