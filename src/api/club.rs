use crate::{
    access::{self, require},
    auth::{AdminOnly, CurrentUser},
    error::{self, AppError, AppResult},
    models::{Club, Membership},
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::{prelude::*, upsert::excluded};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClubResponse {
    id: i32,
    name: String,
    description: String,
    responsible_id: Option<i32>,
    responsible_name: Option<String>,
    member_count: usize,
    created_at: DateTime<Utc>,
}

async fn load_clubs(
    conn: &mut AsyncPgConnection,
    clubs: Vec<Club>,
) -> AppResult<Vec<ClubResponse>> {
    let club_ids = clubs.iter().map(|c| c.id).collect::<Vec<_>>();
    let member_counts = memberships::table
        .filter(memberships::club_id.eq_any(&club_ids))
        .filter(memberships::active.eq(true))
        .select(memberships::club_id)
        .load::<i32>(conn)
        .await?
        .into_iter()
        .counts();

    let responsibles = HashMap::<i32, String>::from_iter(
        users::table
            .filter(users::id.eq_any(clubs.iter().filter_map(|c| c.responsible_id)))
            .select((users::id, users::username))
            .load::<(i32, String)>(conn)
            .await?,
    );

    Ok(clubs
        .into_iter()
        .map(|club| ClubResponse {
            id: club.id,
            member_count: member_counts.get(&club.id).copied().unwrap_or(0),
            responsible_name: club
                .responsible_id
                .and_then(|id| responsibles.get(&id).cloned()),
            name: club.name,
            description: club.description,
            responsible_id: club.responsible_id,
            created_at: club.created_at,
        })
        .collect())
}

async fn load_club(conn: &mut AsyncPgConnection, club: Club) -> AppResult<ClubResponse> {
    Ok(load_clubs(conn, vec![club])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_clubs` should return one club"))?)
}

async fn list(Extension(pool): Extension<DbPool>) -> AppResult<Json<Vec<ClubResponse>>> {
    let conn = &mut pool.get().await?;

    let clubs = clubs::table
        .order(clubs::name.asc())
        .load::<Club>(conn)
        .await?;

    Ok(Json(load_clubs(conn, clubs).await?))
}

async fn info(
    Extension(pool): Extension<DbPool>,
    Path(club_id): Path<i32>,
) -> AppResult<Json<ClubResponse>> {
    let conn = &mut pool.get().await?;

    let club = access::load_club(conn, club_id).await?;

    Ok(Json(load_club(conn, club).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct NewClubRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[serde(default)]
    description: String,
    responsible_id: Option<i32>,
}

async fn create(
    Extension(pool): Extension<DbPool>,
    AdminOnly(admin): AdminOnly,
    Json(req): Json<NewClubRequest>,
) -> AppResult<Json<ClubResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = clubs)]
    struct NewClub {
        name: String,
        description: String,
        responsible_id: Option<i32>,
    }

    error::validate(&req)?;
    let conn = &mut pool.get().await?;

    let club = diesel::insert_into(clubs::table)
        .values(NewClub {
            name: req.name.trim().to_string(),
            description: req.description,
            responsible_id: req.responsible_id,
        })
        .on_conflict(clubs::name)
        .do_nothing()
        .get_result::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::conflict("a club with this name already exists"))?;

    tracing::info!(club_id = club.id, by = admin.id, "created club");
    Ok(Json(load_club(conn, club).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ClubUpdateRequest {
    #[validate(length(min = 1, max = 100))]
    name: Option<String>,
    description: Option<String>,
}

async fn edit(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Path(club_id): Path<i32>,
    Json(req): Json<ClubUpdateRequest>,
) -> AppResult<Json<ClubResponse>> {
    #[derive(AsChangeset)]
    #[diesel(table_name = clubs)]
    struct ClubEdit {
        name: Option<String>,
        description: Option<String>,
        updated_at: DateTime<Utc>,
    }

    error::validate(&req)?;
    let conn = &mut pool.get().await?;

    let club = access::load_club(conn, club_id).await?;
    require(
        user.is_superuser || club.responsible_id == Some(user.id),
        "only the club's responsible can edit it",
    )?;

    let club = diesel::update(clubs::table.find(club_id))
        .set(ClubEdit {
            name: req.name.map(|n| n.trim().to_string()),
            description: req.description,
            updated_at: Utc::now(),
        })
        .get_result::<Club>(conn)
        .await
        .map_err(|e| {
            if error::is_unique_violation(&e) {
                AppError::conflict("a club with this name already exists")
            } else {
                e.into()
            }
        })?;

    Ok(Json(load_club(conn, club).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsibleRequest {
    user_id: Option<i32>,
}

async fn set_responsible(
    Extension(pool): Extension<DbPool>,
    AdminOnly(_): AdminOnly,
    Path(club_id): Path<i32>,
    Json(req): Json<ResponsibleRequest>,
) -> AppResult<Json<ClubResponse>> {
    let conn = &mut pool.get().await?;

    if let Some(user_id) = req.user_id {
        let active = diesel::select(diesel::dsl::exists(
            users::table.find(user_id).filter(users::is_active.eq(true)),
        ))
        .get_result::<bool>(conn)
        .await?;
        if !active {
            return Err(AppError::not_found("no active user with this id"));
        }
    }

    let club = diesel::update(clubs::table.find(club_id))
        .set((
            clubs::responsible_id.eq(req.user_id),
            clubs::updated_at.eq(Utc::now()),
        ))
        .get_result::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the club does not exist"))?;

    Ok(Json(load_club(conn, club).await?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    AdminOnly(_): AdminOnly,
    Path(club_id): Path<i32>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    let deleted = diesel::delete(clubs::table.find(club_id))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(AppError::not_found("the club does not exist"));
    }
    Ok(())
}

async fn join(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Path(club_id): Path<i32>,
) -> AppResult<Json<Membership>> {
    #[derive(Insertable)]
    #[diesel(table_name = memberships)]
    struct NewMembership {
        user_id: i32,
        club_id: i32,
        active: bool,
    }

    let conn = &mut pool.get().await?;
    access::load_club(conn, club_id).await?;

    let membership = diesel::insert_into(memberships::table)
        .values(NewMembership {
            user_id: user.id,
            club_id,
            active: true,
        })
        .on_conflict((memberships::user_id, memberships::club_id))
        .do_update()
        .set(memberships::active.eq(excluded(memberships::active)))
        .get_result::<Membership>(conn)
        .await?;

    tracing::info!(user_id = user.id, club_id, "joined club");
    Ok(Json(membership))
}

async fn deactivate(conn: &mut AsyncPgConnection, user_id: i32, club_id: i32) -> AppResult<()> {
    let updated = diesel::update(
        memberships::table
            .filter(memberships::user_id.eq(user_id))
            .filter(memberships::club_id.eq(club_id))
            .filter(memberships::active.eq(true)),
    )
    .set(memberships::active.eq(false))
    .execute(conn)
    .await?;
    if updated == 0 {
        return Err(AppError::not_found("no active membership in this club"));
    }
    Ok(())
}

async fn leave(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Path(club_id): Path<i32>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;
    deactivate(conn, user.id, club_id).await?;
    tracing::info!(user_id = user.id, club_id, "left club");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberResponse {
    user_id: i32,
    username: String,
    role: String,
    joined_at: DateTime<Utc>,
}

async fn members(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Path(club_id): Path<i32>,
) -> AppResult<Json<Vec<MemberResponse>>> {
    let conn = &mut pool.get().await?;

    let club = access::load_club(conn, club_id).await?;
    require(
        user.is_superuser || club.responsible_id == Some(user.id),
        "only the club's responsible can list its members",
    )?;

    let members = memberships::table
        .inner_join(users::table)
        .filter(memberships::club_id.eq(club_id))
        .filter(memberships::active.eq(true))
        .order(memberships::joined_at.asc())
        .select((users::id, users::username, memberships::role, memberships::joined_at))
        .load::<(i32, String, String, DateTime<Utc>)>(conn)
        .await?
        .into_iter()
        .map(|(user_id, username, role, joined_at)| MemberResponse {
            user_id,
            username,
            role,
            joined_at,
        })
        .collect();

    Ok(Json(members))
}

async fn remove_member(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Path((club_id, member_id)): Path<(i32, i32)>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    let club = access::load_club(conn, club_id).await?;
    require(
        user.is_superuser || club.responsible_id == Some(user.id),
        "only the club's responsible can remove members",
    )?;

    deactivate(conn, member_id, club_id).await?;
    tracing::info!(club_id, member_id, by = user.id, "removed member");
    Ok(())
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:club_id", get(info).put(edit).delete(remove))
        .route("/:club_id/responsible", put(set_responsible))
        .route("/:club_id/join", post(join))
        .route("/:club_id/leave", post(leave))
        .route("/:club_id/members", get(members))
        .route("/:club_id/members/:user_id", delete(remove_member))
}
