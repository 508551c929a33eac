//! Superuser listings of every table, newest first, plus account flags.

use crate::{
    access::require,
    auth::AdminOnly,
    error::{self, AppError, AppResult},
    models::{Aid, Badge, Club, Event, Forum, Resource, Survey, Thread, User, UserBadge},
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminUser {
    id: i32,
    username: String,
    email: String,
    is_superuser: bool,
    is_staff: bool,
    is_active: bool,
    email_verified: bool,
    date_joined: DateTime<Utc>,
}

impl From<User> for AdminUser {
    fn from(user: User) -> Self {
        AdminUser {
            id: user.id,
            username: user.username,
            email: user.email,
            is_superuser: user.is_superuser,
            is_staff: user.is_staff,
            is_active: user.is_active,
            email_verified: user.email_verified,
            date_joined: user.date_joined,
        }
    }
}

async fn users(
    Extension(pool): Extension<DbPool>,
    _: AdminOnly,
) -> AppResult<Json<Vec<AdminUser>>> {
    let conn = &mut pool.get().await?;
    let users = users::table
        .order(users::date_joined.desc())
        .load::<User>(conn)
        .await?;
    Ok(Json(users.into_iter().map(AdminUser::from).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFlagsRequest {
    is_staff: Option<bool>,
    is_superuser: Option<bool>,
    is_active: Option<bool>,
}

async fn edit_user(
    Extension(pool): Extension<DbPool>,
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<i32>,
    Json(req): Json<UserFlagsRequest>,
) -> AppResult<Json<AdminUser>> {
    #[derive(AsChangeset)]
    #[diesel(table_name = users)]
    struct UserFlags {
        is_staff: Option<bool>,
        is_superuser: Option<bool>,
        is_active: Option<bool>,
    }

    require(admin.id != user_id, "you cannot change your own account flags")?;
    let conn = &mut pool.get().await?;

    let flags = UserFlags {
        is_staff: req.is_staff,
        is_superuser: req.is_superuser,
        is_active: req.is_active,
    };
    let user = if flags.is_staff.is_none() && flags.is_superuser.is_none() && flags.is_active.is_none() {
        users::table.find(user_id).first::<User>(conn).await
    } else {
        diesel::update(users::table.find(user_id))
            .set(flags)
            .get_result::<User>(conn)
            .await
    }
    .optional()?
    .ok_or_else(|| AppError::not_found("the user does not exist"))?;

    tracing::info!(
        user_id,
        by = admin.id,
        is_staff = user.is_staff,
        is_superuser = user.is_superuser,
        is_active = user.is_active,
        "updated account flags"
    );
    Ok(Json(user.into()))
}

async fn clubs(Extension(pool): Extension<DbPool>, _: AdminOnly) -> AppResult<Json<Vec<Club>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        clubs::table
            .order(clubs::created_at.desc())
            .load::<Club>(conn)
            .await?,
    ))
}

async fn events(Extension(pool): Extension<DbPool>, _: AdminOnly) -> AppResult<Json<Vec<Event>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        events::table
            .order(events::starts_at.desc())
            .load::<Event>(conn)
            .await?,
    ))
}

async fn forums(Extension(pool): Extension<DbPool>, _: AdminOnly) -> AppResult<Json<Vec<Forum>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        forums::table
            .order(forums::created_at.desc())
            .load::<Forum>(conn)
            .await?,
    ))
}

async fn threads(Extension(pool): Extension<DbPool>, _: AdminOnly) -> AppResult<Json<Vec<Thread>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        threads::table
            .order(threads::created_at.desc())
            .load::<Thread>(conn)
            .await?,
    ))
}

async fn surveys(Extension(pool): Extension<DbPool>, _: AdminOnly) -> AppResult<Json<Vec<Survey>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        surveys::table
            .order(surveys::created_at.desc())
            .load::<Survey>(conn)
            .await?,
    ))
}

async fn resources(
    Extension(pool): Extension<DbPool>,
    _: AdminOnly,
) -> AppResult<Json<Vec<Resource>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        resources::table
            .order(resources::submitted_at.desc())
            .load::<Resource>(conn)
            .await?,
    ))
}

async fn aids(Extension(pool): Extension<DbPool>, _: AdminOnly) -> AppResult<Json<Vec<Aid>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        aids::table
            .order(aids::submitted_at.desc())
            .load::<Aid>(conn)
            .await?,
    ))
}

async fn badges(Extension(pool): Extension<DbPool>, _: AdminOnly) -> AppResult<Json<Vec<Badge>>> {
    let conn = &mut pool.get().await?;
    Ok(Json(
        badges::table
            .order(badges::name.asc())
            .load::<Badge>(conn)
            .await?,
    ))
}

#[derive(Deserialize, Validate)]
struct BadgeRequest {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    icon: String,
}

async fn create_badge(
    Extension(pool): Extension<DbPool>,
    _: AdminOnly,
    Json(req): Json<BadgeRequest>,
) -> AppResult<Json<Badge>> {
    #[derive(Insertable)]
    #[diesel(table_name = badges)]
    struct NewBadge {
        name: String,
        description: String,
        icon: String,
    }

    error::validate(&req)?;
    let conn = &mut pool.get().await?;

    let badge = diesel::insert_into(badges::table)
        .values(NewBadge {
            name: req.name.trim().to_string(),
            description: req.description,
            icon: req.icon,
        })
        .on_conflict(badges::name)
        .do_nothing()
        .get_result::<Badge>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::conflict("a badge with this name already exists"))?;

    Ok(Json(badge))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AwardRequest {
    badge_id: i32,
}

/// Awarding a badge the user already holds keeps the original award date.
async fn award_badge(
    Extension(pool): Extension<DbPool>,
    AdminOnly(admin): AdminOnly,
    Path(user_id): Path<i32>,
    Json(req): Json<AwardRequest>,
) -> AppResult<Json<Badge>> {
    #[derive(Insertable)]
    #[diesel(table_name = user_badges)]
    struct NewUserBadge {
        user_id: i32,
        badge_id: i32,
    }

    let conn = &mut pool.get().await?;

    users::table
        .find(user_id)
        .select(users::id)
        .first::<i32>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the user does not exist"))?;
    let badge = badges::table
        .find(req.badge_id)
        .first::<Badge>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the badge does not exist"))?;

    let awarded = diesel::insert_into(user_badges::table)
        .values(NewUserBadge {
            user_id,
            badge_id: badge.id,
        })
        .on_conflict((user_badges::user_id, user_badges::badge_id))
        .do_nothing()
        .get_result::<UserBadge>(conn)
        .await
        .optional()?;

    if awarded.is_some() {
        tracing::info!(user_id, badge_id = badge.id, by = admin.id, "badge awarded");
    }
    Ok(Json(badge))
}

async fn revoke_badge(
    Extension(pool): Extension<DbPool>,
    _: AdminOnly,
    Path((user_id, badge_id)): Path<(i32, i32)>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    let deleted = diesel::delete(
        user_badges::table
            .filter(user_badges::user_id.eq(user_id))
            .filter(user_badges::badge_id.eq(badge_id)),
    )
    .execute(conn)
    .await?;
    if deleted == 0 {
        return Err(AppError::not_found("the user does not hold this badge"));
    }
    Ok(())
}

pub fn app() -> Router {
    Router::new()
        .route("/users", get(users))
        .route("/users/:user_id", put(edit_user))
        .route("/users/:user_id/badges", post(award_badge))
        .route("/users/:user_id/badges/:badge_id", delete(revoke_badge))
        .route("/badges", get(badges).post(create_badge))
        .route("/clubs", get(clubs))
        .route("/events", get(events))
        .route("/forums", get(forums))
        .route("/threads", get(threads))
        .route("/surveys", get(surveys))
        .route("/resources", get(resources))
        .route("/aids", get(aids))
}
