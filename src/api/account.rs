use crate::{
    auth::CurrentUser,
    error::{self, AppResult},
    models::{Badge, Event, User},
    rules::event::EventStatus,
    schema::*,
    DbPool,
};
use axum::{routing::get, Extension, Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    id: i32,
    username: String,
    email: String,
    phone: Option<String>,
    address: Option<String>,
    is_staff: bool,
    is_superuser: bool,
    email_verified: bool,
    date_joined: DateTime<Utc>,
    badges: Vec<EarnedBadge>,
}

impl Profile {
    fn new(user: User, badges: Vec<EarnedBadge>) -> Self {
        Profile {
            id: user.id,
            username: user.username,
            email: user.email,
            phone: user.phone,
            address: user.address,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            email_verified: user.email_verified,
            date_joined: user.date_joined,
            badges,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EarnedBadge {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub awarded_at: DateTime<Utc>,
}

/// Most recently awarded first.
async fn load_badges(conn: &mut AsyncPgConnection, user_id: i32) -> QueryResult<Vec<EarnedBadge>> {
    Ok(user_badges::table
        .inner_join(badges::table)
        .filter(user_badges::user_id.eq(user_id))
        .order(user_badges::awarded_at.desc())
        .select((badges::all_columns, user_badges::awarded_at))
        .load::<(Badge, DateTime<Utc>)>(conn)
        .await?
        .into_iter()
        .map(|(badge, awarded_at)| EarnedBadge {
            id: badge.id,
            name: badge.name,
            description: badge.description,
            icon: badge.icon,
            awarded_at,
        })
        .collect())
}

async fn me(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Profile>> {
    let conn = &mut pool.get().await?;
    let badges = load_badges(conn, user.id).await?;
    Ok(Json(Profile::new(user, badges)))
}

#[derive(Deserialize, Validate)]
struct ProfileUpdateRequest {
    #[validate(email)]
    email: Option<String>,
    #[validate(length(max = 30))]
    phone: Option<String>,
    #[validate(length(max = 255))]
    address: Option<String>,
}

async fn edit_me(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ProfileUpdateRequest>,
) -> AppResult<Json<Profile>> {
    #[derive(AsChangeset)]
    #[diesel(table_name = users)]
    struct ProfileEdit {
        email: Option<String>,
        phone: Option<String>,
        address: Option<String>,
        email_verified: Option<bool>,
    }

    error::validate(&req)?;
    let conn = &mut pool.get().await?;
    let badges = load_badges(conn, user.id).await?;

    let email = req.email.map(|e| e.trim().to_string());
    let email_changed = email.as_deref().map_or(false, |e| e != user.email);
    if req.phone.is_none() && req.address.is_none() && !email_changed {
        return Ok(Json(Profile::new(user, badges)));
    }

    let user = diesel::update(users::table.find(user.id))
        .set(ProfileEdit {
            email: email.filter(|_| email_changed),
            phone: req.phone,
            address: req.address,
            email_verified: email_changed.then_some(false),
        })
        .get_result::<User>(conn)
        .await?;

    Ok(Json(Profile::new(user, badges)))
}

/// Deactivates the account. Content the user wrote stays in place; clubs
/// the user was responsible for are left without a responsible.
async fn delete_me(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    diesel::update(users::table.find(user.id))
        .set(users::is_active.eq(false))
        .execute(conn)
        .await?;
    diesel::update(memberships::table.filter(memberships::user_id.eq(user.id)))
        .set(memberships::active.eq(false))
        .execute(conn)
        .await?;
    let orphaned = diesel::update(clubs::table.filter(clubs::responsible_id.eq(user.id)))
        .set((
            clubs::responsible_id.eq(None::<i32>),
            clubs::updated_at.eq(Utc::now()),
        ))
        .execute(conn)
        .await?;

    tracing::info!(user_id = user.id, orphaned, "account deleted");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ClubSummary {
    pub id: i32,
    pub name: String,
    pub role: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpcomingEvent {
    pub id: i32,
    pub title: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Dashboard {
    pub clubs: Vec<ClubSummary>,
    pub upcoming_events: Vec<UpcomingEvent>,
    pub badges: Vec<EarnedBadge>,
    pub registrations: i64,
    pub attended: i64,
    pub contributions: i64,
}

/// Threads, posts, surveys and submitted documents all count as
/// contributions.
async fn count_contributions(conn: &mut AsyncPgConnection, user_id: i32) -> QueryResult<i64> {
    let threads = threads::table
        .filter(threads::author_id.eq(user_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let posts = posts::table
        .filter(posts::author_id.eq(user_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let surveys = surveys::table
        .filter(surveys::author_id.eq(user_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let resources = resources::table
        .filter(resources::submitted_by.eq(user_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let aids = aids::table
        .filter(aids::submitted_by.eq(user_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    Ok(threads + posts + surveys + resources + aids)
}

pub(super) async fn load_dashboard(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> AppResult<Dashboard> {
    let clubs = memberships::table
        .inner_join(clubs::table)
        .filter(memberships::user_id.eq(user_id))
        .filter(memberships::active.eq(true))
        .order(clubs::name.asc())
        .select((clubs::id, clubs::name, memberships::role))
        .load::<(i32, String, String)>(conn)
        .await?
        .into_iter()
        .map(|(id, name, role)| ClubSummary { id, name, role })
        .collect();

    let upcoming_events = participations::table
        .inner_join(events::table)
        .filter(participations::user_id.eq(user_id))
        .filter(events::starts_at.gt(Utc::now()))
        .filter(events::status.ne(EventStatus::Cancelled.as_str()))
        .order(events::starts_at.asc())
        .select(events::all_columns)
        .load::<Event>(conn)
        .await?
        .into_iter()
        .map(|event| UpcomingEvent {
            id: event.id,
            title: event.title,
            location: event.location,
            starts_at: event.starts_at,
        })
        .collect();

    let registrations = participations::table
        .filter(participations::user_id.eq(user_id))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let attended = participations::table
        .filter(participations::user_id.eq(user_id))
        .filter(participations::attended.eq(true))
        .count()
        .get_result::<i64>(conn)
        .await?;

    Ok(Dashboard {
        clubs,
        upcoming_events,
        badges: load_badges(conn, user_id).await?,
        registrations,
        attended,
        contributions: count_contributions(conn, user_id).await?,
    })
}

async fn dashboard(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Dashboard>> {
    let conn = &mut pool.get().await?;
    Ok(Json(load_dashboard(conn, user.id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MembershipEntry {
    club_id: i32,
    club_name: String,
    role: String,
    active: bool,
    joined_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipationEntry {
    event_id: i32,
    title: String,
    starts_at: DateTime<Utc>,
    registered_at: DateTime<Utc>,
    attended: bool,
}

#[derive(Serialize)]
struct History {
    memberships: Vec<MembershipEntry>,
    participations: Vec<ParticipationEntry>,
    badges: Vec<EarnedBadge>,
}

/// Everything the user has been part of, left clubs included, newest first.
async fn history(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<History>> {
    let conn = &mut pool.get().await?;

    let memberships = memberships::table
        .inner_join(clubs::table)
        .filter(memberships::user_id.eq(user.id))
        .order(memberships::joined_at.desc())
        .select((
            clubs::id,
            clubs::name,
            memberships::role,
            memberships::active,
            memberships::joined_at,
        ))
        .load::<(i32, String, String, bool, DateTime<Utc>)>(conn)
        .await?
        .into_iter()
        .map(|(club_id, club_name, role, active, joined_at)| MembershipEntry {
            club_id,
            club_name,
            role,
            active,
            joined_at,
        })
        .collect();

    let participations = participations::table
        .inner_join(events::table)
        .filter(participations::user_id.eq(user.id))
        .order(participations::registered_at.desc())
        .select((
            events::id,
            events::title,
            events::starts_at,
            participations::registered_at,
            participations::attended,
        ))
        .load::<(i32, String, DateTime<Utc>, DateTime<Utc>, bool)>(conn)
        .await?
        .into_iter()
        .map(
            |(event_id, title, starts_at, registered_at, attended)| ParticipationEntry {
                event_id,
                title,
                starts_at,
                registered_at,
                attended,
            },
        )
        .collect();

    Ok(Json(History {
        memberships,
        participations,
        badges: load_badges(conn, user.id).await?,
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/me", get(me).put(edit_me).delete(delete_me))
        .route("/dashboard", get(dashboard))
        .route("/history", get(history))
}
