use crate::{
    access::{self, require},
    auth::{CurrentUser, MaybeUser},
    error::{self, AppError, AppResult},
    models::{Event, Participation},
    rules::{
        event::{self as rules, EventStatus, Registration, RegistrationError},
        Viewer, Visibility,
    },
    schema::*,
    uploads::{self, UploadKind},
    DbPool,
};
use axum::{
    extract::{Path, Query},
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::{dsl::exists, prelude::*};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

const CALENDAR_SIZE: i64 = 10;
const FEATURED_SIZE: i64 = 6;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventResponse {
    id: i32,
    club_id: Option<i32>,
    title: String,
    description: String,
    location: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    duration_minutes: i64,
    status: String,
    visibility: String,
    max_participants: i32,
    participant_count: usize,
    is_full: bool,
    is_registered: bool,
    featured: bool,
    promotion_image: Option<String>,
    promotion_description: Option<String>,
    created_by: i32,
}

async fn load_events(
    conn: &mut AsyncPgConnection,
    events: Vec<Event>,
    viewer: Option<&Viewer>,
) -> AppResult<Vec<EventResponse>> {
    let event_ids = events.iter().map(|e| e.id).collect::<Vec<_>>();
    let registrations = participations::table
        .filter(participations::event_id.eq_any(&event_ids))
        .select((participations::event_id, participations::user_id))
        .load::<(i32, i32)>(conn)
        .await?;
    let counts = registrations.iter().map(|(event_id, _)| *event_id).counts();
    let mine = registrations
        .iter()
        .filter(|(_, user_id)| viewer.map_or(false, |v| v.id == *user_id))
        .map(|(event_id, _)| *event_id)
        .collect::<HashSet<_>>();

    Ok(events
        .into_iter()
        .map(|event| {
            let participant_count = counts.get(&event.id).copied().unwrap_or(0);
            EventResponse {
                id: event.id,
                club_id: event.club_id,
                duration_minutes: event.duration().num_minutes(),
                participant_count,
                is_full: participant_count >= event.max_participants as usize,
                is_registered: mine.contains(&event.id),
                promotion_image: event.promotion_image.as_deref().map(uploads::media_url),
                title: event.title,
                description: event.description,
                location: event.location,
                starts_at: event.starts_at,
                ends_at: event.ends_at,
                status: event.status,
                visibility: event.visibility,
                max_participants: event.max_participants,
                featured: event.featured,
                promotion_description: event.promotion_description,
                created_by: event.created_by,
            }
        })
        .collect())
}

async fn load_event_response(
    conn: &mut AsyncPgConnection,
    event: Event,
    viewer: Option<&Viewer>,
) -> AppResult<EventResponse> {
    Ok(load_events(conn, vec![event], viewer)
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_events` should return one event"))?)
}

async fn load_event(conn: &mut AsyncPgConnection, event_id: i32) -> AppResult<Event> {
    events::table
        .find(event_id)
        .first::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the event does not exist"))
}

async fn club_responsible(
    conn: &mut AsyncPgConnection,
    club_id: Option<i32>,
) -> AppResult<Option<i32>> {
    let Some(club_id) = club_id else {
        return Ok(None);
    };
    Ok(clubs::table
        .find(club_id)
        .select(clubs::responsible_id)
        .first::<Option<i32>>(conn)
        .await
        .optional()?
        .flatten())
}

async fn require_manager(
    conn: &mut AsyncPgConnection,
    event: &Event,
    viewer: &Viewer,
) -> AppResult<()> {
    let responsible = club_responsible(conn, event.club_id).await?;
    require(
        rules::can_manage(viewer, responsible),
        "only the event's organizers can do this",
    )
}

async fn require_view(
    conn: &mut AsyncPgConnection,
    event: &Event,
    viewer: Option<&Viewer>,
) -> AppResult<()> {
    let visibility = event.visibility.parse::<Visibility>()?;
    let in_club = match (viewer, event.club_id) {
        (Some(v), Some(club_id)) if visibility == Visibility::Private => {
            access::is_active_member(conn, v.id, club_id).await?
                || club_responsible(conn, Some(club_id)).await? == Some(v.id)
        }
        _ => false,
    };
    require(
        rules::can_view(visibility, viewer, in_club),
        "this event is private",
    )
}

#[derive(Deserialize)]
struct ListQuery {
    club: Option<i32>,
}

async fn list(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<Vec<EventResponse>>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let public = Visibility::Public.as_str();
    let mut query = events::table.into_boxed();
    match viewer {
        None => query = query.filter(events::visibility.eq(public)),
        Some(v) if v.is_moderator() => {}
        Some(v) => {
            let clubs = access::readable_club_ids(conn, &v).await?;
            query = query.filter(events::visibility.eq(public).or(events::club_id.eq_any(clubs)));
        }
    }
    if let Some(club_id) = q.club {
        query = query.filter(events::club_id.eq(club_id));
    }

    let events = query
        .order(events::starts_at.asc())
        .load::<Event>(conn)
        .await?;

    Ok(Json(load_events(conn, events, viewer.as_ref()).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CalendarResponse {
    events: Vec<EventResponse>,
    total_events: i64,
    upcoming_events: i64,
    active_events: i64,
    completed_events: i64,
}

async fn calendar(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
) -> AppResult<Json<CalendarResponse>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;
    let now = Utc::now();

    let upcoming = events::table
        .filter(events::visibility.eq(Visibility::Public.as_str()))
        .filter(events::starts_at.ge(now))
        .filter(events::status.ne(EventStatus::Cancelled.as_str()))
        .order(events::starts_at.asc())
        .limit(CALENDAR_SIZE)
        .load::<Event>(conn)
        .await?;

    let total_events = events::table.count().get_result::<i64>(conn).await?;
    let upcoming_events = events::table
        .filter(events::starts_at.ge(now))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let active_events = events::table
        .filter(events::status.eq(EventStatus::Ongoing.as_str()))
        .count()
        .get_result::<i64>(conn)
        .await?;
    let completed_events = events::table
        .filter(events::status.eq(EventStatus::Finished.as_str()))
        .count()
        .get_result::<i64>(conn)
        .await?;

    Ok(Json(CalendarResponse {
        events: load_events(conn, upcoming, viewer.as_ref()).await?,
        total_events,
        upcoming_events,
        active_events,
        completed_events,
    }))
}

async fn list_featured(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
) -> AppResult<Json<Vec<EventResponse>>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let events = events::table
        .filter(events::visibility.eq(Visibility::Public.as_str()))
        .filter(events::featured.eq(true))
        .order(events::starts_at.desc())
        .limit(FEATURED_SIZE)
        .load::<Event>(conn)
        .await?;

    Ok(Json(load_events(conn, events, viewer.as_ref()).await?))
}

async fn info(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Path(event_id): Path<i32>,
) -> AppResult<Json<EventResponse>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let event = load_event(conn, event_id).await?;
    require_view(conn, &event, viewer.as_ref()).await?;

    Ok(Json(load_event_response(conn, event, viewer.as_ref()).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct NewEventRequest {
    club_id: Option<i32>,
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    description: String,
    #[validate(length(min = 1, max = 200))]
    location: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    status: Option<EventStatus>,
    visibility: Visibility,
    #[validate(range(min = 1, message = "must be at least 1"))]
    max_participants: i32,
}

fn check_event_shape(
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    visibility: Visibility,
    club_id: Option<i32>,
) -> AppResult<()> {
    if !rules::schedule_is_valid(starts_at, ends_at) {
        return Err(AppError::invalid_field(
            "ends_at",
            "the event must end after it starts",
        ));
    }
    if !rules::scope_is_valid(visibility, club_id) {
        return Err(AppError::invalid_field(
            "club_id",
            "a private event must belong to a club",
        ));
    }
    Ok(())
}

async fn create(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Json(req): Json<NewEventRequest>,
) -> AppResult<Json<EventResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = events)]
    struct NewEvent {
        club_id: Option<i32>,
        title: String,
        description: String,
        location: String,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        status: &'static str,
        visibility: &'static str,
        max_participants: i32,
        created_by: i32,
    }

    error::validate(&req)?;
    check_event_shape(req.starts_at, req.ends_at, req.visibility, req.club_id)?;

    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    if let Some(club_id) = req.club_id {
        access::load_club(conn, club_id).await?;
    }
    let responsible = club_responsible(conn, req.club_id).await?;
    require(
        rules::can_manage(&viewer, responsible),
        "only staff or the club's responsible can create events",
    )?;

    let event = diesel::insert_into(events::table)
        .values(NewEvent {
            club_id: req.club_id,
            title: req.title.trim().to_string(),
            description: req.description,
            location: req.location.trim().to_string(),
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            status: req.status.unwrap_or(EventStatus::Planned).as_str(),
            visibility: req.visibility.as_str(),
            max_participants: req.max_participants,
            created_by: viewer.id,
        })
        .get_result::<Event>(conn)
        .await?;

    tracing::info!(event_id = event.id, by = viewer.id, "created event");
    Ok(Json(load_event_response(conn, event, Some(&viewer)).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct EventUpdateRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    description: Option<String>,
    #[validate(length(min = 1, max = 200))]
    location: Option<String>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    status: Option<EventStatus>,
    visibility: Option<Visibility>,
    #[validate(range(min = 1, message = "must be at least 1"))]
    max_participants: Option<i32>,
}

async fn edit(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
    Json(req): Json<EventUpdateRequest>,
) -> AppResult<Json<EventResponse>> {
    #[derive(AsChangeset)]
    #[diesel(table_name = events)]
    struct EventEdit {
        title: Option<String>,
        description: Option<String>,
        location: Option<String>,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
        status: Option<&'static str>,
        visibility: Option<&'static str>,
        max_participants: Option<i32>,
    }

    error::validate(&req)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let event = load_event(conn, event_id).await?;
    require_manager(conn, &event, &viewer).await?;

    let visibility = match req.visibility {
        Some(v) => v,
        None => event.visibility.parse()?,
    };
    check_event_shape(
        req.starts_at.unwrap_or(event.starts_at),
        req.ends_at.unwrap_or(event.ends_at),
        visibility,
        event.club_id,
    )?;

    let edit = EventEdit {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description,
        location: req.location.map(|l| l.trim().to_string()),
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        status: req.status.map(EventStatus::as_str),
        visibility: req.visibility.map(Visibility::as_str),
        max_participants: req.max_participants,
    };
    let unchanged = edit.title.is_none()
        && edit.description.is_none()
        && edit.location.is_none()
        && edit.starts_at.is_none()
        && edit.ends_at.is_none()
        && edit.status.is_none()
        && edit.visibility.is_none()
        && edit.max_participants.is_none();
    let event = if unchanged {
        event
    } else {
        diesel::update(events::table.find(event_id))
            .set(edit)
            .get_result::<Event>(conn)
            .await?
    };

    Ok(Json(load_event_response(conn, event, Some(&viewer)).await?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    let event = load_event(conn, event_id).await?;
    require_manager(conn, &event, &user.viewer()).await?;

    diesel::delete(events::table.find(event_id))
        .execute(conn)
        .await?;
    Ok(())
}

async fn register(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Participation>> {
    #[derive(Insertable)]
    #[diesel(table_name = participations)]
    struct NewParticipation {
        event_id: i32,
        user_id: i32,
    }

    let viewer = user.viewer();
    let conn = &mut pool.get().await?;
    let event = load_event(conn, event_id).await?;

    let viewer_is_member = match event.club_id {
        Some(club_id) => access::is_active_member(conn, viewer.id, club_id).await?,
        None => false,
    };
    let already_registered = diesel::select(exists(
        participations::table
            .filter(participations::event_id.eq(event_id))
            .filter(participations::user_id.eq(viewer.id)),
    ))
    .get_result::<bool>(conn)
    .await?;
    let participant_count = participations::table
        .filter(participations::event_id.eq(event_id))
        .count()
        .get_result::<i64>(conn)
        .await?;

    rules::check_registration(
        &viewer,
        &Registration {
            visibility: event.visibility.parse()?,
            viewer_is_member,
            already_registered,
            participant_count,
            max_participants: event.max_participants,
        },
    )?;

    // the unique index settles concurrent duplicates; capacity is checked above
    let participation = diesel::insert_into(participations::table)
        .values(NewParticipation {
            event_id,
            user_id: viewer.id,
        })
        .on_conflict((participations::event_id, participations::user_id))
        .do_nothing()
        .get_result::<Participation>(conn)
        .await
        .optional()?
        .ok_or(RegistrationError::AlreadyRegistered)?;

    tracing::info!(event_id, user_id = viewer.id, "registered for event");
    Ok(Json(participation))
}

async fn unregister(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    let deleted = diesel::delete(
        participations::table
            .filter(participations::event_id.eq(event_id))
            .filter(participations::user_id.eq(user.0.id)),
    )
    .execute(conn)
    .await?;
    if deleted == 0 {
        return Err(AppError::not_found("you are not registered for this event"));
    }
    tracing::info!(event_id, user_id = user.0.id, "unregistered from event");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantResponse {
    user_id: i32,
    username: String,
    registered_at: DateTime<Utc>,
    attended: bool,
}

async fn participants(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Vec<ParticipantResponse>>> {
    let conn = &mut pool.get().await?;

    let event = load_event(conn, event_id).await?;
    require_manager(conn, &event, &user.viewer()).await?;

    let participants = participations::table
        .inner_join(users::table)
        .filter(participations::event_id.eq(event_id))
        .order(participations::registered_at.asc())
        .select((
            users::id,
            users::username,
            participations::registered_at,
            participations::attended,
        ))
        .load::<(i32, String, DateTime<Utc>, bool)>(conn)
        .await?
        .into_iter()
        .map(|(user_id, username, registered_at, attended)| ParticipantResponse {
            user_id,
            username,
            registered_at,
            attended,
        })
        .collect();

    Ok(Json(participants))
}

#[derive(Deserialize)]
struct AttendanceRequest {
    attended: bool,
}

async fn mark_attendance(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path((event_id, participant_id)): Path<(i32, i32)>,
    Json(req): Json<AttendanceRequest>,
) -> AppResult<Json<Participation>> {
    let conn = &mut pool.get().await?;

    let event = load_event(conn, event_id).await?;
    require_manager(conn, &event, &user.viewer()).await?;

    let participation = diesel::update(
        participations::table
            .filter(participations::event_id.eq(event_id))
            .filter(participations::user_id.eq(participant_id)),
    )
    .set(participations::attended.eq(req.attended))
    .get_result::<Participation>(conn)
    .await
    .optional()?
    .ok_or_else(|| AppError::not_found("this user is not registered for the event"))?;

    Ok(Json(participation))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct PromotionRequest {
    image: Option<String>,
    #[validate(length(max = 1000))]
    description: Option<String>,
}

async fn promote(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
    Json(req): Json<PromotionRequest>,
) -> AppResult<Json<EventResponse>> {
    error::validate(&req)?;
    let viewer = user.viewer();
    require(viewer.is_moderator(), "only staff can promote events")?;
    if let Some(image) = &req.image {
        if !uploads::is_stored_path(UploadKind::Promotions, image) {
            return Err(AppError::invalid_field(
                "image",
                "must be a path returned by the promotions upload",
            ));
        }
    }

    let conn = &mut pool.get().await?;
    let event = diesel::update(events::table.find(event_id))
        .set((
            events::featured.eq(true),
            events::promotion_image.eq(req.image),
            events::promotion_description.eq(req.description),
        ))
        .get_result::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the event does not exist"))?;

    tracing::info!(event_id, by = viewer.id, "promoted event");
    Ok(Json(load_event_response(conn, event, Some(&viewer)).await?))
}

async fn remove_promotion(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
) -> AppResult<Json<EventResponse>> {
    let viewer = user.viewer();
    require(viewer.is_moderator(), "only staff can change promotions")?;

    let conn = &mut pool.get().await?;
    let event = diesel::update(events::table.find(event_id))
        .set((
            events::featured.eq(false),
            events::promotion_image.eq(None::<String>),
            events::promotion_description.eq(None::<String>),
        ))
        .get_result::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the event does not exist"))?;

    Ok(Json(load_event_response(conn, event, Some(&viewer)).await?))
}

async fn toggle_featured(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(event_id): Path<i32>,
) -> AppResult<Json<EventResponse>> {
    let viewer = user.viewer();
    require(viewer.is_moderator(), "only staff can feature events")?;

    let conn = &mut pool.get().await?;
    let event = diesel::update(events::table.find(event_id))
        .set(events::featured.eq(diesel::dsl::not(events::featured)))
        .get_result::<Event>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the event does not exist"))?;

    Ok(Json(load_event_response(conn, event, Some(&viewer)).await?))
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/calendar", get(calendar))
        .route("/featured", get(list_featured))
        .route("/:event_id", get(info).put(edit).delete(remove))
        .route("/:event_id/register", post(register).delete(unregister))
        .route("/:event_id/participants", get(participants))
        .route(
            "/:event_id/participants/:user_id/attendance",
            put(mark_attendance),
        )
        .route("/:event_id/promotion", put(promote).delete(remove_promotion))
        .route("/:event_id/featured", post(toggle_featured))
}
