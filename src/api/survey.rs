use crate::{
    access::{self, require, ForumContext},
    auth::{CurrentUser, MaybeUser},
    error::{self, AppError, AppResult},
    models::{Survey, SurveyOption},
    notify::{self, NewNotification, NotificationKind},
    rules::{
        survey::{self as rules, OptionTally, VoteOutcome},
        Viewer,
    },
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    routing::{get, post},
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
pub(super) struct SurveyResponse {
    id: i32,
    forum_id: i32,
    title: String,
    description: String,
    author_id: i32,
    author_name: Option<String>,
    closes_at: Option<DateTime<Utc>>,
    is_closed: bool,
    is_open: bool,
    vote_count: usize,
    created_at: DateTime<Utc>,
}

async fn load_surveys(
    conn: &mut AsyncPgConnection,
    surveys: Vec<Survey>,
) -> AppResult<Vec<SurveyResponse>> {
    let survey_ids = surveys.iter().map(|s| s.id).collect::<Vec<_>>();
    let vote_counts = survey_votes::table
        .filter(survey_votes::survey_id.eq_any(&survey_ids))
        .select(survey_votes::survey_id)
        .load::<i32>(conn)
        .await?
        .into_iter()
        .counts();
    let authors = HashMap::<i32, String>::from_iter(
        users::table
            .filter(users::id.eq_any(surveys.iter().map(|s| s.author_id).unique()))
            .select((users::id, users::username))
            .load::<(i32, String)>(conn)
            .await?,
    );

    let now = Utc::now();
    Ok(surveys
        .into_iter()
        .map(|survey| SurveyResponse {
            id: survey.id,
            is_open: rules::is_open(&survey, now),
            vote_count: vote_counts.get(&survey.id).copied().unwrap_or(0),
            author_name: authors.get(&survey.author_id).cloned(),
            forum_id: survey.forum_id,
            title: survey.title,
            description: survey.description,
            author_id: survey.author_id,
            closes_at: survey.closes_at,
            is_closed: survey.is_closed,
            created_at: survey.created_at,
        })
        .collect())
}

async fn load_survey_response(
    conn: &mut AsyncPgConnection,
    survey: Survey,
) -> AppResult<SurveyResponse> {
    Ok(load_surveys(conn, vec![survey])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_surveys` should return one survey"))?)
}

async fn load_options(
    conn: &mut AsyncPgConnection,
    survey_id: i32,
) -> QueryResult<Vec<SurveyOption>> {
    survey_options::table
        .filter(survey_options::survey_id.eq(survey_id))
        .order((survey_options::position.asc(), survey_options::id.asc()))
        .load::<SurveyOption>(conn)
        .await
}

fn require_survey_manager(ctx: &ForumContext, viewer: &Viewer, survey: &Survey) -> AppResult<()> {
    require(
        ctx.caps.can_edit_content(Some(viewer), survey.author_id),
        "you cannot manage this survey",
    )
}

pub(super) async fn list_in_forum(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Path(forum_id): Path<i32>,
) -> AppResult<Json<Vec<SurveyResponse>>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let ctx = access::load_forum(conn, forum_id, viewer.as_ref()).await?;
    ctx.require_read()?;

    let surveys = surveys::table
        .filter(surveys::forum_id.eq(forum_id))
        .order(surveys::created_at.desc())
        .load::<Survey>(conn)
        .await?;

    Ok(Json(load_surveys(conn, surveys).await?))
}

async fn insert_options(
    conn: &mut AsyncPgConnection,
    survey_id: i32,
    first_position: i32,
    texts: Vec<String>,
) -> AppResult<Vec<SurveyOption>> {
    #[derive(Insertable)]
    #[diesel(table_name = survey_options)]
    struct NewOption {
        survey_id: i32,
        text: String,
        position: i32,
    }

    let rows = texts
        .into_iter()
        .zip(first_position..)
        .map(|(text, position)| NewOption {
            survey_id,
            text,
            position,
        })
        .collect::<Vec<_>>();

    diesel::insert_into(survey_options::table)
        .values(rows)
        .get_results::<SurveyOption>(conn)
        .await
        .map_err(|e| {
            if error::is_unique_violation(&e) {
                AppError::conflict("this option already exists")
            } else {
                e.into()
            }
        })
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(super) struct NewSurveyRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    description: String,
    closes_at: Option<DateTime<Utc>>,
    #[serde(default)]
    options: Vec<String>,
}

pub(super) async fn create(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(forum_id): Path<i32>,
    Json(req): Json<NewSurveyRequest>,
) -> AppResult<Json<SurveyResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = surveys)]
    struct NewSurvey {
        forum_id: i32,
        title: String,
        description: String,
        author_id: i32,
        closes_at: Option<DateTime<Utc>>,
    }

    error::validate(&req)?;
    let options = rules::check_new_options(&[], &req.options)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let ctx = access::load_forum(conn, forum_id, Some(&viewer)).await?;
    ctx.require_write()?;

    let survey = diesel::insert_into(surveys::table)
        .values(NewSurvey {
            forum_id,
            title: req.title.trim().to_string(),
            description: req.description,
            author_id: viewer.id,
            closes_at: req.closes_at,
        })
        .get_result::<Survey>(conn)
        .await?;
    if !options.is_empty() {
        insert_options(conn, survey.id, 1, options).await?;
    }

    tracing::debug!(survey_id = survey.id, forum_id, "created survey");
    Ok(Json(load_survey_response(conn, survey).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SurveyDetailResponse {
    survey: SurveyResponse,
    results: Vec<OptionTally>,
    total_votes: usize,
    my_option_id: Option<i32>,
    can_vote: bool,
    can_manage: bool,
}

async fn info(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Path(survey_id): Path<i32>,
) -> AppResult<Json<SurveyDetailResponse>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let (survey, ctx) = access::load_survey(conn, survey_id, viewer.as_ref()).await?;
    ctx.require_read()?;

    let options = load_options(conn, survey_id).await?;
    let votes = survey_votes::table
        .filter(survey_votes::survey_id.eq(survey_id))
        .select((survey_votes::user_id, survey_votes::option_id))
        .load::<(i32, i32)>(conn)
        .await?;

    let my_option_id = viewer.as_ref().and_then(|v| {
        votes
            .iter()
            .find(|(user_id, _)| *user_id == v.id)
            .map(|(_, option_id)| *option_id)
    });
    let votes = votes.into_iter().map(|(_, option_id)| option_id).collect::<Vec<_>>();

    let can_vote = rules::can_vote(
        &survey,
        ctx.kind.visibility(),
        &ctx.caps,
        viewer.as_ref(),
        Utc::now(),
    );
    let can_manage = ctx.caps.can_edit_content(viewer.as_ref(), survey.author_id);

    Ok(Json(SurveyDetailResponse {
        results: rules::tally(&options, &votes),
        total_votes: votes.len(),
        survey: load_survey_response(conn, survey).await?,
        my_option_id,
        can_vote,
        can_manage,
    }))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SurveyUpdateRequest {
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    description: Option<String>,
    closes_at: Option<DateTime<Utc>>,
    /// Drops the deadline; wins over `closes_at`.
    #[serde(default)]
    no_deadline: bool,
}

async fn edit(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(survey_id): Path<i32>,
    Json(req): Json<SurveyUpdateRequest>,
) -> AppResult<Json<SurveyResponse>> {
    #[derive(AsChangeset)]
    #[diesel(table_name = surveys)]
    struct SurveyEdit {
        title: Option<String>,
        description: Option<String>,
        closes_at: Option<Option<DateTime<Utc>>>,
        updated_at: DateTime<Utc>,
    }

    error::validate(&req)?;
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (survey, ctx) = access::load_survey(conn, survey_id, Some(&viewer)).await?;
    require_survey_manager(&ctx, &viewer, &survey)?;

    let survey = diesel::update(surveys::table.find(survey_id))
        .set(SurveyEdit {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            closes_at: if req.no_deadline {
                Some(None)
            } else {
                req.closes_at.map(Some)
            },
            updated_at: Utc::now(),
        })
        .get_result::<Survey>(conn)
        .await?;

    Ok(Json(load_survey_response(conn, survey).await?))
}

async fn remove(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(survey_id): Path<i32>,
) -> AppResult<()> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (survey, ctx) = access::load_survey(conn, survey_id, Some(&viewer)).await?;
    require_survey_manager(&ctx, &viewer, &survey)?;

    diesel::delete(surveys::table.find(survey_id))
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Deserialize)]
struct NewOptionRequest {
    text: String,
}

async fn add_option(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(survey_id): Path<i32>,
    Json(req): Json<NewOptionRequest>,
) -> AppResult<Json<SurveyOption>> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (survey, ctx) = access::load_survey(conn, survey_id, Some(&viewer)).await?;
    require_survey_manager(&ctx, &viewer, &survey)?;

    let existing = load_options(conn, survey_id).await?;
    let texts = rules::check_new_options(&existing, &[req.text])?;
    let next_position = existing.iter().map(|o| o.position).max().unwrap_or(0) + 1;

    let option = insert_options(conn, survey_id, next_position, texts)
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("inserting an option should return it"))?;
    Ok(Json(option))
}

async fn close(
    Extension(pool): Extension<DbPool>,
    user: CurrentUser,
    Path(survey_id): Path<i32>,
) -> AppResult<Json<SurveyResponse>> {
    let viewer = user.viewer();
    let conn = &mut pool.get().await?;

    let (survey, ctx) = access::load_survey(conn, survey_id, Some(&viewer)).await?;
    require_survey_manager(&ctx, &viewer, &survey)?;

    let survey = diesel::update(surveys::table.find(survey_id))
        .set((
            surveys::is_closed.eq(true),
            surveys::updated_at.eq(Utc::now()),
        ))
        .get_result::<Survey>(conn)
        .await?;

    Ok(Json(load_survey_response(conn, survey).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    option_id: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoteResponse {
    message: String,
    option_id: i32,
    changed: bool,
}

async fn vote(
    Extension(pool): Extension<DbPool>,
    CurrentUser(user): CurrentUser,
    Path(survey_id): Path<i32>,
    Json(req): Json<VoteRequest>,
) -> AppResult<Json<VoteResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = survey_votes)]
    struct NewVote {
        survey_id: i32,
        option_id: i32,
        user_id: i32,
    }

    let viewer = Viewer::from(&user);
    let conn = &mut pool.get().await?;

    let (survey, ctx) = access::load_survey(conn, survey_id, Some(&viewer)).await?;
    require(
        rules::can_vote(
            &survey,
            ctx.kind.visibility(),
            &ctx.caps,
            Some(&viewer),
            Utc::now(),
        ),
        "you cannot vote in this survey",
    )?;

    let option = survey_options::table
        .find(req.option_id)
        .filter(survey_options::survey_id.eq(survey_id))
        .first::<SurveyOption>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("this option does not belong to the survey"))?;

    let existing = survey_votes::table
        .filter(survey_votes::survey_id.eq(survey_id))
        .filter(survey_votes::user_id.eq(viewer.id))
        .select(survey_votes::option_id)
        .first::<i32>(conn)
        .await
        .optional()?;

    let outcome = VoteOutcome::decide(existing, option.id);
    if outcome.writes() {
        diesel::insert_into(survey_votes::table)
            .values(NewVote {
                survey_id,
                option_id: option.id,
                user_id: viewer.id,
            })
            .on_conflict((survey_votes::survey_id, survey_votes::user_id))
            .do_update()
            .set(survey_votes::option_id.eq(excluded(survey_votes::option_id)))
            .execute(conn)
            .await?;

        let mut notification = NewNotification::new(
            survey.author_id,
            NotificationKind::Vote,
            format!("{} voted in your survey \"{}\"", user.username, survey.title),
        )
        .from_actor(viewer.id);
        notification.survey_id = Some(survey_id);
        notification.option_id = Some(option.id);
        notify::send(conn, notification).await?;

        tracing::info!(survey_id, option_id = option.id, user_id = viewer.id, ?outcome, "vote cast");
    }

    Ok(Json(VoteResponse {
        message: outcome.message(&option.text),
        option_id: option.id,
        changed: outcome.writes(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoterResponse {
    user_id: i32,
    username: String,
    voted_at: DateTime<Utc>,
}

async fn voters(
    Extension(pool): Extension<DbPool>,
    viewer: MaybeUser,
    Path((survey_id, option_id)): Path<(i32, i32)>,
) -> AppResult<Json<Vec<VoterResponse>>> {
    let viewer = viewer.viewer();
    let conn = &mut pool.get().await?;

    let (_, ctx) = access::load_survey(conn, survey_id, viewer.as_ref()).await?;
    ctx.require_read()?;

    let voters = survey_votes::table
        .inner_join(users::table)
        .filter(survey_votes::survey_id.eq(survey_id))
        .filter(survey_votes::option_id.eq(option_id))
        .order((survey_votes::created_at.asc(), survey_votes::id.asc()))
        .select((users::id, users::username, survey_votes::created_at))
        .load::<(i32, String, DateTime<Utc>)>(conn)
        .await?
        .into_iter()
        .map(|(user_id, username, voted_at)| VoterResponse {
            user_id,
            username,
            voted_at,
        })
        .collect();

    Ok(Json(voters))
}

pub fn app() -> Router {
    Router::new()
        .route("/:survey_id", get(info).put(edit).delete(remove))
        .route("/:survey_id/options", post(add_option))
        .route("/:survey_id/options/:option_id/voters", get(voters))
        .route("/:survey_id/close", post(close))
        .route("/:survey_id/vote", post(vote))
}
