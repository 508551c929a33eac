//! Loading the state the rule modules decide on.
//!
//! Every helper returns 404 for missing rows and leaves permission
//! decisions to the caller, which asks [`Capabilities`] and turns a `false`
//! into a 403 with [`require`].

use crate::{
    error::{AppError, AppResult},
    models::{Club, Forum, Post, Survey, Thread},
    rules::{
        forum::{Capabilities, ClubStanding, ForumAccess, ForumKind},
        Viewer, Visibility,
    },
    schema::*,
};
use diesel::{dsl::exists, pg::Pg, prelude::*};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::borrow::Cow;

pub fn require(allowed: bool, message: impl Into<Cow<'static, str>>) -> AppResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden(message))
    }
}

pub async fn is_active_member(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    club_id: i32,
) -> QueryResult<bool> {
    diesel::select(exists(
        memberships::table
            .filter(memberships::user_id.eq(user_id))
            .filter(memberships::club_id.eq(club_id))
            .filter(memberships::active.eq(true)),
    ))
    .get_result(conn)
    .await
}

pub async fn is_responsible_of_any_club(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> QueryResult<bool> {
    diesel::select(exists(
        clubs::table.filter(clubs::responsible_id.eq(user_id)),
    ))
    .get_result(conn)
    .await
}

pub async fn load_club(conn: &mut AsyncPgConnection, club_id: i32) -> AppResult<Club> {
    clubs::table
        .find(club_id)
        .first::<Club>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the club does not exist"))
}

/// Clubs whose private forums the viewer may read: the ones they run plus
/// the ones they are an active member of.
pub async fn readable_club_ids(
    conn: &mut AsyncPgConnection,
    viewer: &Viewer,
) -> QueryResult<Vec<i32>> {
    let mut ids = clubs::table
        .filter(clubs::responsible_id.eq(viewer.id))
        .select(clubs::id)
        .load::<i32>(conn)
        .await?;
    ids.extend(
        memberships::table
            .filter(memberships::user_id.eq(viewer.id))
            .filter(memberships::active.eq(true))
            .select(memberships::club_id)
            .load::<i32>(conn)
            .await?,
    );
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Forums the viewer can read, as a query to refine further.
pub async fn visible_forums(
    conn: &mut AsyncPgConnection,
    viewer: Option<&Viewer>,
) -> QueryResult<forums::BoxedQuery<'static, Pg>> {
    let public = Visibility::Public.as_str();
    let query = forums::table.into_boxed();
    Ok(match viewer {
        None => query.filter(forums::visibility.eq(public)),
        Some(v) if v.is_superuser => query,
        Some(v) => {
            let clubs = readable_club_ids(conn, v).await?;
            query.filter(
                forums::visibility
                    .eq(public)
                    .or(forums::club_id.eq_any(clubs)),
            )
        }
    })
}

/// A forum together with what the viewer may do in it.
pub struct ForumContext {
    pub forum: Forum,
    pub kind: ForumKind,
    pub caps: Capabilities,
}

impl ForumContext {
    pub fn require_read(&self) -> AppResult<()> {
        require(self.caps.can_read, "you cannot access this forum")
    }

    pub fn require_write(&self) -> AppResult<()> {
        require(self.caps.can_write, "you cannot post in this forum")
    }

    pub fn require_manage(&self) -> AppResult<()> {
        require(self.caps.can_manage, "only the forum's managers can do this")
    }
}

pub fn forum_kind(forum: &Forum) -> AppResult<ForumKind> {
    let visibility = forum.visibility.parse::<Visibility>()?;
    ForumKind::from_parts(visibility, forum.club_id).map_err(|e| {
        anyhow::anyhow!("forum {} is stored in an invalid state: {}", forum.id, e.message()).into()
    })
}

pub async fn forum_context(
    conn: &mut AsyncPgConnection,
    forum: Forum,
    viewer: Option<&Viewer>,
) -> AppResult<ForumContext> {
    let kind = forum_kind(&forum)?;
    let access = match kind {
        ForumKind::Public => ForumAccess::Public {
            created_by: forum.created_by,
        },
        ForumKind::Private { club_id } => {
            let responsible_id = clubs::table
                .find(club_id)
                .select(clubs::responsible_id)
                .first::<Option<i32>>(conn)
                .await?;
            let viewer_is_member = match viewer {
                Some(v) => is_active_member(conn, v.id, club_id).await?,
                None => false,
            };
            ForumAccess::Private {
                standing: ClubStanding {
                    responsible_id,
                    viewer_is_member,
                },
            }
        }
    };
    let caps = Capabilities::resolve(&access, viewer);
    Ok(ForumContext { forum, kind, caps })
}

pub async fn load_forum(
    conn: &mut AsyncPgConnection,
    forum_id: i32,
    viewer: Option<&Viewer>,
) -> AppResult<ForumContext> {
    let forum = forums::table
        .find(forum_id)
        .first::<Forum>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the forum does not exist"))?;
    forum_context(conn, forum, viewer).await
}

pub async fn load_thread(
    conn: &mut AsyncPgConnection,
    thread_id: i32,
    viewer: Option<&Viewer>,
) -> AppResult<(Thread, ForumContext)> {
    let thread = threads::table
        .find(thread_id)
        .first::<Thread>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the thread does not exist"))?;
    let ctx = load_forum(conn, thread.forum_id, viewer).await?;
    Ok((thread, ctx))
}

pub async fn load_post(
    conn: &mut AsyncPgConnection,
    post_id: i32,
    viewer: Option<&Viewer>,
) -> AppResult<(Post, Thread, ForumContext)> {
    let post = posts::table
        .find(post_id)
        .first::<Post>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the post does not exist"))?;
    let (thread, ctx) = load_thread(conn, post.thread_id, viewer).await?;
    Ok((post, thread, ctx))
}

pub async fn load_survey(
    conn: &mut AsyncPgConnection,
    survey_id: i32,
    viewer: Option<&Viewer>,
) -> AppResult<(Survey, ForumContext)> {
    let survey = surveys::table
        .find(survey_id)
        .first::<Survey>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found("the survey does not exist"))?;
    let ctx = load_forum(conn, survey.forum_id, viewer).await?;
    Ok((survey, ctx))
}
